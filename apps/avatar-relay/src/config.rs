use std::{net::SocketAddr, time::Duration};

use anyhow::{bail, Context};
use relay_core::HubConfig;

use crate::cli::ServeArgs;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub hub: HubConfig,
    pub shutdown_grace: Duration,
}

impl TryFrom<ServeArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", args.listen_addr))?;
        if args.clip_ttl_secs == 0 {
            bail!("clip TTL must be at least one second");
        }
        if args.command_capacity == 0 {
            bail!("command capacity must be at least 1");
        }
        if args.push_buffer == 0 {
            bail!("push buffer must be at least 1");
        }
        let sweep_interval =
            (args.sweep_interval_secs > 0).then(|| Duration::from_secs(args.sweep_interval_secs));

        Ok(ServerConfig {
            listen_addr,
            hub: HubConfig {
                clip_ttl: Duration::from_secs(args.clip_ttl_secs),
                command_capacity: args.command_capacity,
                push_buffer: args.push_buffer,
                sweep_interval,
            },
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ServeArgs {
        ServeArgs {
            listen_addr: "127.0.0.1:3100".into(),
            clip_ttl_secs: 3600,
            command_capacity: 100,
            push_buffer: 64,
            sweep_interval_secs: 60,
            shutdown_grace_secs: 2,
        }
    }

    #[test_timeout::timeout]
    fn converts_defaults() {
        let config = ServerConfig::try_from(args()).unwrap();
        assert_eq!(config.listen_addr.port(), 3100);
        assert_eq!(config.hub.clip_ttl, Duration::from_secs(3600));
        assert_eq!(config.hub.sweep_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.shutdown_grace, Duration::from_secs(2));
    }

    #[test_timeout::timeout]
    fn zero_sweep_interval_disables_sweeper() {
        let mut args = args();
        args.sweep_interval_secs = 0;
        let config = ServerConfig::try_from(args).unwrap();
        assert!(config.hub.sweep_interval.is_none());
    }

    #[test_timeout::timeout]
    fn rejects_invalid_values() {
        let mut bad_addr = args();
        bad_addr.listen_addr = "not-an-addr".into();
        assert!(ServerConfig::try_from(bad_addr).is_err());

        let mut bad_capacity = args();
        bad_capacity.command_capacity = 0;
        assert!(ServerConfig::try_from(bad_capacity).is_err());
    }
}
