use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use relay_core::{AppState, Command};
use serde::Deserialize;
use tokio::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "avatar-relay", author, version)]
#[command(about = "Clip reassembly, command relay and shared state for the avatar broadcast rig")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server options (used when no subcommand is given)
    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay server (default)
    Serve(ServeArgs),

    /// Submit an operator command to a running relay
    Send {
        /// Relay base URL
        #[arg(short, long, env = "AVATAR_RELAY_URL", default_value = "http://127.0.0.1:3100")]
        url: String,

        /// Command JSON, e.g. '{"type":"mode-select","mode":"chat"}'
        command: String,
    },

    /// Print the current shared state of a running relay
    State {
        /// Relay base URL
        #[arg(short, long, env = "AVATAR_RELAY_URL", default_value = "http://127.0.0.1:3100")]
        url: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind the HTTP listener to.
    #[arg(
        long,
        env = "AVATAR_RELAY_LISTEN_ADDR",
        default_value = "127.0.0.1:3100"
    )]
    pub listen_addr: String,

    /// Age after which unfinished sessions and legacy clips are evicted.
    #[arg(long, env = "AVATAR_RELAY_CLIP_TTL_SECS", default_value_t = 3600)]
    pub clip_ttl_secs: u64,

    /// Maximum number of commands held for pollers; the oldest are dropped beyond it.
    #[arg(long, env = "AVATAR_RELAY_COMMAND_CAPACITY", default_value_t = 100)]
    pub command_capacity: usize,

    /// Per-connection event queue depth for `/api/events`.
    #[arg(long, env = "AVATAR_RELAY_PUSH_BUFFER", default_value_t = 64)]
    pub push_buffer: usize,

    /// Period of the stale-clip sweep; 0 disables it.
    #[arg(long, env = "AVATAR_RELAY_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Grace period applied during shutdown.
    #[arg(long, env = "AVATAR_RELAY_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    command: Command,
}

fn client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("failed to build http client")
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

pub async fn run_send(url: String, raw: String) -> Result<()> {
    let command = Command::from_json(raw.as_bytes()).context("invalid command")?;

    let target = endpoint(&url, "/api/commands");
    debug!(url = %target, kind = command.kind(), "submitting command");
    let response = client()?
        .post(&target)
        .json(&command)
        .send()
        .await
        .with_context(|| format!("failed to reach {target}"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("relay rejected command ({status}): {body}");
    }
    let accepted: SubmitResponse = response
        .json()
        .await
        .context("unexpected response from relay")?;
    println!("{}", serde_json::to_string(&accepted.command)?);
    Ok(())
}

pub async fn run_state(url: String) -> Result<()> {
    let target = endpoint(&url, "/api/state");
    let response = client()?
        .get(&target)
        .send()
        .await
        .with_context(|| format!("failed to reach {target}"))?
        .error_for_status()
        .context("relay returned an error")?;
    let state: AppState = response
        .json()
        .await
        .context("unexpected response from relay")?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
