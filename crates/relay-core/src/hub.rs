use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    AppState, AppStatePatch, Command, CommandError, CommandRelay, Drain, LegacyBuffer, PushFeed,
    ReassemblyQueue, StateStore, DEFAULT_CLIP_TTL, DEFAULT_COMMAND_CAPACITY,
};

const DEFAULT_PUSH_BUFFER: usize = 64;
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Age past which unfinished sessions and legacy clips are reclaimed.
    pub clip_ttl: Duration,
    pub command_capacity: usize,
    /// Per-consumer queue depth for push feeds.
    pub push_buffer: usize,
    /// Period of the background sweep; `None` leaves eviction to ingestion.
    pub sweep_interval: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            clip_ttl: DEFAULT_CLIP_TTL,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            push_buffer: DEFAULT_PUSH_BUFFER,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
        }
    }
}

/// Completion notice from the video-generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipDelivery {
    pub video_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u32>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClipError {
    #[error("videoPath must not be empty")]
    MissingVideoPath,
    #[error("totalCount must be at least 1")]
    EmptyTotal,
    #[error("sequence {sequence} is outside totalCount {total}")]
    SequenceOutOfRange { sequence: u32, total: u32 },
}

enum Route<'a> {
    Sequenced {
        session_id: &'a str,
        sequence: u32,
        total: u32,
    },
    Legacy,
}

impl ClipDelivery {
    fn route(&self) -> Result<Route<'_>, ClipError> {
        if self.video_path.trim().is_empty() {
            return Err(ClipError::MissingVideoPath);
        }
        match (self.session_id.as_deref(), self.sequence, self.total_count) {
            (Some(session_id), Some(sequence), Some(total)) => Ok(Route::Sequenced {
                session_id,
                sequence,
                total,
            }),
            _ => Ok(Route::Legacy),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Ready,
    Pending,
    Unknown,
}

/// Answer to a clip poll. The legacy form carries only `video_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipPoll {
    pub video_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PollStatus>,
}

impl ClipPoll {
    fn sequenced(session_id: &str, drain: Drain) -> Self {
        let mut poll = Self {
            video_path: None,
            session_id: Some(session_id.to_string()),
            sequence: None,
            is_complete: None,
            status: None,
        };
        match drain {
            Drain::Ready(clip) => {
                poll.video_path = Some(clip.path);
                poll.sequence = Some(clip.sequence);
                poll.is_complete = Some(clip.is_complete);
                poll.status = Some(PollStatus::Ready);
            }
            Drain::Pending => poll.status = Some(PollStatus::Pending),
            Drain::NotFound => poll.status = Some(PollStatus::Unknown),
        }
        poll
    }

    fn legacy(video_path: Option<String>) -> Self {
        Self {
            video_path,
            session_id: None,
            sequence: None,
            is_complete: None,
            status: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub sessions: usize,
    pub legacy: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub active_sessions: usize,
    pub buffered_clips: usize,
    pub legacy_queued: usize,
    pub pending_commands: usize,
    pub state_subscribers: usize,
    pub command_subscribers: usize,
}

/// Owns one instance of every store. Cloning yields another handle to the same
/// stores; request paths receive a handle instead of reaching for globals.
#[derive(Clone)]
pub struct RelayHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: HubConfig,
    reassembly: ReassemblyQueue,
    legacy: LegacyBuffer,
    commands: CommandRelay,
    state: StateStore,
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl RelayHub {
    pub fn new(config: HubConfig) -> Self {
        let commands = CommandRelay::with_capacity(config.command_capacity);
        Self {
            inner: Arc::new(HubInner {
                config,
                reassembly: ReassemblyQueue::new(),
                legacy: LegacyBuffer::new(),
                commands,
                state: StateStore::new(),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn reassembly(&self) -> &ReassemblyQueue {
        &self.inner.reassembly
    }

    pub fn legacy(&self) -> &LegacyBuffer {
        &self.inner.legacy
    }

    pub fn commands(&self) -> &CommandRelay {
        &self.inner.commands
    }

    pub fn state_store(&self) -> &StateStore {
        &self.inner.state
    }

    /// Routes a finished clip: deliveries carrying session id, sequence and
    /// total go to the reassembly queue, everything else to the legacy buffer.
    /// Stale entries of the receiving store are evicted afterwards. Returns the
    /// id the clip was accepted under. Sequence range is checked against the
    /// total fixed when the session was created.
    pub fn ingest_clip(&self, delivery: ClipDelivery) -> Result<String, ClipError> {
        let ttl = self.inner.config.clip_ttl;
        match delivery.route()? {
            Route::Sequenced {
                session_id,
                sequence,
                total,
            } => {
                self.inner.reassembly.try_insert(
                    session_id,
                    sequence,
                    delivery.video_path.as_str(),
                    total,
                )?;
                counter!("avatar_relay_clips_ingested_total", "route" => "sequenced").increment(1);
                self.inner.reassembly.evict_stale(ttl);
                Ok(format!("{session_id}:{sequence}"))
            }
            Route::Legacy => {
                if delivery.session_id.is_some()
                    || delivery.sequence.is_some()
                    || delivery.total_count.is_some()
                {
                    debug!("partial session fields on clip delivery; using legacy buffer");
                }
                let id = self.inner.legacy.enqueue(delivery.video_path.clone());
                counter!("avatar_relay_clips_ingested_total", "route" => "legacy").increment(1);
                self.inner.legacy.evict_stale(ttl);
                Ok(id)
            }
        }
    }

    /// Drains the next clip for `session_id`, or the oldest legacy clip when no
    /// session is given. Never waits.
    pub fn poll_clip(&self, session_id: Option<&str>) -> ClipPoll {
        match session_id {
            Some(session_id) => {
                ClipPoll::sequenced(session_id, self.inner.reassembly.drain_next(session_id))
            }
            None => ClipPoll::legacy(self.inner.legacy.dequeue_one().map(|entry| entry.path)),
        }
    }

    /// Accepts an operator command: applies its state transition, queues it for
    /// pollers and broadcasts it to push subscribers, in that order.
    pub fn submit_command(&self, command: Command) -> Result<Command, CommandError> {
        command.validate()?;
        self.inner.state.apply_command(&command);
        let dropped = self.inner.commands.enqueue(command.clone());
        let notified = self.inner.state.broadcast_command(&command);
        counter!("avatar_relay_commands_accepted_total", "kind" => command.kind()).increment(1);
        info!(kind = command.kind(), dropped, notified, "command accepted");
        Ok(command)
    }

    pub fn drain_commands(&self) -> Vec<Command> {
        self.inner.commands.drain_all()
    }

    pub fn state(&self) -> AppState {
        self.inner.state.get()
    }

    pub fn update_state(&self, patch: AppStatePatch) -> AppState {
        self.inner.state.update(patch)
    }

    pub fn reset_state(&self) -> AppState {
        info!("resetting shared state");
        self.inner.state.reset()
    }

    pub fn open_push_feed(&self) -> PushFeed {
        PushFeed::open(&self.inner.state, self.inner.config.push_buffer)
    }

    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> SweepReport {
        let ttl = self.inner.config.clip_ttl;
        SweepReport {
            sessions: self.inner.reassembly.evict_stale_at(now, ttl),
            legacy: self.inner.legacy.evict_stale_at(now, ttl),
        }
    }

    /// Periodically evicts stale sessions and legacy clips so abandoned work is
    /// reclaimed even when no new clips arrive. Returns `None` when disabled.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let period = self.inner.config.sweep_interval?;
        let hub = self.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let report = hub.sweep();
                if report != SweepReport::default() {
                    info!(
                        sessions = report.sessions,
                        legacy = report.legacy,
                        "sweeper evicted stale clips"
                    );
                }
            }
        }))
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            active_sessions: self.inner.reassembly.session_count(),
            buffered_clips: self.inner.reassembly.buffered_count(),
            legacy_queued: self.inner.legacy.len(),
            pending_commands: self.inner.commands.len(),
            state_subscribers: self.inner.state.state_subscriber_count(),
            command_subscribers: self.inner.state.command_subscriber_count(),
        }
    }
}
