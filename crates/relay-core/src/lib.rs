//! Relay core: in-memory coordination layer for the avatar broadcast rig.
//!
//! Responsibilities:
//! - reassembling out-of-order video clips per generation session
//! - buffering session-less clips for the legacy poll path
//! - relaying operator commands to the main screen (bounded, drop-oldest)
//! - holding the shared screen state and fanning out state/command notifications
//!
//! Every store guards itself with its own lock; [`RelayHub`] owns one instance of
//! each and is the handle passed to request paths.

mod command;
mod hub;
mod legacy;
mod push;
mod reassembly;
mod relay;
mod state;
mod subscribers;

use std::time::{SystemTime, UNIX_EPOCH};

pub use command::{Command, CommandError, ScreenMode, UiTarget, VideoControl};
pub use hub::{
    ClipDelivery, ClipError, ClipPoll, HubConfig, HubStats, PollStatus, RelayHub, SweepReport,
};
pub use legacy::{LegacyBuffer, LegacyEntry};
pub use push::{PushEvent, PushFeed};
pub use reassembly::{Drain, DrainedClip, ReassemblyQueue};
pub use relay::{CommandRelay, DEFAULT_COMMAND_CAPACITY};
pub use state::{AppState, AppStatePatch, QueuedComment, StateStore, UiVisibility};
pub use subscribers::Subscription;

/// Default age after which abandoned sessions and legacy clips are reclaimed.
pub const DEFAULT_CLIP_TTL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
