use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Deserializer, Serialize};
use std::{cell::RefCell, collections::VecDeque, sync::Arc};
use tracing::debug;

use crate::{
    subscribers::{Registry, Subscription},
    Command, ScreenMode, UiTarget, VideoControl,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UiVisibility {
    pub comments: bool,
    pub script_panel: bool,
    pub status_bar: bool,
    pub subtitles: bool,
}

impl Default for UiVisibility {
    fn default() -> Self {
        Self {
            comments: true,
            script_panel: false,
            status_bar: true,
            subtitles: true,
        }
    }
}

impl UiVisibility {
    pub fn get(&self, target: UiTarget) -> bool {
        match target {
            UiTarget::Comments => self.comments,
            UiTarget::ScriptPanel => self.script_panel,
            UiTarget::StatusBar => self.status_bar,
            UiTarget::Subtitles => self.subtitles,
        }
    }

    /// Copy of `self` with one flag changed.
    pub fn with(mut self, target: UiTarget, visible: bool) -> Self {
        match target {
            UiTarget::Comments => self.comments = visible,
            UiTarget::ScriptPanel => self.script_panel = visible,
            UiTarget::StatusBar => self.status_bar = visible,
            UiTarget::Subtitles => self.subtitles = visible,
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedComment {
    pub id: String,
    pub name: String,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    pub received_at: u64,
    #[serde(default)]
    pub is_sent: bool,
}

/// Snapshot of the main screen shared by the broadcast screen and the remote panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppState {
    pub has_started: bool,
    pub screen_mode: ScreenMode,
    pub control_video_type: Option<VideoControl>,
    pub integration_enabled: bool,
    pub is_generating: bool,
    pub current_script: Option<String>,
    pub ui_visibility: UiVisibility,
    pub queued_comments: Vec<QueuedComment>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            has_started: false,
            screen_mode: ScreenMode::Standby,
            control_video_type: None,
            integration_enabled: false,
            is_generating: false,
            current_script: None,
            ui_visibility: UiVisibility::default(),
            queued_comments: Vec::new(),
        }
    }
}

/// Partial update merged field by field into [`AppState`].
///
/// `ui_visibility` and `queued_comments` replace the stored value wholesale.
/// Nullable fields use `Some(None)` for an explicit JSON `null` (clear) and
/// `None` for "not present" (leave alone).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_started: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_mode: Option<ScreenMode>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub control_video_type: Option<Option<VideoControl>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_generating: Option<bool>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_script: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_visibility: Option<UiVisibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_comments: Option<Vec<QueuedComment>>,
}

fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl AppStatePatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// The state change a command implies, computed against `current`.
    pub fn for_command(command: &Command, current: &AppState) -> Self {
        match command {
            Command::ModeSelect { mode } => Self {
                screen_mode: Some(*mode),
                has_started: Some(true),
                ..Self::default()
            },
            Command::ControlVideo { action } => Self {
                control_video_type: Some(Some(*action)),
                ..Self::default()
            },
            Command::SendScript { script } => Self {
                current_script: Some(Some(script.clone())),
                ..Self::default()
            },
            Command::ToggleIntegration { enabled } => Self {
                integration_enabled: Some(*enabled),
                ..Self::default()
            },
            Command::SetUiVisibility { target, visible } => Self {
                ui_visibility: Some(current.ui_visibility.with(*target, *visible)),
                ..Self::default()
            },
            Command::SendQueuedComment { comment_id } => {
                if !current.queued_comments.iter().any(|c| &c.id == comment_id) {
                    return Self::default();
                }
                let comments = current
                    .queued_comments
                    .iter()
                    .map(|c| QueuedComment {
                        is_sent: c.is_sent || &c.id == comment_id,
                        ..c.clone()
                    })
                    .collect();
                Self {
                    queued_comments: Some(comments),
                    ..Self::default()
                }
            }
        }
    }
}

impl AppState {
    fn merge(&mut self, patch: AppStatePatch) {
        if let Some(value) = patch.has_started {
            self.has_started = value;
        }
        if let Some(value) = patch.screen_mode {
            self.screen_mode = value;
        }
        if let Some(value) = patch.control_video_type {
            self.control_video_type = value;
        }
        if let Some(value) = patch.integration_enabled {
            self.integration_enabled = value;
        }
        if let Some(value) = patch.is_generating {
            self.is_generating = value;
        }
        if let Some(value) = patch.current_script {
            self.current_script = value;
        }
        if let Some(value) = patch.ui_visibility {
            self.ui_visibility = value;
        }
        if let Some(value) = patch.queued_comments {
            self.queued_comments = value;
        }
    }
}

/// Shared screen state plus the two push channels (state and command).
///
/// Subscribers are notified synchronously on the calling thread after the new
/// state is committed. Notifications from concurrent updates are serialized so
/// every subscriber sees states in commit order.
///
/// A subscriber may call `update` from inside its callback. That nested update
/// commits immediately, but its notification is queued until the outer round
/// has reached every subscriber, so commit order still holds.
pub struct StateStore {
    state: Mutex<AppState>,
    publish: ReentrantMutex<RefCell<PublishQueue>>,
    state_subscribers: Registry<AppState>,
    command_subscribers: Registry<Command>,
}

#[derive(Default)]
struct PublishQueue {
    delivering: bool,
    pending: VecDeque<AppState>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::with_state(AppState::default())
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(initial: AppState) -> Self {
        Self {
            state: Mutex::new(initial),
            publish: ReentrantMutex::new(RefCell::new(PublishQueue::default())),
            state_subscribers: Registry::new("state"),
            command_subscribers: Registry::new("command"),
        }
    }

    /// Independent copy of the current state.
    pub fn get(&self) -> AppState {
        self.state.lock().clone()
    }

    /// Merges `patch` into the current state, notifies state subscribers and
    /// returns the committed state.
    pub fn update(&self, patch: AppStatePatch) -> AppState {
        self.update_with(|_| patch)
    }

    /// Like [`StateStore::update`], but builds the patch from the current state
    /// while holding the lock, so read-modify-write callers cannot race.
    pub fn update_with<F>(&self, build: F) -> AppState
    where
        F: FnOnce(&AppState) -> AppStatePatch,
    {
        let queue = self.publish.lock();
        let snapshot = {
            let mut state = self.state.lock();
            let patch = build(&state);
            state.merge(patch);
            state.clone()
        };
        self.publish_state(&queue, snapshot.clone());
        snapshot
    }

    /// Applies the state transition implied by `command`.
    pub fn apply_command(&self, command: &Command) -> AppState {
        self.update_with(|current| AppStatePatch::for_command(command, current))
    }

    /// Restores the default state and notifies state subscribers.
    pub fn reset(&self) -> AppState {
        let queue = self.publish.lock();
        let snapshot = {
            let mut state = self.state.lock();
            *state = AppState::default();
            state.clone()
        };
        debug!("state reset to defaults");
        self.publish_state(&queue, snapshot.clone());
        snapshot
    }

    /// Delivers `snapshot` to state subscribers, or queues it when this thread
    /// is already delivering an earlier one. Callers hold the publish lock.
    fn publish_state(&self, queue: &RefCell<PublishQueue>, snapshot: AppState) {
        {
            let mut queue = queue.borrow_mut();
            queue.pending.push_back(snapshot);
            if queue.delivering {
                return;
            }
            queue.delivering = true;
        }
        loop {
            let next = queue.borrow_mut().pending.pop_front();
            let Some(state) = next else {
                break;
            };
            let notified = self.state_subscribers.notify(&state);
            debug!(notified, "state published");
        }
        queue.borrow_mut().delivering = false;
    }

    pub fn subscribe_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(AppState) + Send + Sync + 'static,
    {
        self.state_subscribers.subscribe(Arc::new(callback))
    }

    /// Subscribes and immediately hands `callback` the current state. No update
    /// can land between the initial snapshot and the registration. `callback`
    /// must not call back into this store.
    pub(crate) fn subscribe_state_primed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(AppState) + Send + Sync + 'static,
    {
        let _order = self.publish.lock();
        let state = self.state.lock();
        callback(state.clone());
        self.state_subscribers.subscribe(Arc::new(callback))
    }

    /// Pushes `command` to every command subscriber. Returns how many were notified.
    pub fn broadcast_command(&self, command: &Command) -> usize {
        let notified = self.command_subscribers.notify(command);
        debug!(kind = command.kind(), notified, "command broadcast");
        notified
    }

    pub fn subscribe_command<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Command) + Send + Sync + 'static,
    {
        self.command_subscribers.subscribe(Arc::new(callback))
    }

    pub fn state_subscriber_count(&self) -> usize {
        self.state_subscribers.len()
    }

    pub fn command_subscriber_count(&self) -> usize {
        self.command_subscribers.len()
    }
}
