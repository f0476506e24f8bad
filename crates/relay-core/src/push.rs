use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures_core::Stream;
use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::{AppState, Command, StateStore, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    State(AppState),
    Command(Command),
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::State(_) => "state",
            PushEvent::Command(_) => "command",
        }
    }

    /// JSON of the payload alone, without the event envelope.
    pub fn data_json(&self) -> serde_json::Result<String> {
        match self {
            PushEvent::State(state) => serde_json::to_string(state),
            PushEvent::Command(command) => serde_json::to_string(command),
        }
    }
}

/// One push consumer's view of the store: the current state first, then every
/// later state update and command broadcast, in order.
///
/// Events pass through a bounded queue. When the consumer falls behind and the
/// queue is full, new events are dropped (and counted) rather than blocking the
/// publisher. Dropping the feed releases both subscriptions.
pub struct PushFeed {
    rx: mpsc::Receiver<PushEvent>,
    _state: Subscription,
    _commands: Subscription,
}

impl PushFeed {
    pub fn open(store: &StateStore, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let state_tx = tx.clone();
        let state = store.subscribe_state_primed(move |state| {
            forward(&state_tx, PushEvent::State(state));
        });
        let commands = store.subscribe_command(move |command| {
            forward(&tx, PushEvent::Command(command));
        });
        Self {
            rx,
            _state: state,
            _commands: commands,
        }
    }

    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.rx.recv().await
    }

    /// Next queued event without waiting.
    pub fn try_next(&mut self) -> Option<PushEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for PushFeed {
    type Item = PushEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

fn forward(tx: &mpsc::Sender<PushEvent>, event: PushEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            counter!("avatar_relay_push_events_dropped_total", "event" => event.name()).increment(1);
            warn!(event = event.name(), "push consumer lagging; event dropped");
        }
        Err(TrySendError::Closed(_)) => {}
    }
}
