use std::collections::VecDeque;

use metrics::counter;
use parking_lot::Mutex;
use tracing::warn;

use crate::Command;

pub const DEFAULT_COMMAND_CAPACITY: usize = 100;

/// Bounded FIFO of operator commands awaiting the main screen's poll.
///
/// When full, the oldest commands are dropped so the newest are always kept.
/// Draining claims the whole batch; there is no acknowledgement.
pub struct CommandRelay {
    queue: Mutex<VecDeque<Command>>,
    capacity: usize,
}

impl Default for CommandRelay {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_COMMAND_CAPACITY)
    }
}

impl CommandRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Appends `command`, returning how many old commands were dropped to make room.
    pub fn enqueue(&self, command: Command) -> usize {
        let mut queue = self.queue.lock();
        queue.push_back(command);
        let mut dropped = 0;
        while queue.len() > self.capacity {
            queue.pop_front();
            dropped += 1;
        }
        drop(queue);

        if dropped > 0 {
            counter!("avatar_relay_commands_dropped_total").increment(dropped as u64);
            warn!(dropped, capacity = self.capacity, "command relay full; dropped oldest");
        }
        dropped
    }

    /// Takes every buffered command in arrival order, leaving the relay empty.
    pub fn drain_all(&self) -> Vec<Command> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
