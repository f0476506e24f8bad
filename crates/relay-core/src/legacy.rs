use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::now_ms;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyEntry {
    pub id: String,
    pub path: String,
    /// Wall-clock arrival in milliseconds since the Unix epoch.
    pub arrived_at_ms: u64,
}

struct StoredEntry {
    entry: LegacyEntry,
    arrived: Instant,
}

#[derive(Default)]
struct LegacyInner {
    entries: VecDeque<StoredEntry>,
    next_id: u64,
}

/// Global insertion-ordered buffer for clips delivered without session fields.
#[derive(Default)]
pub struct LegacyBuffer {
    inner: Mutex<LegacyInner>,
}

impl LegacyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `path` and returns the id it was stored under. Ids come from a
    /// per-buffer counter, so two enqueues in the same millisecond stay distinct.
    pub fn enqueue(&self, path: impl Into<String>) -> String {
        let arrived_at_ms = now_ms();
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = format!("legacy-{arrived_at_ms}-{}", inner.next_id);
        inner.entries.push_back(StoredEntry {
            entry: LegacyEntry {
                id: id.clone(),
                path: path.into(),
                arrived_at_ms,
            },
            arrived: Instant::now(),
        });
        debug!(id = %id, queued = inner.entries.len(), "legacy clip queued");
        id
    }

    /// Removes the oldest entry by insertion order.
    pub fn dequeue_one(&self) -> Option<LegacyEntry> {
        self.inner.lock().entries.pop_front().map(|stored| stored.entry)
    }

    pub fn evict_stale(&self, max_age: Duration) -> usize {
        self.evict_stale_at(Instant::now(), max_age)
    }

    pub(crate) fn evict_stale_at(&self, now: Instant, max_age: Duration) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|stored| now.saturating_duration_since(stored.arrived) <= max_age);
        let evicted = before - inner.entries.len();
        if evicted > 0 {
            info!(evicted, "evicted stale legacy clips");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
