use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, Instant},
};

use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::ClipError;

/// A clip released by [`ReassemblyQueue::drain_next`] in session order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainedClip {
    pub path: String,
    pub sequence: u32,
    /// True when this clip was the last one the session expected. The session
    /// row is gone by the time the caller sees this.
    pub is_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drain {
    Ready(DrainedClip),
    /// The session exists but the clip at its drain pointer has not arrived.
    Pending,
    /// No session with that id: never created, already completed, or evicted.
    NotFound,
}

impl Drain {
    pub fn into_clip(self) -> Option<DrainedClip> {
        match self {
            Drain::Ready(clip) => Some(clip),
            Drain::Pending | Drain::NotFound => None,
        }
    }
}

struct BufferedClip {
    path: String,
    arrived_at: Instant,
}

struct ReassemblySession {
    buffered: BTreeMap<u32, BufferedClip>,
    next_expected: u32,
    total_expected: u32,
    created_at: Instant,
}

impl ReassemblySession {
    fn new(total_expected: u32, now: Instant) -> Self {
        Self {
            buffered: BTreeMap::new(),
            next_expected: 0,
            total_expected,
            created_at: now,
        }
    }
}

/// Per-session out-of-order buffer with a monotonic drain pointer.
#[derive(Default)]
pub struct ReassemblyQueue {
    sessions: Mutex<HashMap<String, ReassemblySession>>,
}

impl ReassemblyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `path` at `sequence`. The first insert for an unseen session fixes
    /// its expected total; later `total_count` values are ignored. A second
    /// delivery for the same sequence replaces the first. Returns false (and
    /// buffers nothing) when the clip can never be drained: a new session with a
    /// zero total, or a sequence at or past the session's fixed total.
    pub fn insert(
        &self,
        session_id: &str,
        sequence: u32,
        path: impl Into<String>,
        total_count: u32,
    ) -> bool {
        self.try_insert(session_id, sequence, path, total_count).is_ok()
    }

    /// Like [`insert`](Self::insert), reporting why a clip was refused.
    /// Range checks use the session's fixed total, not the supplied one.
    pub fn try_insert(
        &self,
        session_id: &str,
        sequence: u32,
        path: impl Into<String>,
        total_count: u32,
    ) -> Result<(), ClipError> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let total = match sessions.get(session_id) {
            Some(session) => {
                if session.total_expected != total_count {
                    debug!(
                        session_id,
                        fixed_total = session.total_expected,
                        supplied_total = total_count,
                        "ignoring total_count on existing session"
                    );
                }
                session.total_expected
            }
            None if total_count == 0 => return Err(ClipError::EmptyTotal),
            None => total_count,
        };
        if sequence >= total {
            debug!(session_id, sequence, total, "clip outside session range");
            return Err(ClipError::SequenceOutOfRange { sequence, total });
        }

        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| ReassemblySession::new(total, now));
        let replaced = session
            .buffered
            .insert(
                sequence,
                BufferedClip {
                    path: path.into(),
                    arrived_at: now,
                },
            )
            .is_some();
        debug!(
            session_id,
            sequence,
            next_expected = session.next_expected,
            buffered = session.buffered.len(),
            replaced,
            "clip buffered"
        );
        Ok(())
    }

    /// Releases the clip at the session's drain pointer if it has arrived.
    /// `Pending` and `NotFound` leave the queue untouched, so polling is safe to
    /// repeat.
    pub fn drain_next(&self, session_id: &str) -> Drain {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return Drain::NotFound;
        };
        let Some(clip) = session.buffered.remove(&session.next_expected) else {
            return Drain::Pending;
        };

        let sequence = session.next_expected;
        session.next_expected += 1;
        let is_complete = session.next_expected >= session.total_expected;
        debug!(
            session_id,
            sequence,
            waited_ms = clip.arrived_at.elapsed().as_millis() as u64,
            is_complete,
            "clip drained"
        );

        if is_complete {
            sessions.remove(session_id);
            info!(session_id, "reassembly session complete");
        }

        Drain::Ready(DrainedClip {
            path: clip.path,
            sequence,
            is_complete,
        })
    }

    /// Drops sessions created more than `max_age` ago. Returns how many went.
    pub fn evict_stale(&self, max_age: Duration) -> usize {
        self.evict_stale_at(Instant::now(), max_age)
    }

    pub(crate) fn evict_stale_at(&self, now: Instant, max_age: Duration) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|session_id, session| {
            let keep = now.saturating_duration_since(session.created_at) <= max_age;
            if !keep {
                info!(
                    session_id = %session_id,
                    next_expected = session.next_expected,
                    total_expected = session.total_expected,
                    buffered = session.buffered.len(),
                    "evicting stale reassembly session"
                );
            }
            keep
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            counter!("avatar_relay_sessions_evicted_total").increment(evicted as u64);
        }
        evicted
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    pub fn next_expected(&self, session_id: &str) -> Option<u32> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|session| session.next_expected)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn buffered_count(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .map(|session| session.buffered.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_path(queue: &ReassemblyQueue, session_id: &str) -> Option<String> {
        queue.drain_next(session_id).into_clip().map(|clip| clip.path)
    }

    #[test_timeout::timeout]
    fn drains_in_sequence_order_regardless_of_arrival() {
        let queue = ReassemblyQueue::new();
        queue.insert("s1", 2, "/clips/2.mp4", 3);
        queue.insert("s1", 0, "/clips/0.mp4", 3);
        queue.insert("s1", 1, "/clips/1.mp4", 3);

        let first = queue.drain_next("s1").into_clip().expect("seq 0 ready");
        assert_eq!(first.sequence, 0);
        assert_eq!(first.path, "/clips/0.mp4");
        assert!(!first.is_complete);

        let second = queue.drain_next("s1").into_clip().expect("seq 1 ready");
        assert_eq!(second.sequence, 1);
        assert!(!second.is_complete);

        let third = queue.drain_next("s1").into_clip().expect("seq 2 ready");
        assert_eq!(third.sequence, 2);
        assert!(third.is_complete);
    }

    #[test_timeout::timeout]
    fn gap_blocks_drain_without_advancing() {
        let queue = ReassemblyQueue::new();
        queue.insert("s1", 1, "/clips/1.mp4", 3);

        for _ in 0..3 {
            assert_eq!(queue.drain_next("s1"), Drain::Pending);
        }
        assert_eq!(queue.next_expected("s1"), Some(0));

        queue.insert("s1", 0, "/clips/0.mp4", 3);
        assert_eq!(drain_path(&queue, "s1").as_deref(), Some("/clips/0.mp4"));
        assert_eq!(drain_path(&queue, "s1").as_deref(), Some("/clips/1.mp4"));
        assert_eq!(queue.drain_next("s1"), Drain::Pending);
    }

    #[test_timeout::timeout]
    fn completed_session_is_removed_and_restarts_fresh() {
        let queue = ReassemblyQueue::new();
        queue.insert("s1", 0, "/a.mp4", 1);
        let clip = queue.drain_next("s1").into_clip().unwrap();
        assert!(clip.is_complete);
        assert!(!queue.contains("s1"));
        assert_eq!(queue.drain_next("s1"), Drain::NotFound);

        queue.insert("s1", 0, "/b.mp4", 2);
        assert_eq!(queue.next_expected("s1"), Some(0));
        let clip = queue.drain_next("s1").into_clip().unwrap();
        assert_eq!(clip.path, "/b.mp4");
        assert!(!clip.is_complete);
    }

    #[test_timeout::timeout]
    fn unknown_session_is_not_found() {
        let queue = ReassemblyQueue::new();
        assert_eq!(queue.drain_next("missing"), Drain::NotFound);
        assert_eq!(queue.session_count(), 0);
    }

    #[test_timeout::timeout]
    fn first_total_count_wins() {
        let queue = ReassemblyQueue::new();
        queue.insert("s1", 0, "/0.mp4", 2);
        queue.insert("s1", 1, "/1.mp4", 5);

        assert!(!queue.drain_next("s1").into_clip().unwrap().is_complete);
        assert!(queue.drain_next("s1").into_clip().unwrap().is_complete);
        assert!(!queue.contains("s1"));
    }

    #[test_timeout::timeout]
    fn range_is_checked_against_fixed_total() {
        let queue = ReassemblyQueue::new();
        assert!(queue.insert("s1", 0, "/0.mp4", 5));
        queue.try_insert("s1", 3, "/3.mp4", 3).unwrap();
        assert_eq!(
            queue.try_insert("s1", 5, "/5.mp4", 9),
            Err(ClipError::SequenceOutOfRange {
                sequence: 5,
                total: 5
            })
        );
        assert_eq!(queue.buffered_count(), 2);
    }

    #[test_timeout::timeout]
    fn refused_clip_creates_no_session() {
        let queue = ReassemblyQueue::new();
        assert_eq!(
            queue.try_insert("s1", 0, "/0.mp4", 0),
            Err(ClipError::EmptyTotal)
        );
        assert!(!queue.insert("s2", 4, "/4.mp4", 4));
        assert_eq!(queue.session_count(), 0);
    }

    #[test_timeout::timeout]
    fn concurrent_inserts_drain_in_order() {
        let queue = std::sync::Arc::new(ReassemblyQueue::new());
        let total = 64u32;
        let workers: Vec<_> = (0..4u32)
            .map(|worker| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for sequence in (worker..total).step_by(4).rev() {
                        assert!(queue.insert("s1", sequence, format!("/{sequence}.mp4"), total));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(queue.buffered_count(), total as usize);
        for expected in 0..total {
            let clip = queue.drain_next("s1").into_clip().unwrap();
            assert_eq!(clip.sequence, expected);
            assert_eq!(clip.path, format!("/{expected}.mp4"));
            assert_eq!(clip.is_complete, expected + 1 == total);
        }
        assert_eq!(queue.drain_next("s1"), Drain::NotFound);
    }

    #[test_timeout::timeout]
    fn duplicate_delivery_overwrites() {
        let queue = ReassemblyQueue::new();
        queue.insert("s1", 0, "/first.mp4", 2);
        queue.insert("s1", 0, "/second.mp4", 2);
        assert_eq!(queue.buffered_count(), 1);
        assert_eq!(drain_path(&queue, "s1").as_deref(), Some("/second.mp4"));
    }

    #[test_timeout::timeout]
    fn sessions_are_independent() {
        let queue = ReassemblyQueue::new();
        queue.insert("a", 0, "/a0.mp4", 2);
        queue.insert("b", 1, "/b1.mp4", 2);

        assert_eq!(drain_path(&queue, "a").as_deref(), Some("/a0.mp4"));
        assert_eq!(queue.drain_next("b"), Drain::Pending);
        assert_eq!(queue.session_count(), 2);
    }

    #[test_timeout::timeout]
    fn evicts_only_sessions_past_max_age() {
        let queue = ReassemblyQueue::new();
        queue.insert("old", 1, "/old.mp4", 3);
        let max_age = Duration::from_secs(3600);

        assert_eq!(queue.evict_stale_at(Instant::now(), max_age), 0);
        assert!(queue.contains("old"));

        let later = Instant::now() + Duration::from_secs(3601);
        assert_eq!(queue.evict_stale_at(later, max_age), 1);
        assert_eq!(queue.drain_next("old"), Drain::NotFound);
    }
}
