//! Retry scheduling with exponential backoff.
//!
//! Failed objects wait in a min-heap ordered by due time. Each key keeps its
//! failure count until it succeeds, so repeated failures back off further.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use converge_statedb::{Key, Revision};
use tokio::time::Instant;
use tracing::debug;

/// Stand-in for a deadline past the range of [`Instant`]: thirty years.
pub(crate) const FAR_FUTURE: Duration = Duration::from_secs(946_080_000);

/// `now + delay`, saturating at a far-future instant.
pub(crate) fn deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
}

impl Backoff {
    pub const fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// Delay after the `failures`-th consecutive failure: `min * 2^(failures-1)`,
    /// capped at `max`.
    pub fn duration(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32
            .checked_pow(failures.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.min
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    failures: u32,
    revision: Revision,
    due: Option<Instant>,
    seq: u64,
}

/// Objects waiting to be retried.
#[derive(Debug)]
pub struct RetryQueue {
    backoff: Backoff,
    heap: BinaryHeap<Reverse<(Instant, u64, Key)>>,
    entries: HashMap<Key, Entry>,
    seq: u64,
}

impl RetryQueue {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
            seq: 0,
        }
    }

    /// Record a failure of `key` at `revision` and schedule its retry.
    ///
    /// Returns the backoff applied.
    pub fn fail(&mut self, key: Key, revision: Revision, now: Instant) -> Duration {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;

        let failures = self
            .entries
            .get(&key)
            .map_or(1, |e| e.failures.saturating_add(1));
        let delay = self.backoff.duration(failures);
        let due = deadline(now, delay);

        self.entries.insert(
            key.clone(),
            Entry {
                failures,
                revision,
                due: Some(due),
                seq,
            },
        );
        self.heap.push(Reverse((due, seq, key)));
        delay
    }

    /// Forget the failure history of `key` after a success.
    pub fn succeed(&mut self, key: &Key) {
        if self.entries.remove(key).is_some() {
            debug!(key = %key, "Retry state reset");
        }
    }

    /// Forget `key` entirely, for objects that left the table.
    pub fn forget(&mut self, key: &Key) {
        self.entries.remove(key);
    }

    /// Remove and return up to `limit` keys due at `now`, with the revision
    /// that failed. Keys past the limit stay queued.
    ///
    /// The failure count is kept until [`succeed`](Self::succeed).
    pub fn pop_due(&mut self, now: Instant, limit: usize) -> Vec<(Key, Revision)> {
        let mut due = Vec::new();
        while due.len() < limit {
            let Some(at) = self.next_due() else {
                break;
            };
            if at > now {
                break;
            }
            let Some(Reverse((_, _, key))) = self.heap.pop() else {
                break;
            };
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.due = None;
                due.push((key, entry.revision));
            }
        }
        due
    }

    /// Earliest pending retry.
    ///
    /// Superseded heap entries at the top are dropped on the way.
    pub fn next_due(&mut self) -> Option<Instant> {
        while let Some(Reverse((at, seq, key))) = self.heap.peek() {
            let live = self
                .entries
                .get(key)
                .is_some_and(|e| e.seq == *seq && e.due.is_some());
            if live {
                return Some(*at);
            }
            self.heap.pop();
        }
        None
    }

    /// Whether a retry is due at `now`.
    pub fn has_due(&mut self, now: Instant) -> bool {
        self.next_due().is_some_and(|at| at <= now)
    }

    /// Whether `key` at `revision` is waiting for a scheduled retry.
    pub fn is_waiting(&self, key: &Key, revision: Revision) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| e.due.is_some() && e.revision == revision)
    }

    /// Consecutive failures recorded for `key`.
    pub fn failures(&self, key: &Key) -> u32 {
        self.entries.get(key).map_or(0, |e| e.failures)
    }

    /// Number of keys with failure history.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Heap entries, live or superseded.
    #[cfg(test)]
    fn queued(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use converge_statedb::index;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(100), Duration::from_secs(1))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let b = backoff();
        assert_eq!(b.duration(0), Duration::ZERO);
        assert_eq!(b.duration(1), Duration::from_millis(100));
        assert_eq!(b.duration(2), Duration::from_millis(200));
        assert_eq!(b.duration(3), Duration::from_millis(400));
        assert_eq!(b.duration(5), Duration::from_secs(1));
        assert_eq!(b.duration(64), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_is_monotone() {
        let b = backoff();
        let delays: Vec<Duration> = (1..40).map(|n| b.duration(n)).collect();
        assert!(delays.is_sorted());
    }

    #[test]
    fn test_fail_increases_backoff_until_success() {
        let mut queue = RetryQueue::new(backoff());
        let key = index::uint32(1);
        let now = Instant::now();

        assert_eq!(queue.fail(key.clone(), 1, now), Duration::from_millis(100));
        assert_eq!(queue.fail(key.clone(), 1, now), Duration::from_millis(200));
        assert_eq!(queue.failures(&key), 2);

        queue.succeed(&key);
        assert_eq!(queue.failures(&key), 0);
        assert_eq!(queue.fail(key, 2, now), Duration::from_millis(100));
    }

    #[test]
    fn test_pop_due_respects_time() {
        let mut queue = RetryQueue::new(backoff());
        let now = Instant::now();
        queue.fail(index::uint32(1), 5, now);

        assert!(queue.pop_due(now, usize::MAX).is_empty());
        assert!(queue.is_waiting(&index::uint32(1), 5));
        assert!(!queue.is_waiting(&index::uint32(1), 6));

        let due = queue.pop_due(now + Duration::from_millis(100), usize::MAX);
        assert_eq!(due, vec![(index::uint32(1), 5)]);
        assert!(!queue.is_waiting(&index::uint32(1), 5));
        assert_eq!(queue.next_due(), None);
        // Failure history survives the pop.
        assert_eq!(queue.failures(&index::uint32(1)), 1);
    }

    #[test]
    fn test_refailure_supersedes_heap_entry() {
        let mut queue = RetryQueue::new(backoff());
        let now = Instant::now();
        let key = index::uint32(7);
        queue.fail(key.clone(), 1, now);
        queue.fail(key.clone(), 2, now);

        assert_eq!(queue.next_due(), Some(now + Duration::from_millis(200)));
        let due = queue.pop_due(now + Duration::from_secs(5), usize::MAX);
        assert_eq!(due, vec![(key, 2)]);
    }

    #[test]
    fn test_due_order() {
        let mut queue = RetryQueue::new(backoff());
        let now = Instant::now();
        let slow = index::uint32(1);
        queue.fail(slow.clone(), 1, now);
        queue.fail(slow.clone(), 1, now);
        queue.fail(index::uint32(2), 1, now);

        let due = queue.pop_due(now + Duration::from_secs(1), usize::MAX);
        let keys: Vec<Key> = due.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![index::uint32(2), slow]);
    }

    #[test]
    fn test_forget() {
        let mut queue = RetryQueue::new(backoff());
        queue.fail(index::uint32(1), 1, Instant::now());
        queue.forget(&index::uint32(1));
        assert!(queue.is_empty());
        assert!(queue.pop_due(Instant::now() + Duration::from_secs(5), usize::MAX).is_empty());
    }

    #[test]
    fn test_pop_due_stops_at_limit() {
        let mut queue = RetryQueue::new(backoff());
        let now = Instant::now();
        for id in 1..=4 {
            queue.fail(index::uint32(id), 1, now);
        }

        let later = now + Duration::from_secs(1);
        assert_eq!(queue.pop_due(later, 2).len(), 2);
        assert!(queue.has_due(later));
        assert_eq!(queue.pop_due(later, 2).len(), 2);
        assert!(!queue.has_due(later));
    }

    #[test]
    fn test_next_due_drops_superseded_entries() {
        let mut queue = RetryQueue::new(backoff());
        let now = Instant::now();
        let key = index::uint32(3);
        queue.fail(key.clone(), 1, now);
        queue.fail(key.clone(), 2, now);
        queue.succeed(&key);

        assert_eq!(queue.queued(), 2);
        assert_eq!(queue.next_due(), None);
        assert_eq!(queue.queued(), 0);
    }

    #[test]
    fn test_unbounded_backoff_saturates_deadline() {
        let mut queue = RetryQueue::new(Backoff::new(Duration::MAX, Duration::MAX));
        let now = Instant::now();

        assert_eq!(queue.fail(index::uint32(1), 1, now), Duration::MAX);
        let due = queue.next_due().unwrap();
        assert!(due > now + Duration::from_secs(86_400));
        assert!(queue.pop_due(now, usize::MAX).is_empty());
    }
}
