//! Keyed debounce timers over a deadline min-heap.
//!
//! The queue owns no clock: hosts pass `now_ms` in and drain due jobs
//! themselves, which keeps every caller deterministic under test.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

/// Heap entry. Cancelled and superseded entries stay behind and are dropped
/// lazily when they surface, so cancellation is O(1).
#[derive(Debug)]
struct Pending<K> {
    deadline_ms: u64,
    generation: u64,
    key: K,
}

impl<K> Ord for Pending<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap by deadline.
        other
            .deadline_ms
            .cmp(&self.deadline_ms)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl<K> PartialOrd for Pending<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> PartialEq for Pending<K> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ms == other.deadline_ms && self.generation == other.generation
    }
}

impl<K> Eq for Pending<K> {}

#[derive(Debug)]
struct LiveEntry<P> {
    generation: u64,
    deadline_ms: u64,
    payload: P,
}

/// A job whose debounce window elapsed.
#[derive(Debug, Clone, PartialEq)]
pub struct DueJob<K, P> {
    pub key: K,
    pub deadline_ms: u64,
    pub payload: P,
}

/// At-most-one pending job per key.
///
/// `schedule` replaces any pending job for the same key, restarting its
/// window with the new payload; only the most recent input within the window
/// ever fires.
#[derive(Debug)]
pub struct DebounceQueue<K, P> {
    heap: BinaryHeap<Pending<K>>,
    live: HashMap<K, LiveEntry<P>>,
    next_generation: u64,
}

impl<K: Clone + Eq + Hash, P> DebounceQueue<K, P> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Schedule `payload` to fire at `now_ms + delay_ms`, replacing any
    /// pending job for `key`.
    pub fn schedule(&mut self, key: K, now_ms: u64, delay_ms: u64, payload: P) {
        let generation = self.next_generation;
        self.next_generation += 1;
        let deadline_ms = now_ms.saturating_add(delay_ms);
        self.heap.push(Pending {
            deadline_ms,
            generation,
            key: key.clone(),
        });
        self.live.insert(
            key,
            LiveEntry {
                generation,
                deadline_ms,
                payload,
            },
        );
    }

    /// Drop the pending job for `key`. Returns whether one existed.
    pub fn cancel<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.live.remove(key).is_some()
    }

    pub fn is_pending<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.live.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Earliest live deadline, for driving the host's timer.
    pub fn next_deadline(&mut self) -> Option<u64> {
        while let Some(top) = self.heap.peek() {
            if self.is_live(top) {
                return Some(top.deadline_ms);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop every job whose deadline is at or before `now_ms`, in deadline
    /// order.
    pub fn pop_due(&mut self, now_ms: u64) -> Vec<DueJob<K, P>> {
        let mut due = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline_ms > now_ms {
                break;
            }
            let Some(entry) = self.heap.pop() else { break };
            let fired = match self.live.get(&entry.key) {
                Some(live) => live.generation == entry.generation,
                None => false,
            };
            if !fired {
                continue;
            }
            if let Some(live) = self.live.remove(&entry.key) {
                due.push(DueJob {
                    key: entry.key,
                    deadline_ms: live.deadline_ms,
                    payload: live.payload,
                });
            }
        }
        due
    }

    fn is_live(&self, entry: &Pending<K>) -> bool {
        match self.live.get(&entry.key) {
            Some(live) => live.generation == entry.generation,
            None => false,
        }
    }
}

impl<K: Clone + Eq + Hash, P> Default for DebounceQueue<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescheduling_a_key_keeps_only_the_newest_job() {
        let mut queue = DebounceQueue::new();
        queue.schedule("route", 0, 600, 1);
        queue.schedule("route", 100, 600, 2);
        queue.schedule("route", 200, 600, 3);

        assert_eq!(queue.len(), 1);
        assert!(queue.pop_due(700).is_empty());

        let due = queue.pop_due(800);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].payload, 3);
        assert_eq!(due[0].deadline_ms, 800);
        assert!(queue.is_empty());
    }

    #[test]
    fn cancel_prevents_firing() {
        let mut queue = DebounceQueue::new();
        queue.schedule("route", 0, 250, "stale");
        assert!(queue.cancel("route"));
        assert!(!queue.cancel("route"));
        assert!(queue.pop_due(1_000).is_empty());
    }

    #[test]
    fn jobs_fire_in_deadline_order_across_keys() {
        let mut queue = DebounceQueue::new();
        queue.schedule("slow", 0, 900, 'b');
        queue.schedule("fast", 0, 300, 'a');

        let due = queue.pop_due(1_000);
        let payloads: Vec<char> = due.iter().map(|job| job.payload).collect();
        assert_eq!(payloads, vec!['a', 'b']);
    }

    #[test]
    fn next_deadline_skips_superseded_entries() {
        let mut queue = DebounceQueue::new();
        queue.schedule("route", 0, 100, 1);
        queue.schedule("route", 50, 100, 2);

        assert_eq!(queue.next_deadline(), Some(150));
        queue.cancel("route");
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn deadline_boundary_is_inclusive() {
        let mut queue = DebounceQueue::new();
        queue.schedule("route", 0, 600, ());
        assert!(queue.pop_due(599).is_empty());
        assert_eq!(queue.pop_due(600).len(), 1);
    }
}
