//! Keyed store whose entries carry an expiry deadline.
//!
//! Expired entries are invisible to every read (`get`, `contains`, `len`,
//! `iter_recent`) even before they are physically removed. `drain_expired` removes
//! them and hands the values back, so the owner can release whatever they hold.
//!
//! The store is not synchronized; the session registry keeps it behind its mutex.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use crate::clock::Clock;

/// Heap entries superseded by a refresh are skipped lazily; once they outnumber live
/// entries by this much the heap is rebuilt.
const HEAP_SLACK: usize = 32;

struct Slot<V> {
    value: V,
    expires_at: Instant,
    seq: u64,
}

pub struct TimedStore<K, V> {
    clock: Arc<dyn Clock>,
    entries: HashMap<K, Slot<V>>,
    /// Min-heap of (deadline, seq, key). `seq` identifies the store call that pushed
    /// it; only the entry with a matching seq is current.
    deadlines: BinaryHeap<Reverse<(Instant, u64, K)>>,
    next_seq: u64,
}

impl<K, V> TimedStore<K, V>
where
    K: Eq + Hash + Ord + Clone,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: HashMap::new(),
            deadlines: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Insert `key`, or replace its value and deadline. Returns the previous value,
    /// expired or not.
    pub fn store(&mut self, key: K, value: V, expires_at: Instant) -> Option<V> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.deadlines.push(Reverse((expires_at, seq, key.clone())));
        let previous = self.entries.insert(
            key,
            Slot {
                value,
                expires_at,
                seq,
            },
        );
        self.maybe_compact();
        previous.map(|slot| slot.value)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|slot| !is_expired(slot.expires_at, now))
            .map(|slot| &slot.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Deadline of a live entry.
    pub fn expires_at(&self, key: &K) -> Option<Instant> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .map(|slot| slot.expires_at)
            .filter(|&deadline| !is_expired(deadline, now))
    }

    /// Remove `key` whether or not it has expired. Missing keys are ignored.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|slot| slot.value)
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .values()
            .filter(|slot| !is_expired(slot.expires_at, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry and return them, earliest deadline first.
    pub fn drain_expired(&mut self) -> Vec<(K, V)> {
        let now = self.clock.now();
        let mut drained = Vec::new();
        while let Some(Reverse((deadline, _, _))) = self.deadlines.peek() {
            if !is_expired(*deadline, now) {
                break;
            }
            let Some(Reverse((_, seq, key))) = self.deadlines.pop() else {
                break;
            };
            let current = self.entries.get(&key).is_some_and(|slot| slot.seq == seq);
            if current {
                if let Some(slot) = self.entries.remove(&key) {
                    drained.push((key, slot.value));
                }
            }
        }
        drained
    }

    /// Remove every entry, expired or not.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        self.deadlines.clear();
        self.entries
            .drain()
            .map(|(key, slot)| (key, slot.value))
            .collect()
    }

    /// Live entries with their deadlines, most recently stored or refreshed first.
    pub fn iter_recent(&self) -> Vec<(&K, &V, Instant)> {
        let now = self.clock.now();
        let mut live: Vec<(&K, &Slot<V>)> = self
            .entries
            .iter()
            .filter(|(_, slot)| !is_expired(slot.expires_at, now))
            .collect();
        live.sort_by(|a, b| b.1.seq.cmp(&a.1.seq));
        live.into_iter()
            .map(|(key, slot)| (key, &slot.value, slot.expires_at))
            .collect()
    }

    fn maybe_compact(&mut self) {
        if self.deadlines.len() <= 2 * self.entries.len() + HEAP_SLACK {
            return;
        }
        self.deadlines = self
            .entries
            .iter()
            .map(|(key, slot)| Reverse((slot.expires_at, slot.seq, key.clone())))
            .collect();
    }
}

/// An entry is valid up to and including its deadline.
fn is_expired(expires_at: Instant, now: Instant) -> bool {
    now > expires_at
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn store() -> (Arc<ManualClock>, TimedStore<u32, &'static str>) {
        let clock = Arc::new(ManualClock::new());
        let store = TimedStore::new(clock.clone() as Arc<dyn Clock>);
        (clock, store)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn store_and_get() {
        let (_clock, mut store) = store();
        let deadline = store.now() + secs(10);
        assert!(store.store(1, "a", deadline).is_none());
        assert_eq!(store.get(&1), Some(&"a"));
        assert!(store.contains(&1));
        assert_eq!(store.expires_at(&1), Some(deadline));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn store_overwrites_value_and_deadline() {
        let (clock, mut store) = store();
        let now = store.now();
        store.store(1, "a", now + secs(5));
        assert_eq!(store.store(1, "b", now + secs(20)), Some("a"));
        assert_eq!(store.len(), 1);

        clock.advance(secs(10));
        assert_eq!(store.get(&1), Some(&"b"));
    }

    #[test]
    fn expired_entry_reads_as_absent() {
        let (clock, mut store) = store();
        let now = store.now();
        store.store(1, "a", now + secs(5));

        clock.advance(secs(5));
        assert!(store.contains(&1), "deadline itself is still valid");

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.get(&1), None);
        assert!(!store.contains(&1));
        assert_eq!(store.expires_at(&1), None);
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn remove_is_unconditional_and_idempotent() {
        let (clock, mut store) = store();
        let now = store.now();
        store.store(1, "a", now + secs(1));
        clock.advance(secs(2));
        assert_eq!(store.remove(&1), Some("a"));
        assert_eq!(store.remove(&1), None);
        assert_eq!(store.remove(&42), None);
    }

    #[test]
    fn drain_expired_returns_only_expired_entries() {
        let (clock, mut store) = store();
        let now = store.now();
        store.store(1, "short", now + secs(1));
        store.store(2, "long", now + secs(100));
        store.store(3, "mid", now + secs(2));

        clock.advance(secs(3));
        let drained = store.drain_expired();
        assert_eq!(drained, vec![(1, "short"), (3, "mid")]);
        assert_eq!(store.len(), 1);
        assert!(store.drain_expired().is_empty());
    }

    #[test]
    fn refreshed_entry_survives_its_old_deadline() {
        let (clock, mut store) = store();
        let now = store.now();
        store.store(1, "a", now + secs(5));
        store.store(1, "a", now + secs(50));

        clock.advance(secs(10));
        assert!(store.drain_expired().is_empty());
        assert!(store.contains(&1));

        clock.advance(secs(41));
        assert_eq!(store.drain_expired(), vec![(1, "a")]);
    }

    #[test]
    fn removed_then_reinserted_key_drains_once() {
        let (clock, mut store) = store();
        let now = store.now();
        store.store(1, "old", now + secs(1));
        store.remove(&1);
        store.store(1, "new", now + secs(2));

        clock.advance(secs(3));
        assert_eq!(store.drain_expired(), vec![(1, "new")]);
    }

    #[test]
    fn drain_empties_the_store() {
        let (clock, mut store) = store();
        let now = store.now();
        store.store(1, "a", now + secs(1));
        store.store(2, "b", now + secs(10));
        clock.advance(secs(5));

        let mut drained = store.drain();
        drained.sort();
        assert_eq!(drained, vec![(1, "a"), (2, "b")]);
        assert!(store.drain_expired().is_empty());
        assert_eq!(store.remove(&2), None);
    }

    #[test]
    fn iter_recent_orders_by_last_store() {
        let (clock, mut store) = store();
        let now = store.now();
        store.store(1, "a", now + secs(10));
        store.store(2, "b", now + secs(10));
        store.store(3, "c", now + secs(1));
        store.store(1, "a", now + secs(10));

        clock.advance(secs(2));
        let keys: Vec<u32> = store.iter_recent().into_iter().map(|(k, _, _)| *k).collect();
        assert_eq!(keys, vec![1, 2]);
    }

    #[test]
    fn heap_stays_bounded_under_refresh() {
        let (_clock, mut store) = store();
        let now = store.now();
        for i in 0..10_000u64 {
            store.store(7, "x", now + Duration::from_millis(i));
        }
        assert!(store.deadlines.len() <= 2 + HEAP_SLACK + 1);
        assert_eq!(store.len(), 1);
    }
}
