/*
 * Copyright © 2024, United States Government, as represented by the Administrator of
 * the National Aeronautics and Space Administration. All rights reserved.
 *
 * The “ODIN” software is licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License. You may obtain a copy
 * of the License at http://www.apache.org/licenses/LICENSE-2.0.
 *
 * Unless required by applicable law or agreed to in writing, software distributed under
 * the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
 * either express or implied. See the License for the specific language governing permissions
 * and limitations under the License.
 */

//! Min-expiry priority structure over `(expiry, value)` pairs with stable
//! indices that survive an in-place reschedule (`update`).
//!
//! Implemented as a slab of slots plus a binary heap of `(expiry, index)`
//! pairs. `update`/`pop` never touch the heap directly (removing an
//! arbitrary element from a binary heap is not cheap); instead they leave a
//! stale heap entry behind and every consumer of the heap validates the
//! popped entry against the slot's *current* expiry, discarding it silently
//! if it no longer matches. This keeps `push`/`update`/`pop` O(log n) and
//! `pop_expired` amortized O(k + log n) for k expired entries, matching the
//! contract in spec §4.1. Bucketing entries by distance-from-now is a valid
//! alternative implementation strategy but is not required for correctness,
//! so it is not done here.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

struct Slot<T> {
    expiry: Instant,
    value: T,
}

#[derive(Eq, PartialEq)]
struct HeapEntry {
    expiry: Instant,
    index: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.expiry.cmp(&other.expiry).then(self.index.cmp(&other.index))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct TimeStore<T> {
    slots: Vec<Option<Slot<T>>>,
    free: Vec<usize>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

impl<T> Default for TimeStore<T> {
    fn default() -> Self { Self::new() }
}

impl<T> TimeStore<T> {
    pub fn new() -> Self {
        TimeStore { slots: Vec::new(), free: Vec::new(), heap: BinaryHeap::new() }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// schedule `value` to expire at `expiry`, returning a stable index.
    pub fn push(&mut self, expiry: Instant, value: T) -> usize {
        let index = match self.free.pop() {
            Some(i) => { self.slots[i] = Some(Slot { expiry, value }); i }
            None => { self.slots.push(Some(Slot { expiry, value })); self.slots.len() - 1 }
        };
        self.heap.push(Reverse(HeapEntry { expiry, index }));
        index
    }

    /// reschedule the entry at `index` in place; the index is unchanged.
    pub fn update(&mut self, index: usize, new_expiry: Instant) {
        if let Some(slot) = self.slots.get_mut(index).and_then(|s| s.as_mut()) {
            slot.expiry = new_expiry;
            self.heap.push(Reverse(HeapEntry { expiry: new_expiry, index }));
        }
    }

    /// cancel the entry at `index`, returning its value if it was still pending.
    pub fn pop(&mut self, index: usize) -> Option<T> {
        let slot = self.slots.get_mut(index)?.take()?;
        self.free.push(index);
        Some(slot.value)
    }

    /// discard stale heap entries (cancelled or superseded by `update`) sitting at the top.
    fn clean_top(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            match self.slots.get(top.index).and_then(|s| s.as_ref()) {
                Some(slot) if slot.expiry == top.expiry => break,
                _ => { self.heap.pop(); }
            }
        }
    }

    pub fn min_expiry(&mut self) -> Option<Instant> {
        self.clean_top();
        self.heap.peek().map(|Reverse(e)| e.expiry)
    }

    /// invoke `fnc(value, expiry, index)` for every entry whose expiry is `<= now`,
    /// in non-decreasing expiry order, and remove them from the store.
    pub fn pop_expired(&mut self, now: Instant, mut fnc: impl FnMut(T, Instant, usize)) {
        loop {
            self.clean_top();
            match self.heap.peek() {
                Some(Reverse(e)) if e.expiry <= now => {
                    let Reverse(entry) = self.heap.pop().unwrap();
                    if let Some(slot) = self.slots[entry.index].take() {
                        self.free.push(entry.index);
                        fnc(slot.value, entry.expiry, entry.index);
                    }
                }
                _ => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn push_pop_expired_runs_in_expiry_order() {
        let base = Instant::now();
        let mut ts: TimeStore<&'static str> = TimeStore::new();
        ts.push(base + Duration::from_millis(30), "c");
        ts.push(base + Duration::from_millis(10), "a");
        ts.push(base + Duration::from_millis(20), "b");

        let mut seen = Vec::new();
        ts.pop_expired(base + Duration::from_millis(25), |v, _, _| seen.push(v));
        assert_eq!(seen, vec!["a", "b"]);
        assert_eq!(ts.len(), 1);
    }

    #[test]
    fn pop_cancels_before_expiry() {
        let base = Instant::now();
        let mut ts: TimeStore<i32> = TimeStore::new();
        let idx = ts.push(base + Duration::from_millis(10), 42);
        assert_eq!(ts.pop(idx), Some(42));
        let mut seen = 0;
        ts.pop_expired(base + Duration::from_secs(1), |_, _, _| seen += 1);
        assert_eq!(seen, 0);
    }

    #[test]
    fn update_reschedules_in_place_and_keeps_index() {
        let base = Instant::now();
        let mut ts: TimeStore<&'static str> = TimeStore::new();
        let idx = ts.push(base + Duration::from_millis(10), "x");
        ts.update(idx, base + Duration::from_millis(100));

        let mut seen = Vec::new();
        ts.pop_expired(base + Duration::from_millis(50), |v, _, _| seen.push(v));
        assert!(seen.is_empty(), "entry rescheduled past the first deadline must not fire early");

        ts.pop_expired(base + Duration::from_millis(150), |v, _, _| seen.push(v));
        assert_eq!(seen, vec!["x"]);
    }

    #[test]
    fn index_is_reused_after_removal() {
        let base = Instant::now();
        let mut ts: TimeStore<i32> = TimeStore::new();
        let idx0 = ts.push(base, 1);
        ts.pop(idx0);
        let idx1 = ts.push(base, 2);
        assert_eq!(idx0, idx1);
    }
}
