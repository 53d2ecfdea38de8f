//! Delayed-action scheduling on virtual time.
//!
//! [`EventQueue`] is a min-heap of events ordered by due time, with a
//! monotonically increasing sequence number as tie-breaker so that events
//! due at the same instant are delivered in the order they were scheduled.
//!
//! There is no cancellation. Every event carries the engine epoch it was
//! scheduled in; the engine bumps its epoch on reset and re-initialization
//! and discards anything older on delivery.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// An event waiting in the queue.
#[derive(Debug, Clone)]
pub struct Scheduled<E> {
    pub time_ms: u64,
    pub sequence: u64,
    pub epoch: u64,
    pub event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.time_ms == other.time_ms && self.sequence == other.sequence
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want min-heap
        other
            .time_ms
            .cmp(&self.time_ms)
            .then(other.sequence.cmp(&self.sequence))
    }
}

/// Time-ordered queue of pending events.
#[derive(Debug)]
pub struct EventQueue<E> {
    heap: BinaryHeap<Scheduled<E>>,
    sequence: u64,
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            sequence: 0,
        }
    }

    /// Schedule `event` at absolute time `time_ms`.
    pub fn schedule_at(&mut self, time_ms: u64, epoch: u64, event: E) {
        self.heap.push(Scheduled {
            time_ms,
            sequence: self.sequence,
            epoch,
            event,
        });
        self.sequence += 1;
    }

    /// Schedule `event` to fire `delay_ms` after `now_ms`, saturating at the
    /// end of time.
    pub fn schedule_after(&mut self, now_ms: u64, delay_ms: u64, epoch: u64, event: E) {
        self.schedule_at(now_ms.saturating_add(delay_ms), epoch, event);
    }

    /// Pop the earliest event if it is due at or before `now_ms`.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<Scheduled<E>> {
        match self.heap.peek() {
            Some(next) if next.time_ms <= now_ms => self.heap.pop(),
            _ => None,
        }
    }

    /// Pop the earliest event regardless of its due time.
    pub fn pop_next(&mut self) -> Option<Scheduled<E>> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}
