//! Tag-ordered event queue.
//!
//! Events pop in tag order; events scheduled for the same tag pop in the
//! order they were scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::Tag;

/// An event waiting in the queue.
#[derive(Debug)]
pub struct Scheduled<E> {
    pub tag: Tag,
    /// Insertion sequence number, the FIFO tie-breaker.
    pub seq: u64,
    pub event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.seq == other.seq
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    // Reversed so the max-heap yields the earliest tag first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .tag
            .cmp(&self.tag)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue of events ordered by `(tag, insertion order)`.
#[derive(Debug)]
pub struct EventQueue<E> {
    heap: BinaryHeap<Scheduled<E>>,
    next_seq: u64,
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Schedules `event` at `tag`.
    pub fn schedule(&mut self, tag: Tag, event: E) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled { tag, seq, event });
    }

    /// Re-inserts a popped event, keeping its original sequence number.
    pub(crate) fn reschedule(&mut self, scheduled: Scheduled<E>) {
        self.heap.push(scheduled);
    }

    /// Removes and returns the earliest event.
    pub fn pop(&mut self) -> Option<Scheduled<E>> {
        self.heap.pop()
    }

    /// Returns the tag of the earliest event, if any.
    pub fn next_tag(&self) -> Option<Tag> {
        self.heap.peek().map(|s| s.tag)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}
