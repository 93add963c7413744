//! Time-ordered queue of future-dated calls
//!
//! Calls whose send time lies ahead of the clock wait here until a tick
//! reaches them. Calls due at the same time are released in the order they
//! were scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::call::Call;
use super::context::is_latest;

struct ScheduledCall {
    time: i64,
    seq: u64,
    call: Call,
}

impl PartialEq for ScheduledCall {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledCall {}

impl PartialOrd for ScheduledCall {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledCall {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest time, then earliest seq)
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Future-dated call queue
#[derive(Default)]
pub struct CallScheduler {
    heap: BinaryHeap<ScheduledCall>,
    next_seq: u64,
}

impl CallScheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a call until the clock reaches its send time
    pub fn schedule(&mut self, call: Call) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(ScheduledCall {
            time: call.time(),
            seq,
            call,
        });
    }

    /// Remove and return every call due at or before `now`, earliest first
    pub fn release_due(&mut self, now: i64) -> Vec<Call> {
        let mut due = Vec::new();
        while let Some(next) = self.heap.peek() {
            if !is_latest(now, next.time) {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                due.push(entry.call);
            }
        }
        due
    }

    /// Send time of the earliest pending call
    pub fn next_due(&self) -> Option<i64> {
        self.heap.peek().map(|entry| entry.time)
    }

    /// Number of pending calls
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
