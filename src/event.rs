//! The event queue: a binary min-heap keyed by `(t, priority, seq)`.
//! `seq` is assigned by the kernel on insertion and is the sole
//! tie-breaker once `t` and `priority` agree, which is what makes a
//! 0-duration timeout ("resume at the next dispatch cycle, same virtual
//! time") a well-defined concept rather than a race.
//!
//! Times are never compared for equality when ordering events; `seq`
//! is. NaN times are rejected at the public boundary (see
//! `error::validate`) rather than relied upon to compare sanely here.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::sim::Simulation;
use crate::time::Time;

/// Opaque handle to a scheduled event, returned by `Simulation::schedule`
/// for debugging and tracing purposes. There is no cancellation API:
/// cancelled work is handled by the callback checking validity at fire
/// time (see the preemption handling in `resource.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventHandle(pub(crate) u64);

pub(crate) type Callback = Box<dyn FnOnce(&mut Simulation)>;

pub(crate) struct ScheduledEvent {
    pub time: Time,
    pub priority: i32,
    pub seq: u64,
    pub callback: Callback,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Min-heap over `ScheduledEvent`, ordered earliest-first.
#[derive(Default)]
pub(crate) struct EventQueue {
    heap: BinaryHeap<Reverse<ScheduledEvent>>,
}

impl EventQueue {
    pub fn push(&mut self, event: ScheduledEvent) {
        self.heap.push(Reverse(event));
    }

    pub fn pop(&mut self) -> Option<ScheduledEvent> {
        self.heap.pop().map(|Reverse(e)| e)
    }

    pub fn peek_time(&self) -> Option<Time> {
        self.heap.peek().map(|Reverse(e)| e.time)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
