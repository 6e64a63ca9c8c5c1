//! Continuous `Buffer`: a level in `[0, capacity]` with `put`/`get`
//! amounts that block on insufficient space/level.
//!
//! Follows the same shape as `resource.rs` (FIFO waiter queues,
//! immediate service when there's room, otherwise park and wake on the
//! matching release-like event) generalized from a single discrete unit
//! to a continuous level with two independent FIFO queues that can
//! unblock each other: a `get` that drains the level may free room for
//! a queued `put`, which may in turn free enough level for a further
//! queued `get`.

use std::collections::VecDeque;

use crate::error::{validate, SimError, SimResult};
use crate::ids::{BufferId, ProcessId};
use crate::process::{ResumeValue, WaitToken};
use crate::sim::Simulation;
use crate::stats::Statistics;
use crate::time::Time;
use crate::trace::{TraceChannel, TraceEvent};

/// Construction options for a `Buffer`.
#[derive(Debug, Clone, Default)]
pub struct BufferConfig {
    pub name: Option<String>,
    pub initial_level: f64,
    /// Samples recorded before this much virtual time has passed are
    /// excluded from this buffer's own statistics.
    pub warmup: Option<Time>,
}

struct Waiter {
    process: ProcessId,
    amount: f64,
    enqueue_time: Time,
}

pub(crate) struct BufferState {
    capacity: f64,
    level: f64,
    put_queue: VecDeque<Waiter>,
    get_queue: VecDeque<Waiter>,
    name: Option<String>,
    stats: Statistics,
    total_puts: u64,
    total_gets: u64,
    total_amount_put: f64,
    total_amount_got: f64,
}

/// A snapshot of a buffer's live statistics.
#[derive(Debug, Clone, Copy)]
pub struct BufferStats {
    pub total_puts: u64,
    pub total_gets: u64,
    pub total_amount_put: f64,
    pub total_amount_got: f64,
    pub average_level: f64,
    pub average_put_wait: f64,
    pub average_get_wait: f64,
}

/// A lightweight, `Copy` handle to a continuous buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffer {
    pub(crate) id: BufferId,
}

impl Buffer {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn put(&self, amount: f64) -> WaitToken {
        WaitToken::BufferPut { buffer: self.id, amount }
    }

    pub fn get(&self, amount: f64) -> WaitToken {
        WaitToken::BufferGet { buffer: self.id, amount }
    }
}

impl Simulation {
    pub fn create_buffer(&mut self, capacity: f64, config: BufferConfig) -> SimResult<Buffer> {
        validate::strictly_positive("buffer capacity", capacity)?;
        validate::finite_non_negative("initial level", config.initial_level)?;
        if config.initial_level > capacity {
            return Err(SimError::Validation(format!(
                "initial level {} exceeds capacity {}",
                config.initial_level, capacity
            )));
        }
        if let Some(name) = &config.name {
            validate::nonempty_name(name)?;
        }
        let mut stats = Statistics::new();
        if let Some(warmup) = config.warmup {
            stats.set_warmup_period(warmup)?;
        }
        let id = self.next_buffer_id();
        self.buffers.insert(
            id.raw(),
            BufferState {
                capacity,
                level: config.initial_level,
                put_queue: VecDeque::new(),
                get_queue: VecDeque::new(),
                name: config.name,
                stats,
                total_puts: 0,
                total_gets: 0,
                total_amount_put: 0.0,
                total_amount_got: 0.0,
            },
        );
        Ok(Buffer { id })
    }

    pub fn buffer_level(&self, buffer: Buffer) -> f64 {
        self.buffers.get(&buffer.id.raw()).expect("unknown buffer").level
    }

    pub fn buffer_stats(&self, buffer: Buffer) -> BufferStats {
        let b = self.buffers.get(&buffer.id.raw()).expect("unknown buffer");
        BufferStats {
            total_puts: b.total_puts,
            total_gets: b.total_gets,
            total_amount_put: b.total_amount_put,
            total_amount_got: b.total_amount_got,
            average_level: b.stats.time_weighted_average(self.now, "level"),
            average_put_wait: b.stats.average("put_wait"),
            average_get_wait: b.stats.average("get_wait"),
        }
    }

    fn record_buffer_level(&mut self, id: BufferId) {
        let now = self.now;
        if let Some(b) = self.buffers.get_mut(&id.raw()) {
            let level = b.level;
            b.stats.record_value(now, "level", level);
        }
    }

    pub(crate) fn buffer_put(&mut self, process_id: ProcessId, id: BufferId, amount: f64) {
        let now = self.now;
        if amount <= 0.0 || !amount.is_finite() {
            self.resume_now_with(
                process_id,
                crate::process::Resume::Interrupt(SimError::Validation(format!(
                    "put amount must be finite and > 0, got {amount}"
                ))),
            );
            return;
        }
        let Some(b) = self.buffers.get_mut(&id.raw()) else { return };
        b.total_puts += 1;
        self.trace.emit(TraceEvent {
            time: now,
            channel: TraceChannel::Resources,
            op: "buffer_put",
            process: Some(process_id),
            resource: None,
            name: b.name.clone(),
            detail: format!("amount={amount}"),
        });

        let fits = b.level + amount <= b.capacity;
        if fits {
            b.level += amount;
            b.total_amount_put += amount;
            b.stats.record_value(now, "put_wait", 0.0);
            self.record_buffer_level(id);
            if let Some(entry) = self.processes.get_mut(&process_id.raw()) {
                entry.parked_on = None;
            }
            self.resume_now(process_id, ResumeValue::Ready);
            self.cascade_after_put(id);
        } else {
            b.put_queue.push_back(Waiter { process: process_id, amount, enqueue_time: now });
        }
    }

    pub(crate) fn buffer_get(&mut self, process_id: ProcessId, id: BufferId, amount: f64) {
        let now = self.now;
        if amount <= 0.0 || !amount.is_finite() {
            self.resume_now_with(
                process_id,
                crate::process::Resume::Interrupt(SimError::Validation(format!(
                    "get amount must be finite and > 0, got {amount}"
                ))),
            );
            return;
        }
        let Some(b) = self.buffers.get_mut(&id.raw()) else { return };
        b.total_gets += 1;
        self.trace.emit(TraceEvent {
            time: now,
            channel: TraceChannel::Resources,
            op: "buffer_get",
            process: Some(process_id),
            resource: None,
            name: b.name.clone(),
            detail: format!("amount={amount}"),
        });

        let available = b.level >= amount;
        if available {
            b.level -= amount;
            b.total_amount_got += amount;
            b.stats.record_value(now, "get_wait", 0.0);
            self.record_buffer_level(id);
            if let Some(entry) = self.processes.get_mut(&process_id.raw()) {
                entry.parked_on = None;
            }
            self.resume_now(process_id, ResumeValue::Ready);
            self.cascade_after_get(id);
        } else {
            b.get_queue.push_back(Waiter { process: process_id, amount, enqueue_time: now });
        }
    }

    fn cascade_after_put(&mut self, id: BufferId) {
        loop {
            let now = self.now;
            let Some(b) = self.buffers.get(&id.raw()) else { return };
            let Some(front) = b.get_queue.front() else { return };
            if front.amount > b.level {
                return;
            }
            let waiter = self.buffers.get_mut(&id.raw()).unwrap().get_queue.pop_front().unwrap();
            let b = self.buffers.get_mut(&id.raw()).unwrap();
            b.level -= waiter.amount;
            b.total_amount_got += waiter.amount;
            b.stats.record_value(now, "get_wait", now - waiter.enqueue_time);
            self.record_buffer_level(id);
            if let Some(entry) = self.processes.get_mut(&waiter.process.raw()) {
                entry.parked_on = None;
            }
            self.resume_now(waiter.process, ResumeValue::Ready);
        }
    }

    fn cascade_after_get(&mut self, id: BufferId) {
        loop {
            let now = self.now;
            let Some(b) = self.buffers.get(&id.raw()) else { return };
            let Some(front) = b.put_queue.front() else { return };
            if b.level + front.amount > b.capacity {
                return;
            }
            let waiter = self.buffers.get_mut(&id.raw()).unwrap().put_queue.pop_front().unwrap();
            let b = self.buffers.get_mut(&id.raw()).unwrap();
            b.level += waiter.amount;
            b.total_amount_put += waiter.amount;
            b.stats.record_value(now, "put_wait", now - waiter.enqueue_time);
            self.record_buffer_level(id);
            if let Some(entry) = self.processes.get_mut(&waiter.process.raw()) {
                entry.parked_on = None;
            }
            self.resume_now(waiter.process, ResumeValue::Ready);
            // The newly-landed put may in turn unblock further gets.
            self.cascade_after_put(id);
        }
    }

    pub(crate) fn buffer_remove_put_waiter(&mut self, id: BufferId, process_id: ProcessId) {
        if let Some(b) = self.buffers.get_mut(&id.raw()) {
            b.put_queue.retain(|w| w.process != process_id);
        }
    }

    pub(crate) fn buffer_remove_get_waiter(&mut self, id: BufferId, process_id: ProcessId) {
        if let Some(b) = self.buffers.get_mut(&id.raw()) {
            b.get_queue.retain(|w| w.process != process_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_put_and_get_update_level() {
        let mut sim = Simulation::new();
        let buf = sim.create_buffer(100.0, BufferConfig::default()).unwrap();
        sim.process(move || {
            let mut step = 0;
            Box::new(move |_| {
                step += 1;
                match step {
                    1 => crate::process::ProcessOutcome::Yield(buf.put(10.0)),
                    2 => crate::process::ProcessOutcome::Yield(buf.get(4.0)),
                    _ => crate::process::ProcessOutcome::Done,
                }
            })
        });
        sim.run(None).unwrap();
        assert_eq!(sim.buffer_level(buf), 6.0);
    }

    #[test]
    fn blocked_get_resumes_after_put() {
        let mut sim = Simulation::new();
        let buf = sim.create_buffer(10.0, BufferConfig::default()).unwrap();
        let got = std::rc::Rc::new(std::cell::RefCell::new(false));
        let got2 = got.clone();
        sim.process(move || {
            let mut step = 0;
            Box::new(move |_| {
                step += 1;
                match step {
                    1 => crate::process::ProcessOutcome::Yield(buf.get(5.0)),
                    2 => {
                        *got2.borrow_mut() = true;
                        crate::process::ProcessOutcome::Done
                    }
                    _ => crate::process::ProcessOutcome::Done,
                }
            })
        });
        sim.schedule(1.0, move |sim| {
            sim.process(move || {
                let mut step = 0;
                Box::new(move |_| {
                    step += 1;
                    match step {
                        1 => crate::process::ProcessOutcome::Yield(buf.put(5.0)),
                        _ => crate::process::ProcessOutcome::Done,
                    }
                })
            });
        })
        .unwrap();
        sim.run(None).unwrap();
        assert!(*got.borrow());
    }
}
