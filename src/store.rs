//! Typed `Store` (a bounded collection of distinct items with
//! filter-based retrieval).
//!
//! Items are type-erased inside the kernel (`AnyValue = Box<dyn Any +
//! Send>`, per `process.rs`) since `Simulation` is not generic; the
//! public `Store<T>` handle restores the type at the edges via
//! `downcast`. The wait-token vocabulary stays closed and untyped so
//! the kernel's dispatch loop never needs to be generic either.

use std::any::Any;
use std::collections::VecDeque;
use std::marker::PhantomData;

use crate::error::{validate, SimResult};
use crate::ids::{ProcessId, StoreId};
use crate::process::{AnyFilter, AnyValue, ResumeValue, WaitToken};
use crate::sim::Simulation;
use crate::stats::Statistics;
use crate::time::Time;
use crate::trace::{TraceChannel, TraceEvent};

struct PutWaiter {
    process: ProcessId,
    item: AnyValue,
    enqueue_time: Time,
}

struct GetWaiter {
    process: ProcessId,
    filter: Option<AnyFilter>,
    enqueue_time: Time,
}

pub(crate) struct StoreState {
    capacity: u32,
    items: VecDeque<AnyValue>,
    put_queue: VecDeque<PutWaiter>,
    get_queue: VecDeque<GetWaiter>,
    name: Option<String>,
    stats: Statistics,
    total_puts: u64,
    total_gets: u64,
}

/// Construction options for a `Store`.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub name: Option<String>,
    /// Samples recorded before this much virtual time has passed are
    /// excluded from this store's own statistics.
    pub warmup: Option<Time>,
}

/// A snapshot of a store's live statistics.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub total_puts: u64,
    pub total_gets: u64,
    pub average_size: f64,
    pub average_put_wait: f64,
    pub average_get_wait: f64,
}

/// A handle to a bounded, typed item store. `T` only appears in the
/// handle, never in `Simulation`'s own fields, so `Store<T>` is `Copy`
/// regardless of `T`.
pub struct Store<T> {
    pub(crate) id: StoreId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Store<T> {}

impl<T: 'static + Send> Store<T> {
    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn put(&self, item: T) -> WaitToken {
        WaitToken::StorePut { store: self.id, item: Box::new(item) }
    }

    /// Retrieve the first item, with no filter.
    pub fn get(&self) -> WaitToken {
        WaitToken::StoreGet { store: self.id, filter: None }
    }

    /// Retrieve the first item for which `filter` returns `true`.
    pub fn get_matching(&self, filter: impl Fn(&T) -> bool + Send + 'static) -> WaitToken {
        let f: AnyFilter = Box::new(move |any: &dyn Any| {
            filter(any.downcast_ref::<T>().expect("store item type mismatch"))
        });
        WaitToken::StoreGet { store: self.id, filter: Some(f) }
    }

    /// A snapshot of the store's current items, in insertion order.
    pub fn items<'a>(&self, sim: &'a Simulation) -> Vec<&'a T> {
        let s = sim.stores.get(&self.id.raw()).expect("unknown store");
        s.items.iter().map(|v| v.downcast_ref::<T>().expect("store item type mismatch")).collect()
    }
}

impl Simulation {
    pub fn create_store<T: 'static + Send>(&mut self, capacity: u32, config: StoreConfig) -> SimResult<Store<T>> {
        validate::capacity_at_least_one("store capacity", capacity)?;
        if let Some(name) = &config.name {
            validate::nonempty_name(name)?;
        }
        let mut stats = Statistics::new();
        if let Some(warmup) = config.warmup {
            stats.set_warmup_period(warmup)?;
        }
        let id = self.next_store_id();
        self.stores.insert(
            id.raw(),
            StoreState {
                capacity,
                items: VecDeque::new(),
                put_queue: VecDeque::new(),
                get_queue: VecDeque::new(),
                name: config.name,
                stats,
                total_puts: 0,
                total_gets: 0,
            },
        );
        Ok(Store { id, _marker: PhantomData })
    }

    pub fn store_len(&self, id: StoreId) -> usize {
        self.stores.get(&id.raw()).expect("unknown store").items.len()
    }

    pub fn store_stats(&self, id: StoreId) -> StoreStats {
        let s = self.stores.get(&id.raw()).expect("unknown store");
        StoreStats {
            total_puts: s.total_puts,
            total_gets: s.total_gets,
            average_size: s.stats.time_weighted_average(self.now, "size"),
            average_put_wait: s.stats.average("put_wait"),
            average_get_wait: s.stats.average("get_wait"),
        }
    }

    fn record_store_size(&mut self, id: StoreId) {
        let now = self.now;
        if let Some(s) = self.stores.get_mut(&id.raw()) {
            let size = s.items.len() as f64;
            s.stats.record_value(now, "size", size);
        }
    }

    pub(crate) fn store_put(&mut self, process_id: ProcessId, id: StoreId, item: AnyValue) {
        let now = self.now;
        let Some(s) = self.stores.get_mut(&id.raw()) else { return };
        s.total_puts += 1;
        self.trace.emit(TraceEvent {
            time: now,
            channel: TraceChannel::Resources,
            op: "store_put",
            process: Some(process_id),
            resource: None,
            name: s.name.clone(),
            detail: String::new(),
        });

        if (s.items.len() as u32) < s.capacity {
            s.items.push_back(item);
            s.stats.record_value(now, "put_wait", 0.0);
            self.record_store_size(id);
            if let Some(entry) = self.processes.get_mut(&process_id.raw()) {
                entry.parked_on = None;
            }
            self.resume_now(process_id, ResumeValue::Ready);
            self.store_cascade_gets(id);
        } else {
            let s = self.stores.get_mut(&id.raw()).unwrap();
            s.put_queue.push_back(PutWaiter { process: process_id, item, enqueue_time: now });
        }
    }

    pub(crate) fn store_get(&mut self, process_id: ProcessId, id: StoreId, filter: Option<AnyFilter>) {
        let now = self.now;
        let found_index = {
            let Some(s) = self.stores.get(&id.raw()) else { return };
            s.items.iter().position(|item| match &filter {
                Some(f) => f(item.as_ref()),
                None => true,
            })
        };
        match found_index {
            Some(idx) => {
                let s = self.stores.get_mut(&id.raw()).unwrap();
                let item = s.items.remove(idx).unwrap();
                s.total_gets += 1;
                s.stats.record_value(now, "get_wait", 0.0);
                self.record_store_size(id);
                self.trace.emit(TraceEvent {
                    time: now,
                    channel: TraceChannel::Resources,
                    op: "store_get",
                    process: Some(process_id),
                    resource: None,
                    name: self.stores.get(&id.raw()).and_then(|s| s.name.clone()),
                    detail: String::new(),
                });
                if let Some(entry) = self.processes.get_mut(&process_id.raw()) {
                    entry.parked_on = None;
                }
                self.resume_now_with(process_id, crate::process::Resume::Value(ResumeValue::Item(item)));
                self.admit_queued_put(id);
            }
            None => {
                let s = self.stores.get_mut(&id.raw()).unwrap();
                s.total_gets += 1;
                s.get_queue.push_back(GetWaiter { process: process_id, filter, enqueue_time: now });
            }
        }
    }

    /// After a `get` frees a slot, let the oldest queued putter land, if
    /// any room remains.
    fn admit_queued_put(&mut self, id: StoreId) {
        let now = self.now;
        let Some(s) = self.stores.get(&id.raw()) else { return };
        if (s.items.len() as u32) >= s.capacity {
            return;
        }
        let Some(waiter) = self.stores.get_mut(&id.raw()).unwrap().put_queue.pop_front() else { return };
        let s = self.stores.get_mut(&id.raw()).unwrap();
        s.items.push_back(waiter.item);
        s.stats.record_value(now, "put_wait", now - waiter.enqueue_time);
        self.record_store_size(id);
        if let Some(entry) = self.processes.get_mut(&waiter.process.raw()) {
            entry.parked_on = None;
        }
        self.resume_now(waiter.process, ResumeValue::Ready);
        self.store_cascade_gets(id);
    }

    /// Scan the get-queue in enqueue order; grant the first getter whose
    /// filter accepts some present item (earliest matching item first),
    /// then repeat until a full pass finds no match. This keeps fairness
    /// in two senses at once: earlier-waiting getters go first, and each
    /// getter takes its earliest eligible item.
    fn store_cascade_gets(&mut self, id: StoreId) {
        let now = self.now;
        loop {
            let Some(s) = self.stores.get(&id.raw()) else { return };
            let mut grant = None;
            'waiters: for (wpos, waiter) in s.get_queue.iter().enumerate() {
                for (ipos, item) in s.items.iter().enumerate() {
                    let matches = match &waiter.filter {
                        Some(f) => f(item.as_ref()),
                        None => true,
                    };
                    if matches {
                        grant = Some((wpos, ipos));
                        break 'waiters;
                    }
                }
            }
            let Some((wpos, ipos)) = grant else { return };
            let s = self.stores.get_mut(&id.raw()).unwrap();
            let item = s.items.remove(ipos).unwrap();
            let waiter = s.get_queue.remove(wpos).unwrap();
            s.stats.record_value(now, "get_wait", now - waiter.enqueue_time);
            self.record_store_size(id);
            if let Some(entry) = self.processes.get_mut(&waiter.process.raw()) {
                entry.parked_on = None;
            }
            self.resume_now_with(waiter.process, crate::process::Resume::Value(ResumeValue::Item(item)));
            self.admit_queued_put(id);
        }
    }

    pub(crate) fn store_remove_put_waiter(&mut self, id: StoreId, process_id: ProcessId) {
        if let Some(s) = self.stores.get_mut(&id.raw()) {
            s.put_queue.retain(|w| w.process != process_id);
        }
    }

    pub(crate) fn store_remove_get_waiter(&mut self, id: StoreId, process_id: ProcessId) {
        if let Some(s) = self.stores.get_mut(&id.raw()) {
            s.get_queue.retain(|w| w.process != process_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessOutcome;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        kind: &'static str,
    }

    #[test]
    fn filter_fairness_matches_scenario_s4() {
        let mut sim = Simulation::new();
        let store: Store<Item> = sim.create_store(10, StoreConfig::default()).unwrap();
        let resumed_with = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

        let r1 = resumed_with.clone();
        sim.process(move || {
            let mut done = false;
            Box::new(move |input| {
                if done {
                    return ProcessOutcome::Done;
                }
                if let crate::process::Resume::Value(v) = input {
                    if let Some(item) = v.into_typed::<Item>() {
                        r1.borrow_mut().push(("g1", item.kind));
                        done = true;
                        return ProcessOutcome::Done;
                    }
                }
                done = true;
                ProcessOutcome::Yield(store.get_matching(|i: &Item| i.kind == "A"))
            })
        });

        let r2 = resumed_with.clone();
        sim.process(move || {
            let mut done = false;
            Box::new(move |input| {
                if done {
                    return ProcessOutcome::Done;
                }
                if let crate::process::Resume::Value(v) = input {
                    if let Some(item) = v.into_typed::<Item>() {
                        r2.borrow_mut().push(("g2", item.kind));
                        done = true;
                        return ProcessOutcome::Done;
                    }
                }
                done = true;
                ProcessOutcome::Yield(store.get())
            })
        });

        sim.schedule(1.0, move |sim| {
            sim.process(move || {
                let mut done = false;
                Box::new(move |_| {
                    if done {
                        return ProcessOutcome::Done;
                    }
                    done = true;
                    ProcessOutcome::Yield(store.put(Item { kind: "B" }))
                })
            });
        })
        .unwrap();

        sim.schedule(2.0, move |sim| {
            sim.process(move || {
                let mut done = false;
                Box::new(move |_| {
                    if done {
                        return ProcessOutcome::Done;
                    }
                    done = true;
                    ProcessOutcome::Yield(store.put(Item { kind: "A" }))
                })
            });
        })
        .unwrap();

        sim.run(None).unwrap();
        let log = resumed_with.borrow();
        assert_eq!(log.as_slice(), &[("g2", "B"), ("g1", "A")]);
    }
}
