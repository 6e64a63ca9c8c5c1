//! One-shot broadcast `SimEvent`: a latch that wakes every waiter at
//! once, carrying an optional payload, and can be reset back to
//! un-triggered.
//!
//! Unlike a resource slot, which wakes exactly one queued waiter,
//! triggering an event wakes its entire waiter list at once, in the
//! order they started waiting.

use crate::ids::{ProcessId, SimEventId};
use crate::process::{EventPayload, ResumeValue};
use crate::sim::Simulation;
use crate::trace::{TraceChannel, TraceEvent};

pub(crate) struct SimEventState {
    triggered: bool,
    value: Option<EventPayload>,
    waiters: Vec<ProcessId>,
    name: Option<String>,
    total_triggers: u64,
}

/// Construction options for a `SimEvent`.
#[derive(Debug, Clone, Default)]
pub struct SimEventConfig {
    pub name: Option<String>,
}

/// A lightweight, `Copy` handle to a broadcast event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimEvent {
    pub(crate) id: SimEventId,
}

impl SimEvent {
    pub fn id(&self) -> SimEventId {
        self.id
    }

    /// Build the wait token for parking until this event fires (or
    /// resuming immediately if it has already fired and not since been
    /// reset).
    pub fn wait(&self) -> crate::process::WaitToken {
        crate::process::WaitToken::EventWait { event: self.id }
    }

    /// Build the action firing this event with no payload.
    pub fn trigger(&self) -> crate::sim::ProcessAction {
        crate::sim::ProcessAction::TriggerEvent { event: self.id, value: None }
    }

    /// Build the action firing this event, broadcasting `value` to every
    /// current and future (until reset) waiter.
    pub fn trigger_with<T: Send + Sync + 'static>(&self, value: T) -> crate::sim::ProcessAction {
        crate::sim::ProcessAction::TriggerEvent {
            event: self.id,
            value: Some(std::sync::Arc::new(value)),
        }
    }

    /// Build the action resetting this event back to un-triggered.
    pub fn reset(&self) -> crate::sim::ProcessAction {
        crate::sim::ProcessAction::ResetEvent(self.id)
    }
}

impl Simulation {
    pub fn create_sim_event(&mut self, config: SimEventConfig) -> crate::error::SimResult<SimEvent> {
        if let Some(name) = &config.name {
            crate::error::validate::nonempty_name(name)?;
        }
        let id = self.next_sim_event_id();
        self.sim_events.insert(
            id.raw(),
            SimEventState {
                triggered: false,
                value: None,
                waiters: Vec::new(),
                name: config.name,
                total_triggers: 0,
            },
        );
        Ok(SimEvent { id })
    }

    /// Whether the event is currently in the triggered state.
    pub fn event_is_triggered(&self, event: SimEvent) -> bool {
        self.sim_events.get(&event.id.raw()).map(|e| e.triggered).unwrap_or(false)
    }

    pub fn event_trigger_count(&self, event: SimEvent) -> u64 {
        self.sim_events.get(&event.id.raw()).map(|e| e.total_triggers).unwrap_or(0)
    }

    pub(crate) fn event_wait(&mut self, process_id: ProcessId, event: SimEventId) {
        let Some(e) = self.sim_events.get_mut(&event.raw()) else { return };
        if e.triggered {
            let value = e.value.clone();
            if let Some(entry) = self.processes.get_mut(&process_id.raw()) {
                entry.parked_on = None;
            }
            self.resume_now(process_id, ResumeValue::Event(value));
        } else {
            e.waiters.push(process_id);
        }
    }

    pub(crate) fn event_trigger(&mut self, event: SimEventId, value: Option<EventPayload>) {
        let now = self.now;
        let Some(e) = self.sim_events.get_mut(&event.raw()) else { return };
        if e.triggered {
            self.trace.emit(TraceEvent {
                time: now,
                channel: TraceChannel::SimEvents,
                op: "trigger_noop",
                process: None,
                resource: None,
                name: e.name.clone(),
                detail: "already triggered".into(),
            });
            return;
        }
        e.triggered = true;
        e.value = value.clone();
        e.total_triggers += 1;
        let waiters = std::mem::take(&mut e.waiters);
        self.trace.emit(TraceEvent {
            time: now,
            channel: TraceChannel::SimEvents,
            op: "trigger",
            process: None,
            resource: None,
            name: self.sim_events.get(&event.raw()).and_then(|e| e.name.clone()),
            detail: format!("waiters={}", waiters.len()),
        });
        for waiter in waiters {
            if let Some(entry) = self.processes.get_mut(&waiter.raw()) {
                entry.parked_on = None;
            }
            self.resume_now(waiter, ResumeValue::Event(value.clone()));
        }
    }

    pub(crate) fn event_reset(&mut self, event: SimEventId) {
        if let Some(e) = self.sim_events.get_mut(&event.raw()) {
            e.triggered = false;
            e.value = None;
        }
    }

    pub(crate) fn event_remove_waiter(&mut self, event: SimEventId, process_id: ProcessId) {
        if let Some(e) = self.sim_events.get_mut(&event.raw()) {
            e.waiters.retain(|w| *w != process_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessOutcome, Resume};

    #[test]
    fn waiters_all_wake_in_order_with_broadcast_value() {
        let mut sim = Simulation::new();
        let ev = sim.create_sim_event(SimEventConfig::default()).unwrap();
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

        for name in ["a", "b"] {
            let log = log.clone();
            sim.process(move || {
                let mut waiting = true;
                Box::new(move |input| {
                    if waiting {
                        waiting = false;
                        return ProcessOutcome::Yield(ev.wait());
                    }
                    if let Resume::Value(v) = input {
                        if let Some(n) = v.into_event::<i64>() {
                            log.borrow_mut().push((name, n));
                        }
                    }
                    ProcessOutcome::Done
                })
            });
        }

        sim.schedule(1.0, move |sim| {
            sim.process(move || {
                let mut done = false;
                Box::new(move |_| {
                    if done {
                        return ProcessOutcome::Done;
                    }
                    done = true;
                    ProcessOutcome::Action(ev.trigger_with(42i64))
                })
            });
        })
        .unwrap();

        sim.run(None).unwrap();
        assert_eq!(*log.borrow(), vec![("a", 42), ("b", 42)]);
        assert!(sim.event_is_triggered(ev));
        assert_eq!(sim.event_trigger_count(ev), 1);
    }

    #[test]
    fn late_waiter_after_trigger_resumes_immediately() {
        let mut sim = Simulation::new();
        let ev = sim.create_sim_event(SimEventConfig::default()).unwrap();
        sim.process(move || {
            let mut done = false;
            Box::new(move |_| {
                if done {
                    return ProcessOutcome::Done;
                }
                done = true;
                ProcessOutcome::Action(ev.trigger())
            })
        });

        let done = std::rc::Rc::new(std::cell::RefCell::new(false));
        let done2 = done.clone();
        sim.schedule(1.0, move |sim| {
            sim.process(move || {
                let mut waiting = true;
                Box::new(move |_| {
                    if waiting {
                        waiting = false;
                        return ProcessOutcome::Yield(ev.wait());
                    }
                    *done2.borrow_mut() = true;
                    ProcessOutcome::Done
                })
            });
        })
        .unwrap();

        sim.run(None).unwrap();
        assert!(*done.borrow());
    }
}
