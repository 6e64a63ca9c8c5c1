//! The simulation kernel: global clock, event scheduling, the process
//! registry, and the run loop.
//!
//! A `BinaryHeap` of future events is popped one at a time, the clock
//! set to the popped event's time, its callback invoked. Five separate
//! arenas (processes, resources, buffers, stores, sim events) are kept
//! keyed by id, and a process's yielded `WaitToken`/`ProcessAction` is
//! dispatched out to the owning module (`resource.rs`, `buffer.rs`,
//! ...) rather than handled inline here.

use std::collections::HashMap;

use crate::buffer::BufferState;
use crate::error::{validate, SimError, SimResult};
use crate::event::{EventHandle, EventQueue, ScheduledEvent};
use crate::ids::{BufferId, ProcessId, ResourceId, SimEventId, StoreId};
use crate::process::{
    BoxedProcess, ParkedOn, Process, ProcessEntry, ProcessLogic, ProcessOutcome, ProcessState,
    Resume, ResumeValue, WaitToken,
};
use crate::resource::ResourceState;
use crate::simevent::SimEventState;
use crate::store::StoreState;
use crate::time::Time;
use crate::trace::{TraceBus, TraceChannel, TraceEvent, TraceMask};

/// Summary returned by `run()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub end_time: Time,
    pub events_processed: u64,
}

/// Action a process can request that resolves instantly, without ever
/// suspending it: `release`/`trigger`/`reset` are plain method calls on
/// the process's own view, not things it waits on. The kernel performs
/// the mutation and immediately re-drives the same process in the same
/// dispatch step.
pub enum ProcessAction {
    ReleaseResource(ResourceId),
    TriggerEvent { event: SimEventId, value: Option<crate::process::EventPayload> },
    ResetEvent(SimEventId),
}

pub(crate) type Callback = Box<dyn FnOnce(&mut Simulation)>;

/// The kernel. Owns every resource/buffer/store/sim-event/process created
/// against it; none of them outlive the `Simulation` that created them.
pub struct Simulation {
    pub(crate) now: Time,
    pub(crate) queue: EventQueue,
    next_seq: u64,
    pub(crate) processes: HashMap<u64, ProcessEntry>,
    next_process_id: u64,
    pub(crate) resources: HashMap<u64, ResourceState>,
    next_resource_id: u64,
    pub(crate) buffers: HashMap<u64, BufferState>,
    next_buffer_id: u64,
    pub(crate) stores: HashMap<u64, StoreState>,
    next_store_id: u64,
    pub(crate) sim_events: HashMap<u64, SimEventState>,
    next_sim_event_id: u64,
    pub(crate) trace: TraceBus,
    running: bool,
    events_processed: u64,
}

impl Default for Simulation {
    fn default() -> Self {
        Simulation {
            now: 0.0,
            queue: EventQueue::default(),
            next_seq: 0,
            processes: HashMap::new(),
            next_process_id: 0,
            resources: HashMap::new(),
            next_resource_id: 0,
            buffers: HashMap::new(),
            next_buffer_id: 0,
            stores: HashMap::new(),
            next_store_id: 0,
            sim_events: HashMap::new(),
            next_sim_event_id: 0,
            trace: TraceBus::default(),
            running: false,
            events_processed: 0,
        }
    }
}

impl Simulation {
    pub fn new() -> Simulation {
        Simulation::default()
    }

    pub fn now(&self) -> Time {
        self.now
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        let s = self.next_seq;
        self.next_seq += 1;
        s
    }

    pub(crate) fn next_resource_id(&mut self) -> ResourceId {
        let id = self.next_resource_id;
        self.next_resource_id += 1;
        ResourceId(id)
    }

    pub(crate) fn next_buffer_id(&mut self) -> BufferId {
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        BufferId(id)
    }

    pub(crate) fn next_store_id(&mut self) -> StoreId {
        let id = self.next_store_id;
        self.next_store_id += 1;
        StoreId(id)
    }

    pub(crate) fn next_sim_event_id(&mut self) -> SimEventId {
        let id = self.next_sim_event_id;
        self.next_sim_event_id += 1;
        SimEventId(id)
    }

    /// Enqueue `callback` to run at `now + delay`. `delay` must be
    /// finite and non-negative.
    pub fn schedule(
        &mut self,
        delay: Time,
        callback: impl FnOnce(&mut Simulation) + 'static,
    ) -> SimResult<EventHandle> {
        validate::finite_non_negative("delay", delay)?;
        let seq = self.next_seq();
        let time = self.now + delay;
        self.trace.emit(TraceEvent {
            time: self.now,
            channel: TraceChannel::Events,
            op: "enqueue",
            process: None,
            resource: None,
            name: None,
            detail: format!("seq={seq} due={time}"),
        });
        self.queue.push(ScheduledEvent {
            time,
            priority: 0,
            seq,
            callback: Box::new(callback),
        });
        Ok(EventHandle(seq))
    }

    /// Construct and start a process from a coroutine factory. The
    /// factory is invoked once; the returned step function is driven to
    /// its first yield before `process()` returns.
    pub fn process(&mut self, factory: impl FnOnce() -> BoxedProcess) -> Process {
        let id = ProcessId(self.next_process_id);
        self.next_process_id += 1;
        let logic = factory();
        self.processes.insert(
            id.raw(),
            ProcessEntry {
                logic: Some(logic),
                state: ProcessState::Pending,
                pending_interrupt: None,
                last_error: None,
                parked_on: None,
                epoch: 0,
            },
        );
        self.trace.emit(TraceEvent {
            time: self.now,
            channel: TraceChannel::Processes,
            op: "start",
            process: Some(id),
            resource: None,
            name: None,
            detail: String::new(),
        });
        self.drive(id, Resume::Value(ResumeValue::Start));
        Process { id }
    }

    pub fn process_state(&self, process: Process) -> Option<ProcessState> {
        self.processes.get(&process.id.raw()).map(|e| e.state)
    }

    /// Interrupt `process`: arrange for `err` to be thrown into it at its
    /// next resumption. If it is currently parked on a waiter list, it
    /// is atomically removed from that list first. A no-op if the
    /// process has already terminated.
    pub fn interrupt(&mut self, process: Process, err: SimError) -> SimResult<()> {
        let id = process.id;
        let Some(entry) = self.processes.get(&id.raw()) else {
            return Ok(());
        };
        if entry.state.is_terminal() {
            return Ok(());
        }
        let parked_on = entry.parked_on;
        if let Some(entry) = self.processes.get_mut(&id.raw()) {
            entry.pending_interrupt = Some(err);
        }
        match parked_on {
            Some(ParkedOn::Resource(r)) => self.resource_remove_waiter(r, id),
            Some(ParkedOn::BufferPut(b)) => self.buffer_remove_put_waiter(b, id),
            Some(ParkedOn::BufferGet(b)) => self.buffer_remove_get_waiter(b, id),
            Some(ParkedOn::StorePut(s)) => self.store_remove_put_waiter(s, id),
            Some(ParkedOn::StoreGet(s)) => self.store_remove_get_waiter(s, id),
            Some(ParkedOn::Event(e)) => self.event_remove_waiter(e, id),
            None => {}
        }
        // Deliver promptly regardless of what it's parked on: a
        // `Timeout`/`Condition` wait has no waiter-list entry to remove
        // here and would otherwise sit until its own delay elapses. Any
        // continuation that wait already scheduled for itself carries the
        // process's prior epoch and will no-op once `drive` (below) bumps
        // it.
        let seq = self.next_seq();
        self.queue.push(ScheduledEvent {
            time: self.now,
            priority: 0,
            seq,
            callback: Box::new(move |sim| {
                let interrupt = sim
                    .processes
                    .get_mut(&id.raw())
                    .and_then(|e| e.pending_interrupt.take());
                if let Some(err) = interrupt {
                    sim.drive(id, Resume::Interrupt(err));
                }
            }),
        });
        Ok(())
    }

    /// Run until the queue empties, or (if `until` is given) until the
    /// next event's time exceeds it, in which case the clock advances to
    /// `until`. Not reentrant.
    pub fn run(&mut self, until: Option<Time>) -> SimResult<RunSummary> {
        if self.running {
            return Err(SimError::InvalidState("run() is not reentrant".into()));
        }
        if let Some(u) = until {
            validate::finite_non_negative("until", u)?;
        }
        self.running = true;
        let result = self.run_inner(until);
        self.running = false;
        result
    }

    fn run_inner(&mut self, until: Option<Time>) -> SimResult<RunSummary> {
        loop {
            match self.queue.peek_time() {
                Some(t) if until.map_or(true, |u| t <= u) => {
                    let event = self.queue.pop().expect("peeked event must exist");
                    self.now = event.time;
                    self.trace.emit(TraceEvent {
                        time: self.now,
                        channel: TraceChannel::Events,
                        op: "fire",
                        process: None,
                        resource: None,
                        name: None,
                        detail: format!("seq={}", event.seq),
                    });
                    (event.callback)(self);
                    self.events_processed += 1;
                }
                Some(_) => {
                    self.now = until.unwrap();
                    break;
                }
                None => {
                    if let Some(u) = until {
                        self.now = u;
                    }
                    break;
                }
            }
        }
        Ok(RunSummary {
            end_time: self.now,
            events_processed: self.events_processed,
        })
    }

    /// Clear the clock, queue, and every process/resource/buffer/store/
    /// sim-event arena. Instances created against this simulation before
    /// `reset()` become invalid.
    pub fn reset(&mut self) {
        *self = Simulation {
            trace: std::mem::take(&mut self.trace),
            ..Simulation::default()
        };
    }

    pub fn enable_trace(&mut self, mask: TraceMask) {
        self.trace.enable(mask);
    }

    pub fn disable_trace(&mut self) {
        self.trace.disable();
    }

    pub fn is_trace_enabled(&self, channel: TraceChannel) -> bool {
        self.trace.is_enabled(channel)
    }

    pub fn on(&mut self, channel: TraceChannel, handler: impl FnMut(&TraceEvent) + 'static) {
        self.trace.on(channel, Box::new(handler));
    }

    /// Schedule `process_id` to resume at the current virtual time with
    /// `value`, via a fresh-`seq` event (the "Timeout(0)" idiom reused
    /// for every same-instant grant/wakeup in the kernel).
    pub(crate) fn resume_now(&mut self, process_id: ProcessId, value: ResumeValue) {
        self.resume_now_with(process_id, Resume::Value(value));
    }

    /// As `resume_now`, but for delivering an interrupt rather than a
    /// plain resume value.
    pub(crate) fn resume_now_with(&mut self, process_id: ProcessId, input: Resume) {
        let seq = self.next_seq();
        self.queue.push(ScheduledEvent {
            time: self.now,
            priority: 0,
            seq,
            callback: Box::new(move |sim| {
                sim.drive(process_id, input);
            }),
        });
    }

    /// Drive `process_id`'s step function with `input`, looping through
    /// any `ProcessAction`s it yields (those resolve instantly and never
    /// suspend) until it yields a real `WaitToken`, completes, or fails.
    pub(crate) fn drive(&mut self, process_id: ProcessId, input: Resume) {
        let input = self.apply_pending_interrupt(process_id, input);
        let mut logic = match self.processes.get_mut(&process_id.raw()) {
            Some(entry) if entry.logic.is_some() => {
                entry.epoch = entry.epoch.wrapping_add(1);
                entry.logic.take().unwrap()
            }
            _ => return,
        };
        if let Some(entry) = self.processes.get_mut(&process_id.raw()) {
            entry.state = ProcessState::Running;
        }
        if !matches!(input, Resume::Value(ResumeValue::Start)) {
            self.trace.emit(TraceEvent {
                time: self.now,
                channel: TraceChannel::Processes,
                op: "resume",
                process: Some(process_id),
                resource: None,
                name: None,
                detail: String::new(),
            });
        }
        let mut next_input = input;
        loop {
            match logic.resume(next_input) {
                ProcessOutcome::Yield(token) => {
                    self.trace.emit(TraceEvent {
                        time: self.now,
                        channel: TraceChannel::Processes,
                        op: "yield",
                        process: Some(process_id),
                        resource: None,
                        name: None,
                        detail: format!("{token:?}"),
                    });
                    if let Some(entry) = self.processes.get_mut(&process_id.raw()) {
                        entry.logic = Some(logic);
                        entry.state = ProcessState::Suspended;
                    }
                    self.handle_token(process_id, token);
                    return;
                }
                ProcessOutcome::Action(action) => {
                    let result = match action {
                        ProcessAction::ReleaseResource(r) => self.resource_release(process_id, r),
                        ProcessAction::TriggerEvent { event, value } => {
                            self.event_trigger(event, value);
                            Ok(())
                        }
                        ProcessAction::ResetEvent(event) => {
                            self.event_reset(event);
                            Ok(())
                        }
                    };
                    next_input = match result {
                        Ok(()) => Resume::Value(ResumeValue::Ready),
                        Err(e) => Resume::Interrupt(e),
                    };
                }
                ProcessOutcome::Done => {
                    if let Some(entry) = self.processes.get_mut(&process_id.raw()) {
                        entry.state = ProcessState::Completed;
                        entry.parked_on = None;
                    }
                    self.trace.emit(TraceEvent {
                        time: self.now,
                        channel: TraceChannel::Processes,
                        op: "complete",
                        process: Some(process_id),
                        resource: None,
                        name: None,
                        detail: String::new(),
                    });
                    return;
                }
                ProcessOutcome::Failed(err) => {
                    let msg = err.to_string();
                    if let Some(entry) = self.processes.get_mut(&process_id.raw()) {
                        entry.state = ProcessState::Failed;
                        entry.parked_on = None;
                        entry.last_error = Some(err);
                    }
                    self.trace.emit(TraceEvent {
                        time: self.now,
                        channel: TraceChannel::Processes,
                        op: "fail",
                        process: Some(process_id),
                        resource: None,
                        name: None,
                        detail: msg,
                    });
                    return;
                }
            }
        }
    }

    fn apply_pending_interrupt(&mut self, process_id: ProcessId, input: Resume) -> Resume {
        if let Some(entry) = self.processes.get_mut(&process_id.raw()) {
            if let Some(err) = entry.pending_interrupt.take() {
                entry.state = ProcessState::Interrupted;
                return Resume::Interrupt(err);
            }
        }
        input
    }

    fn handle_token(&mut self, process_id: ProcessId, token: WaitToken) {
        match token {
            WaitToken::Timeout(delay) => {
                if let Err(e) = validate::finite_non_negative("timeout delay", delay) {
                    self.set_parked(process_id, None);
                    self.resume_now_with(process_id, Resume::Interrupt(e));
                    return;
                }
                self.set_parked(process_id, None);
                let epoch = self.processes.get(&process_id.raw()).map(|e| e.epoch);
                let _ = self.schedule(delay, move |sim| {
                    if sim.processes.get(&process_id.raw()).map(|e| e.epoch) != epoch {
                        return;
                    }
                    sim.drive(process_id, Resume::Value(ResumeValue::Ready));
                });
            }
            WaitToken::ResourceRequest { resource, priority } => {
                self.set_parked(process_id, Some(ParkedOn::Resource(resource)));
                self.resource_request(process_id, resource, priority);
            }
            WaitToken::BufferPut { buffer, amount } => {
                self.set_parked(process_id, Some(ParkedOn::BufferPut(buffer)));
                self.buffer_put(process_id, buffer, amount);
            }
            WaitToken::BufferGet { buffer, amount } => {
                self.set_parked(process_id, Some(ParkedOn::BufferGet(buffer)));
                self.buffer_get(process_id, buffer, amount);
            }
            WaitToken::StorePut { store, item } => {
                self.set_parked(process_id, Some(ParkedOn::StorePut(store)));
                self.store_put(process_id, store, item);
            }
            WaitToken::StoreGet { store, filter } => {
                self.set_parked(process_id, Some(ParkedOn::StoreGet(store)));
                self.store_get(process_id, store, filter);
            }
            WaitToken::EventWait { event } => {
                self.set_parked(process_id, Some(ParkedOn::Event(event)));
                self.event_wait(process_id, event);
            }
            WaitToken::Condition { predicate, interval, max_iters } => {
                self.set_parked(process_id, None);
                let epoch = self.processes.get(&process_id.raw()).map(|e| e.epoch).unwrap_or(0);
                let _ = self.schedule(interval, move |sim| {
                    sim.check_condition(process_id, predicate, interval, max_iters, epoch);
                });
            }
        }
    }

    fn set_parked(&mut self, process_id: ProcessId, parked_on: Option<ParkedOn>) {
        if let Some(entry) = self.processes.get_mut(&process_id.raw()) {
            entry.parked_on = parked_on;
        }
    }

    fn check_condition(
        &mut self,
        process_id: ProcessId,
        mut predicate: crate::process::ConditionPredicate,
        interval: Time,
        remaining: u32,
        epoch: u64,
    ) {
        if self.processes.get(&process_id.raw()).map(|e| e.epoch) != Some(epoch) {
            return;
        }
        if predicate() {
            self.resume_now(process_id, ResumeValue::Ready);
            return;
        }
        if remaining <= 1 {
            let seq = self.next_seq();
            self.queue.push(ScheduledEvent {
                time: self.now,
                priority: 0,
                seq,
                callback: Box::new(move |sim| {
                    if sim.processes.get(&process_id.raw()).map(|e| e.epoch) != Some(epoch) {
                        return;
                    }
                    sim.drive(process_id, Resume::Interrupt(SimError::ConditionTimeout));
                }),
            });
            return;
        }
        let _ = self.schedule(interval, move |sim| {
            sim.check_condition(process_id, predicate, interval, remaining - 1, epoch);
        });
    }

}
