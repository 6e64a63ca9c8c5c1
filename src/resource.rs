//! Counted `Resource`: an N-slot server with FIFO/LIFO/Priority queue
//! disciplines and optional preemption.
//!
//! Every request either gets a free slot immediately or is queued (or,
//! for a preemptive resource, bumps a lower-priority holder first). The
//! internal `Discipline` strategy covers the ordering of who gets the
//! next freed slot.

use std::collections::VecDeque;

use crate::error::{validate, SimError, SimResult};
use crate::ids::{ProcessId, ResourceId};
use crate::process::{Resume, ResumeValue, WaitToken};
use crate::sim::{ProcessAction, Simulation};
use crate::stats::Statistics;
use crate::time::Time;
use crate::trace::{TraceChannel, TraceEvent};

/// Queue discipline for processes waiting on a saturated resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discipline {
    #[default]
    Fifo,
    Lifo,
    Priority,
}

/// Construction options for a `Resource`.
#[derive(Debug, Clone, Default)]
pub struct ResourceConfig {
    pub name: Option<String>,
    pub preemptive: bool,
    pub discipline: Discipline,
    /// Samples recorded before this much virtual time has passed are
    /// excluded from this resource's own statistics.
    pub warmup: Option<Time>,
}

struct ActiveHold {
    process: ProcessId,
    priority: i32,
    acquired_at: Time,
}

struct QueuedRequest {
    process: ProcessId,
    priority: i32,
    enqueue_time: Time,
}

pub(crate) struct ResourceState {
    capacity: u32,
    active: Vec<ActiveHold>,
    queue: VecDeque<QueuedRequest>,
    discipline: Discipline,
    preemptive: bool,
    name: Option<String>,
    stats: Statistics,
    total_requests: u64,
    total_releases: u64,
    total_preemptions: u64,
}

/// A snapshot of a resource's live statistics.
#[derive(Debug, Clone, Copy)]
pub struct ResourceStats {
    pub total_requests: u64,
    pub total_releases: u64,
    pub total_preemptions: u64,
    pub average_queue_length: f64,
    pub average_in_use: f64,
    pub utilization_rate: f64,
    pub average_wait_time: f64,
    pub in_use: u32,
    pub capacity: u32,
}

/// A lightweight, `Copy` handle to a counted resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resource {
    pub(crate) id: ResourceId,
}

impl Resource {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Build the wait token for requesting a slot at `priority` (lower
    /// number = higher priority).
    pub fn request(&self, priority: i32) -> WaitToken {
        WaitToken::ResourceRequest { resource: self.id, priority }
    }

    /// Build the action releasing a currently-held slot.
    pub fn release(&self) -> ProcessAction {
        ProcessAction::ReleaseResource(self.id)
    }
}

impl Simulation {
    pub fn create_resource(&mut self, capacity: u32, config: ResourceConfig) -> SimResult<Resource> {
        validate::capacity_at_least_one("resource capacity", capacity)?;
        if let Some(name) = &config.name {
            validate::nonempty_name(name)?;
        }
        let mut stats = Statistics::new();
        if let Some(warmup) = config.warmup {
            stats.set_warmup_period(warmup)?;
        }
        let id = self.next_resource_id();
        self.resources.insert(
            id.raw(),
            ResourceState {
                capacity,
                active: Vec::new(),
                queue: VecDeque::new(),
                discipline: config.discipline,
                preemptive: config.preemptive,
                name: config.name,
                stats,
                total_requests: 0,
                total_releases: 0,
                total_preemptions: 0,
            },
        );
        Ok(Resource { id })
    }

    pub fn resource_stats(&self, resource: Resource) -> ResourceStats {
        let r = self.resources.get(&resource.id.raw()).expect("unknown resource");
        let now = self.now;
        let in_use = r.active.len() as u32;
        let average_in_use = r.stats.time_weighted_average(now, "in_use");
        ResourceStats {
            total_requests: r.total_requests,
            total_releases: r.total_releases,
            total_preemptions: r.total_preemptions,
            average_queue_length: r.stats.time_weighted_average(now, "queue_len"),
            average_in_use,
            utilization_rate: if r.capacity == 0 { 0.0 } else { average_in_use / r.capacity as f64 },
            average_wait_time: r.stats.average("wait_time"),
            in_use,
            capacity: r.capacity,
        }
    }

    fn record_resource_levels(&mut self, resource: ResourceId) {
        let now = self.now;
        if let Some(r) = self.resources.get_mut(&resource.raw()) {
            let in_use = r.active.len() as f64;
            let queue_len = r.queue.len() as f64;
            r.stats.record_value(now, "in_use", in_use);
            r.stats.record_value(now, "queue_len", queue_len);
        }
    }

    pub(crate) fn resource_request(&mut self, process_id: ProcessId, resource: ResourceId, priority: i32) {
        let now = self.now;
        let Some(r) = self.resources.get_mut(&resource.raw()) else {
            self.resume_now_with(process_id, crate::process::Resume::Interrupt(SimError::InvalidState(
                "request on unknown resource".into(),
            )));
            return;
        };
        r.total_requests += 1;
        self.trace.emit(TraceEvent {
            time: now,
            channel: TraceChannel::Resources,
            op: "request",
            process: Some(process_id),
            resource: Some(resource),
            name: r.name.clone(),
            detail: format!("priority={priority}"),
        });

        if (self.resources.get(&resource.raw()).unwrap().active.len() as u32)
            < self.resources.get(&resource.raw()).unwrap().capacity
        {
            self.grant_resource(resource, process_id, priority, now, now);
            return;
        }

        // Saturated: try preemption before queueing.
        if self.resources.get(&resource.raw()).unwrap().preemptive {
            if let Some(victim) = self.find_preemption_victim(resource, priority) {
                self.preempt(resource, victim);
                self.grant_resource(resource, process_id, priority, now, now);
                return;
            }
        }

        let r = self.resources.get_mut(&resource.raw()).unwrap();
        match r.discipline {
            Discipline::Fifo => r.queue.push_back(QueuedRequest { process: process_id, priority, enqueue_time: now }),
            Discipline::Lifo => r.queue.push_front(QueuedRequest { process: process_id, priority, enqueue_time: now }),
            Discipline::Priority => {
                let pos = r.queue.iter().position(|q| q.priority > priority).unwrap_or(r.queue.len());
                r.queue.insert(pos, QueuedRequest { process: process_id, priority, enqueue_time: now });
            }
        }
        self.record_resource_levels(resource);
    }

    /// Find the active hold with the highest priority *number* strictly
    /// greater than `priority` (lowest urgency), breaking ties by latest
    /// `acquired_at`.
    fn find_preemption_victim(&self, resource: ResourceId, priority: i32) -> Option<ProcessId> {
        let r = self.resources.get(&resource.raw())?;
        r.active
            .iter()
            .filter(|h| h.priority > priority)
            .max_by(|a, b| a.priority.cmp(&b.priority).then(a.acquired_at.total_cmp(&b.acquired_at)))
            .map(|h| h.process)
    }

    fn preempt(&mut self, resource: ResourceId, victim: ProcessId) {
        let now = self.now;
        if let Some(r) = self.resources.get_mut(&resource.raw()) {
            r.active.retain(|h| h.process != victim);
            r.total_preemptions += 1;
        }
        self.record_resource_levels(resource);
        self.trace.emit(TraceEvent {
            time: now,
            channel: TraceChannel::Resources,
            op: "preempt",
            process: Some(victim),
            resource: Some(resource),
            name: self.resources.get(&resource.raw()).and_then(|r| r.name.clone()),
            detail: String::new(),
        });
        // Deliver at `now` rather than waiting for the victim's own
        // service-duration timeout to fire; that timeout is still
        // scheduled and will notice it's stale (its captured epoch no
        // longer matches) once this drives the process through its epoch.
        self.resume_now_with(victim, Resume::Interrupt(SimError::Preemption));
    }

    fn grant_resource(&mut self, resource: ResourceId, process_id: ProcessId, priority: i32, enqueue_time: Time, now: Time) {
        if let Some(r) = self.resources.get_mut(&resource.raw()) {
            r.active.push(ActiveHold { process: process_id, priority, acquired_at: now });
            r.stats.record_value(now, "wait_time", now - enqueue_time);
        }
        self.record_resource_levels(resource);
        self.trace.emit(TraceEvent {
            time: now,
            channel: TraceChannel::Resources,
            op: "grant",
            process: Some(process_id),
            resource: Some(resource),
            name: self.resources.get(&resource.raw()).and_then(|r| r.name.clone()),
            detail: String::new(),
        });
        if let Some(entry) = self.processes.get_mut(&process_id.raw()) {
            entry.parked_on = None;
        }
        self.resume_now(process_id, ResumeValue::Ready);
    }

    pub(crate) fn resource_release(&mut self, process_id: ProcessId, resource: ResourceId) -> SimResult<()> {
        let now = self.now;
        let Some(r) = self.resources.get_mut(&resource.raw()) else {
            return Err(SimError::InvalidState("release on unknown resource".into()));
        };
        let before = r.active.len();
        r.active.retain(|h| h.process != process_id);
        if r.active.len() == before {
            return Err(SimError::InvalidState(
                "process released a resource it does not hold".into(),
            ));
        }
        r.total_releases += 1;
        self.record_resource_levels(resource);
        self.trace.emit(TraceEvent {
            time: now,
            channel: TraceChannel::Resources,
            op: "release",
            process: Some(process_id),
            resource: Some(resource),
            name: self.resources.get(&resource.raw()).and_then(|r| r.name.clone()),
            detail: String::new(),
        });

        loop {
            let r = self.resources.get(&resource.raw()).unwrap();
            if (r.active.len() as u32) >= r.capacity {
                break;
            }
            let Some(next) = self.resources.get_mut(&resource.raw()).unwrap().queue.pop_front() else {
                break;
            };
            self.grant_resource(resource, next.process, next.priority, next.enqueue_time, now);
        }
        Ok(())
    }

    pub(crate) fn resource_remove_waiter(&mut self, resource: ResourceId, process_id: ProcessId) {
        if let Some(r) = self.resources.get_mut(&resource.raw()) {
            r.queue.retain(|q| q.process != process_id);
        }
        self.record_resource_levels(resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessOutcome, Resume};

    fn server_process(resource: Resource, service: Time, log: std::rc::Rc<std::cell::RefCell<Vec<(Time, &'static str)>>>) -> crate::process::BoxedProcess {
        #[derive(Clone, Copy, PartialEq)]
        enum Step {
            Requesting,
            InService,
            Releasing,
            Done,
        }
        let mut step = Step::Requesting;
        Box::new(move |input: Resume| match (step, input) {
            (Step::Requesting, _) => {
                step = Step::InService;
                ProcessOutcome::Yield(resource.request(0))
            }
            (Step::InService, Resume::Value(_)) => {
                log.borrow_mut().push((0.0, "acquired"));
                step = Step::Releasing;
                ProcessOutcome::Yield(WaitToken::Timeout(service))
            }
            (Step::Releasing, _) => {
                step = Step::Done;
                ProcessOutcome::Action(resource.release())
            }
            (Step::Done, _) => ProcessOutcome::Done,
        })
    }

    #[test]
    fn fifo_single_server_matches_scenario_s1() {
        let mut sim = Simulation::new();
        let resource = sim.create_resource(1, ResourceConfig::default()).unwrap();
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        for arrival in [0.0, 1.0, 2.0] {
            let resource = resource;
            let log = log.clone();
            sim.schedule(arrival, move |sim| {
                sim.process(move || server_process(resource, 5.0, log));
            })
            .unwrap();
        }
        sim.run(None).unwrap();
        let stats = sim.resource_stats(resource);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.total_releases, 3);
    }

    #[test]
    fn queue_non_empty_implies_capacity_saturated() {
        let mut sim = Simulation::new();
        let resource = sim.create_resource(1, ResourceConfig::default()).unwrap();
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        for arrival in [0.0, 0.5] {
            let resource = resource;
            let log = log.clone();
            sim.schedule(arrival, move |sim| {
                sim.process(move || server_process(resource, 10.0, log));
            })
            .unwrap();
        }
        sim.schedule(0.6, move |sim| {
            let stats = sim.resource_stats(resource);
            assert_eq!(stats.in_use, stats.capacity);
        })
        .unwrap();
        sim.run(Some(1.0)).unwrap();
    }
}
