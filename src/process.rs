//! Process runtime: cooperative "coroutines" driven one step at a time
//! by the kernel.
//!
//! Generators (`#![feature(generators)]`, `yield`-based coroutines) have
//! never stabilized on stable Rust, so a process here compiles to an
//! explicit step function, `FnMut(Resume) -> ProcessOutcome`, driven the
//! same way a generator would be: the kernel's `drive()` call resumes
//! it with either a plain value or a pending interrupt, and the
//! closure's own captured state plays the role of the generator's
//! suspended stack frame. The boxed step-closure lives in the process
//! table keyed by id, yields exactly one token per suspension, and is
//! resumed with whatever value or error corresponds to that token —
//! just spelled as an explicit match over a small state enum instead of
//! `yield`.

use std::any::Any;
use std::fmt;

use crate::error::SimError;
use crate::ids::{BufferId, ProcessId, ResourceId, SimEventId, StoreId};
use crate::time::Time;

/// Type-erased payload carried by items flowing through a `Store`.
/// Store handles downcast it back to the concrete type the user put in.
pub type AnyValue = Box<dyn Any + Send>;

/// Type-erased payload carried by a `SimEvent` trigger. Unlike a
/// `Store` item (owned by exactly one getter), a trigger value is
/// broadcast to every waiter at once, so it is shared via `Arc` rather
/// than moved out of a `Box`.
pub type EventPayload = std::sync::Arc<dyn Any + Send + Sync>;

/// A filter predicate for `Store::get`, type-erased the same way.
pub type AnyFilter = Box<dyn Fn(&dyn Any) -> bool + Send>;

/// A predicate for `wait_for` / `Condition`. Re-evaluated up to
/// `max_iters` times, `interval` time units apart.
pub type ConditionPredicate = Box<dyn FnMut() -> bool + Send>;

/// What a process yields to describe what it is waiting for.
/// Each token is produced and consumed by exactly one process.
pub enum WaitToken {
    /// Resume at `now + due` is filled in by the kernel before the event
    /// is enqueued; the token itself only carries the delay.
    Timeout(Time),
    /// Request a slot on a counted `Resource` at the given priority.
    ResourceRequest { resource: ResourceId, priority: i32 },
    /// Add `amount` to a `Buffer`'s level.
    BufferPut { buffer: BufferId, amount: f64 },
    /// Remove `amount` from a `Buffer`'s level.
    BufferGet { buffer: BufferId, amount: f64 },
    /// Insert `item` into a `Store`.
    StorePut { store: StoreId, item: AnyValue },
    /// Retrieve the first item from a `Store` matching `filter` (or the
    /// first item, if `filter` is absent).
    StoreGet { store: StoreId, filter: Option<AnyFilter> },
    /// Park until `event` is triggered (or resume immediately if it has
    /// already fired).
    EventWait { event: SimEventId },
    /// Re-check `predicate` every `interval` time units, up to
    /// `max_iters` times; fail with `ConditionTimeout` if it never holds.
    Condition {
        predicate: ConditionPredicate,
        interval: Time,
        max_iters: u32,
    },
}

impl fmt::Debug for WaitToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitToken::Timeout(d) => write!(f, "Timeout({d})"),
            WaitToken::ResourceRequest { resource, priority } => {
                write!(f, "ResourceRequest({resource:?}, priority={priority})")
            }
            WaitToken::BufferPut { buffer, amount } => write!(f, "BufferPut({buffer:?}, {amount})"),
            WaitToken::BufferGet { buffer, amount } => write!(f, "BufferGet({buffer:?}, {amount})"),
            WaitToken::StorePut { store, .. } => write!(f, "StorePut({store:?})"),
            WaitToken::StoreGet { store, filter } => {
                write!(f, "StoreGet({store:?}, filtered={})", filter.is_some())
            }
            WaitToken::EventWait { event } => write!(f, "EventWait({event:?})"),
            WaitToken::Condition { max_iters, interval, .. } => {
                write!(f, "Condition(interval={interval}, max_iters={max_iters})")
            }
        }
    }
}

/// The value handed back to a process when it resumes, paired with the
/// token it previously yielded.
pub enum ResumeValue {
    /// The process is being driven for the first time.
    Start,
    /// A plain wake-up with no payload (timeout fired, resource granted,
    /// buffer operation completed, condition became true).
    Ready,
    /// A `StoreGet`/`StorePut` completed; carries the retrieved (or just
    /// inserted) item.
    Item(AnyValue),
    /// A `SimEvent` fired; carries whatever `trigger` passed, if any.
    Event(Option<EventPayload>),
}

impl ResumeValue {
    /// Downcast a `StorePut`/`StoreGet` item to its concrete type. Panics
    /// if the caller guesses the wrong type for the store it is attached
    /// to — a programmer error, not a data error.
    pub fn into_typed<T: 'static>(self) -> Option<T> {
        match self {
            ResumeValue::Item(v) => v.downcast::<T>().ok().map(|b| *b),
            _ => None,
        }
    }

    /// Downcast a `SimEvent`'s broadcast payload. Since the same value is
    /// shared across every waiter, this clones out of the `Arc` rather
    /// than moving it.
    pub fn into_event<T: Clone + 'static>(self) -> Option<T> {
        match self {
            ResumeValue::Event(Some(v)) => v.downcast::<T>().ok().map(|rc| (*rc).clone()),
            _ => None,
        }
    }
}

/// What a process step call delivers into the coroutine: either a normal
/// resume value, or a pending interrupt delivered as a thrown error
/// rather than a plain resume value.
pub enum Resume {
    Value(ResumeValue),
    Interrupt(SimError),
}

/// The outcome of driving a process one step.
pub enum ProcessOutcome {
    /// The process yielded a new token and wants to keep running.
    Yield(WaitToken),
    /// The process asked for an instantaneous action (resource release,
    /// event trigger/reset) that never suspends it; the kernel performs
    /// it and immediately calls `resume` again in the same dispatch step.
    Action(crate::sim::ProcessAction),
    /// The process returned normally.
    Done,
    /// The process's own logic raised an error it did not catch.
    Failed(SimError),
}

/// A process step function: the stable-Rust replacement for a
/// `yield`-based generator.
pub trait ProcessLogic {
    fn resume(&mut self, input: Resume) -> ProcessOutcome;
}

impl<F> ProcessLogic for F
where
    F: FnMut(Resume) -> ProcessOutcome,
{
    fn resume(&mut self, input: Resume) -> ProcessOutcome {
        self(input)
    }
}

pub(crate) type BoxedProcess = Box<dyn ProcessLogic>;

/// Lifecycle state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Pending,
    Running,
    Suspended,
    Completed,
    Interrupted,
    Failed,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessState::Completed | ProcessState::Interrupted | ProcessState::Failed
        )
    }
}

/// A lightweight, `Copy` handle to a process. Cloning a `Process` does
/// not clone the coroutine; it is a reference into the owning
/// `Simulation`'s process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Process {
    pub(crate) id: ProcessId,
}

impl Process {
    pub fn id(&self) -> ProcessId {
        self.id
    }
}

/// Internal bookkeeping the kernel keeps per live process.
pub(crate) struct ProcessEntry {
    pub logic: Option<BoxedProcess>,
    pub state: ProcessState,
    pub pending_interrupt: Option<SimError>,
    pub last_error: Option<SimError>,
    /// The resource/buffer/store/event id(s) this process is currently
    /// parked on, so `interrupt()` can remove it from every waiter list
    /// it might be sitting in before resuming it with the error.
    pub parked_on: Option<ParkedOn>,
    /// Bumped every time the process is actually driven. A `Timeout` or
    /// `Condition` wait captures the epoch current at the moment it
    /// suspends; if the process is resumed early by some other means
    /// (an interrupt, a preemption), its epoch moves on, so the stale
    /// self-rescheduled continuation can recognize it no longer applies
    /// and no-op instead of driving the process a second time.
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ParkedOn {
    Resource(ResourceId),
    BufferPut(BufferId),
    BufferGet(BufferId),
    StorePut(StoreId),
    StoreGet(StoreId),
    Event(SimEventId),
}
