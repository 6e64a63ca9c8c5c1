//! A discrete-event simulation kernel for stochastic queueing systems,
//! in the spirit of SimPy.
//!
//! # Simulation
//! A [`Simulation`] owns a virtual clock and a priority queue of future
//! events. Processes are cooperative step functions that run until they
//! need to wait for something, at which point they yield a [`WaitToken`]
//! describing what they're waiting for; the kernel resumes them once
//! that condition is met. [`Simulation::run`] drains the event queue (or
//! stops at a given time); [`Simulation::schedule`] and
//! [`Simulation::process`] are the two ways to put work on the clock.
//!
//! # Process
//! A process is an `FnMut(Resume) -> ProcessOutcome` closure (see the
//! `process` module for why this crate doesn't use generators). Each
//! call either yields a new [`WaitToken`] to keep running, returns
//! [`ProcessOutcome::Done`], or fails with [`ProcessOutcome::Failed`].
//! `Resume` carries either the value the kernel is resuming it with, or
//! an interrupt raised against it from outside.
//!
//! # Resources, buffers, stores, events
//! Four shared-state primitives build on top of the kernel:
//! - [`Resource`] — an N-slot server with FIFO/LIFO/priority queueing
//!   and optional preemption.
//! - [`Buffer`] — a continuous level in `[0, capacity]`.
//! - [`Store<T>`] — a bounded collection of distinct typed items,
//!   retrieved by an optional filter.
//! - [`SimEvent`] — a one-shot broadcast latch, optionally carrying a
//!   payload, that can be reset and fired again.
//!
//! None of these are generic over `Simulation`; they're cheap `Copy`
//! handles (an id plus, for `Store<T>`, a marker) into arenas the
//! `Simulation` itself owns. All mutation goes through `Simulation`'s
//! own methods — there is no `Rc<RefCell<_>>` sharing anywhere in this
//! crate.
//!
//! # Statistics, tracing, randomness
//! [`stats::Statistics`] accumulates counters and time-weighted series
//! and, opt-in, full sample reservoirs. The trace bus is a synchronous
//! pub/sub bus the kernel emits its own internal actions on, and is
//! bridged to the `log` crate independently of whether any handler is
//! registered. [`Random`] wraps a seeded PCG generator for reproducible
//! stochastic models.

mod buffer;
mod error;
mod event;
mod ids;
mod process;
mod resource;
mod rng;
mod sim;
mod simevent;
mod stats;
mod store;
mod time;
mod trace;

pub mod prelude;

pub use buffer::{Buffer, BufferConfig, BufferStats};
pub use error::{SimError, SimResult};
pub use event::EventHandle;
pub use ids::{BufferId, ProcessId, ResourceId, SimEventId, StoreId};
pub use process::{
    ConditionPredicate, EventPayload, Process, ProcessLogic, ProcessOutcome, ProcessState, Resume,
    ResumeValue, WaitToken,
};
pub use resource::{Discipline, Resource, ResourceConfig, ResourceStats};
pub use rng::Random;
pub use sim::{ProcessAction, RunSummary, Simulation};
pub use simevent::{SimEvent, SimEventConfig};
pub use stats::Statistics;
pub use store::{Store, StoreConfig, StoreStats};
pub use time::Time;
pub use trace::{TraceChannel, TraceEvent, TraceMask};

/// Build the token for a plain delay, with no resource involved.
pub fn timeout(delay: Time) -> WaitToken {
    WaitToken::Timeout(delay)
}

/// Build the token for re-checking `predicate` every `interval` time
/// units, up to `max_iters` times, failing with `SimError::ConditionTimeout`
/// if it never becomes true. The first check happens after one
/// `interval` has elapsed, not immediately.
pub fn wait_for(
    predicate: impl FnMut() -> bool + Send + 'static,
    interval: Time,
    max_iters: u32,
) -> WaitToken {
    WaitToken::Condition { predicate: Box::new(predicate), interval, max_iters }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_runs_once_and_advances_clock() {
        let mut sim = Simulation::new();
        sim.process(move || {
            let mut waited = false;
            Box::new(move |_| {
                if waited {
                    return ProcessOutcome::Done;
                }
                waited = true;
                ProcessOutcome::Yield(timeout(5.0))
            })
        });
        let summary = sim.run(None).unwrap();
        assert_eq!(summary.end_time, 5.0);
    }

    #[test]
    fn run_until_a_point_in_time_stops_the_clock_there() {
        let mut sim = Simulation::new();
        sim.schedule(100.0, |_| {}).unwrap();
        let summary = sim.run(Some(10.0)).unwrap();
        assert_eq!(summary.end_time, 10.0);
        assert_eq!(summary.events_processed, 0);
    }
}
