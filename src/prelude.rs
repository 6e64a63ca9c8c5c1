//! The simcore prelude.
//!
//! Import everything a typical process author needs with one `use`:
//! ```rust
//! use simcore::prelude::*;
//! ```

pub use crate::{
    timeout, wait_for, Buffer, BufferConfig, BufferStats, Discipline, EventHandle, Process,
    ProcessAction, ProcessOutcome, ProcessState, Resource, ResourceConfig, ResourceStats, Resume,
    ResumeValue, Random, RunSummary, SimError, SimEvent, SimEventConfig, SimResult, Simulation,
    Statistics, Store, StoreConfig, StoreStats, Time, TraceChannel, TraceMask, WaitToken,
};
