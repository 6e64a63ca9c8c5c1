//! The single error taxonomy used across the whole kernel.
//!
//! Every public entry point validates its arguments before mutating any
//! state and returns `SimError::Validation` on the first violation. The
//! other variants cover the rest of the kernel's failure modes: a
//! preempted resource holder sees `Preemption`, an exhausted `wait_for`
//! sees `ConditionTimeout`, and an operation performed at the wrong
//! lifecycle moment (release without a hold, reentrant `run`) sees
//! `InvalidState`.

use std::fmt;

/// Unified error type for the simulation kernel.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// A caller-supplied value violated a precondition (negative time,
    /// NaN, zero capacity, out-of-range percentile, empty name, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// Delivered into a preempted process at its current yield point.
    /// Always recoverable: the user's own process logic decides what to
    /// do next (typically: request again).
    #[error("resource hold was preempted by a higher-priority request")]
    Preemption,

    /// `wait_for` exhausted its iteration budget without the predicate
    /// ever becoming true.
    #[error("condition wait exceeded its iteration budget")]
    ConditionTimeout,

    /// An operation was attempted at the wrong point in an object's
    /// lifecycle: releasing a resource without holding it, calling
    /// `run` reentrantly, interrupting a process that no longer exists.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A process's own logic failed with an error it did not handle.
    /// The process transitions to `Failed`; the kernel keeps running.
    #[error("process failed: {0}")]
    ProcessFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Clone for SimError {
    fn clone(&self) -> Self {
        match self {
            SimError::Validation(msg) => SimError::Validation(msg.clone()),
            SimError::Preemption => SimError::Preemption,
            SimError::ConditionTimeout => SimError::ConditionTimeout,
            SimError::InvalidState(msg) => SimError::InvalidState(msg.clone()),
            // The boxed source error isn't `Clone`; keep its message only.
            SimError::ProcessFailed(e) => SimError::ProcessFailed(Box::new(ProcessFailure(e.to_string()))),
        }
    }
}

#[derive(Debug)]
struct ProcessFailure(String);

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ProcessFailure {}

pub type SimResult<T> = Result<T, SimError>;

/// Validation helpers shared by every public constructor and entry point.
/// Kept free functions (not methods) so any module can call them without
/// importing a trait.
pub(crate) mod validate {
    use super::{SimError, SimResult};

    pub fn finite_non_negative(name: &str, v: f64) -> SimResult<f64> {
        if !v.is_finite() || v < 0.0 {
            return Err(SimError::Validation(format!(
                "{name} must be a finite, non-negative number, got {v}"
            )));
        }
        Ok(v)
    }

    pub fn strictly_positive(name: &str, v: f64) -> SimResult<f64> {
        if !v.is_finite() || v <= 0.0 {
            return Err(SimError::Validation(format!(
                "{name} must be a finite, strictly positive number, got {v}"
            )));
        }
        Ok(v)
    }

    pub fn capacity_at_least_one(name: &str, v: u32) -> SimResult<u32> {
        if v < 1 {
            return Err(SimError::Validation(format!(
                "{name} must be >= 1, got {v}"
            )));
        }
        Ok(v)
    }

    pub fn percentile(p: f64) -> SimResult<f64> {
        if !(0.0..=100.0).contains(&p) {
            return Err(SimError::Validation(format!(
                "percentile must be in [0, 100], got {p}"
            )));
        }
        Ok(p)
    }

    pub fn bin_count(bins: usize) -> SimResult<usize> {
        if bins < 1 {
            return Err(SimError::Validation(format!(
                "histogram bin count must be >= 1, got {bins}"
            )));
        }
        Ok(bins)
    }

    pub fn nonempty_name(name: &str) -> SimResult<()> {
        if name.is_empty() {
            return Err(SimError::Validation("name must not be empty".into()));
        }
        Ok(())
    }
}
