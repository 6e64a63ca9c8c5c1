//! Virtual time.
//!
//! Time never moves backward and is never compared for equality when
//! ordering events — the tie-break is always the `(t, priority, seq)`
//! tuple built in `event.rs`. `f64::total_cmp` gives us a total order
//! even in the presence of NaN, which public entry points reject anyway
//! (see `error::validate`); it's a defensive fallback, not a relied-upon
//! behavior.

/// Virtual simulation time, in abstract time units.
pub type Time = f64;
