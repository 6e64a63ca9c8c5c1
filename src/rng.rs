//! Seeded random stream for stochastic models.
//!
//! `Random` wraps a PCG-class generator (`rand_pcg::Pcg64Mcg`) seeded by a
//! plain integer so that two `Random::new(seed)` instances driven through
//! the same call sequence produce byte-identical output. Processes that
//! only ever consult their own `Random` (never the host's thread-local
//! RNG) replay exactly, which is what makes a run reproducible.

use rand::{Rng as _, SeedableRng};
use rand_distr::{Distribution, Normal, Poisson};
use rand_pcg::Pcg64Mcg;

use crate::error::{validate, SimError, SimResult};

/// A reproducible source of random variates for process authors.
///
/// Construct one per simulation run (or one per process, if you want
/// independent streams) and pass it into your process closures; never
/// reach for `rand::thread_rng()` inside a process body, or two runs with
/// the same seed will diverge.
pub struct Random {
    rng: Pcg64Mcg,
}

impl Random {
    /// Seed a new stream. `seed` is interpreted as an unsigned 64-bit
    /// value; the spec allows any non-negative integer up to 2^32-1, a
    /// subset of what's accepted here.
    pub fn new(seed: u64) -> Random {
        Random {
            rng: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Uniform real in `[a, b)`.
    pub fn uniform(&mut self, a: f64, b: f64) -> SimResult<f64> {
        validate::finite_non_negative("uniform range width", b - a)?;
        if b <= a {
            return Err(SimError::Validation(format!(
                "uniform bounds must satisfy a < b, got a={a}, b={b}"
            )));
        }
        Ok(self.rng.gen_range(a..b))
    }

    /// Uniform integer in `[a, b]` inclusive. Non-integer bounds are
    /// coerced: `a` is rounded up, `b` is rounded down.
    pub fn randint(&mut self, a: f64, b: f64) -> SimResult<i64> {
        let lo = a.ceil() as i64;
        let hi = b.floor() as i64;
        if hi < lo {
            return Err(SimError::Validation(format!(
                "randint range is empty after coercion: [{lo}, {hi}]"
            )));
        }
        Ok(self.rng.gen_range(lo..=hi))
    }

    /// Exponential variate with the given rate (`rate > 0`).
    pub fn exponential(&mut self, rate: f64) -> SimResult<f64> {
        validate::strictly_positive("rate", rate)?;
        // Inverse-CDF sampling keeps this independent of rand_distr's
        // internal call count, which matters for reproducibility across
        // library versions.
        let u: f64 = self.rng.gen_range(0.0..1.0_f64);
        Ok(-u.ln() / rate)
    }

    /// Normal (Gaussian) variate via Box-Muller. `stddev = 0` returns
    /// `mean` with no further sampling.
    pub fn normal(&mut self, mean: f64, stddev: f64) -> SimResult<f64> {
        if stddev < 0.0 || !stddev.is_finite() {
            return Err(SimError::Validation(format!(
                "stddev must be finite and >= 0, got {stddev}"
            )));
        }
        if stddev == 0.0 {
            return Ok(mean);
        }
        let normal = Normal::new(mean, stddev)
            .map_err(|e| SimError::Validation(format!("invalid normal distribution: {e}")))?;
        Ok(normal.sample(&mut self.rng))
    }

    /// Triangular variate on `[low, high]` with the given `mode`, where
    /// `low <= mode <= high`.
    pub fn triangular(&mut self, low: f64, high: f64, mode: f64) -> SimResult<f64> {
        if !(low <= mode && mode <= high) {
            return Err(SimError::Validation(format!(
                "triangular requires low <= mode <= high, got low={low}, mode={mode}, high={high}"
            )));
        }
        if low == high {
            return Ok(low);
        }
        let u: f64 = self.rng.gen_range(0.0..1.0_f64);
        let fc = (mode - low) / (high - low);
        let sample = if u < fc {
            low + ((high - low) * (mode - low) * u).sqrt()
        } else {
            high - ((high - low) * (high - mode) * (1.0 - u)).sqrt()
        };
        Ok(sample)
    }

    /// Poisson-distributed count with mean `lambda` (`lambda > 0`).
    pub fn poisson(&mut self, lambda: f64) -> SimResult<u64> {
        validate::strictly_positive("lambda", lambda)?;
        let poisson = Poisson::new(lambda)
            .map_err(|e| SimError::Validation(format!("invalid poisson distribution: {e}")))?;
        Ok(poisson.sample(&mut self.rng) as u64)
    }

    /// Pick a uniformly random element from a non-empty slice.
    pub fn choice<'a, T>(&mut self, xs: &'a [T]) -> SimResult<&'a T> {
        if xs.is_empty() {
            return Err(SimError::Validation("choice requires a non-empty slice".into()));
        }
        let idx = self.rng.gen_range(0..xs.len());
        Ok(&xs[idx])
    }
}
