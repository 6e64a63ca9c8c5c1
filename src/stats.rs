//! Statistics subsystem: counters, time-weighted value series, and
//! opt-in sample reservoirs with percentiles and histograms.
//!
//! Every resource/buffer/store keeps its own `Statistics` instance and
//! feeds it from inside the kernel at enqueue/grant/release time; users
//! can also create a standalone `Statistics` for ad-hoc instrumentation
//! of their own process code.

use std::collections::HashMap;

use crate::error::{validate, SimError, SimResult};
use crate::time::Time;

/// A monotonically increasing named counter.
#[derive(Debug, Default, Clone, Copy)]
struct Counter {
    total: u64,
}

/// Running statistics for one named value series: count, sum, sum of
/// squares, min, max, and a time-weighted integral of the series over
/// virtual time.
#[derive(Debug, Clone, Copy)]
struct ValueSeries {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
    integral: f64,
    last_time: Time,
    last_value: f64,
    series_start: Time,
    started: bool,
}

impl Default for ValueSeries {
    fn default() -> Self {
        ValueSeries {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            integral: 0.0,
            last_time: 0.0,
            last_value: 0.0,
            series_start: 0.0,
            started: false,
        }
    }
}

impl ValueSeries {
    fn record(&mut self, now: Time, value: f64) {
        if self.started {
            // Integrate the segment since the previous sample using the
            // *prior* value, then move the cursor to `now`.
            self.integral += self.last_value * (now - self.last_time);
        } else {
            self.series_start = now;
            self.started = true;
        }
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last_time = now;
        self.last_value = value;
    }

    /// Extend the running integral up to `now` without recording a new
    /// sample, so a query between events reflects the current held value.
    fn integral_as_of(&self, now: Time) -> f64 {
        if !self.started {
            return 0.0;
        }
        self.integral + self.last_value * (now - self.last_time)
    }

    fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    fn time_weighted_average(&self, now: Time) -> f64 {
        let span = now - self.series_start;
        if !self.started || span <= 0.0 {
            self.last_value
        } else {
            self.integral_as_of(now) / span
        }
    }
}

/// An opt-in reservoir that stores every sample so percentile, histogram,
/// and standard-deviation queries can be computed on demand. The sorted
/// view is cached and invalidated on the next `push`.
#[derive(Debug, Default)]
struct SampleReservoir {
    samples: Vec<f64>,
    sorted: Option<Vec<f64>>,
}

impl SampleReservoir {
    fn push(&mut self, v: f64) {
        self.samples.push(v);
        self.sorted = None;
    }

    fn sorted_view(&mut self) -> &[f64] {
        if self.sorted.is_none() {
            let mut s = self.samples.clone();
            s.sort_by(f64::total_cmp);
            self.sorted = Some(s);
        }
        self.sorted.as_deref().unwrap()
    }

    fn percentile(&mut self, p: f64) -> SimResult<f64> {
        validate::percentile(p)?;
        let sorted = self.sorted_view();
        if sorted.is_empty() {
            return Err(SimError::Validation("percentile requires at least one sample".into()));
        }
        if sorted.len() == 1 {
            return Ok(sorted[0]);
        }
        let rank = (p / 100.0) * (sorted.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        if lo == hi {
            return Ok(sorted[lo]);
        }
        let frac = rank - lo as f64;
        Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
    }

    fn std_dev(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.samples.iter().sum::<f64>() / n as f64;
        let var = self.samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        var.sqrt()
    }

    fn histogram(&mut self, bins: usize) -> SimResult<Vec<u64>> {
        validate::bin_count(bins)?;
        let sorted = self.sorted_view();
        if sorted.is_empty() {
            return Ok(vec![0; bins]);
        }
        let min = sorted[0];
        let max = *sorted.last().unwrap();
        let mut counts = vec![0u64; bins];
        if (max - min).abs() < f64::EPSILON {
            counts[0] = sorted.len() as u64;
            return Ok(counts);
        }
        let width = (max - min) / bins as f64;
        for &v in sorted {
            let mut idx = ((v - min) / width) as usize;
            if idx >= bins {
                idx = bins - 1;
            }
            counts[idx] += 1;
        }
        Ok(counts)
    }
}

/// A container of named counters, value series, and opt-in sample
/// reservoirs, with a warmup period that excludes early samples from
/// reported statistics.
#[derive(Debug, Default)]
pub struct Statistics {
    counters: HashMap<String, Counter>,
    series: HashMap<String, ValueSeries>,
    reservoirs: HashMap<String, SampleReservoir>,
    warmup: Time,
}

impl Statistics {
    pub fn new() -> Statistics {
        Statistics::default()
    }

    /// Samples and time-weighted integrals recorded before `t` are
    /// excluded from reported statistics. `t` must be >= 0.
    pub fn set_warmup_period(&mut self, t: Time) -> SimResult<()> {
        validate::finite_non_negative("warmup period", t)?;
        self.warmup = t;
        Ok(())
    }

    pub fn increment(&mut self, name: &str, by: u64) {
        self.counters.entry(name.to_string()).or_default().total += by;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).map(|c| c.total).unwrap_or(0)
    }

    pub fn record_value(&mut self, now: Time, name: &str, value: f64) {
        if now < self.warmup {
            return;
        }
        self.series.entry(name.to_string()).or_default().record(now, value);
    }

    /// Enable sample tracking for `name`; subsequent `record_value` calls
    /// for that name also push into the reservoir.
    pub fn enable_sample_tracking(&mut self, name: &str) {
        self.reservoirs.entry(name.to_string()).or_default();
    }

    pub fn record_sample(&mut self, now: Time, name: &str, value: f64) {
        self.record_value(now, name, value);
        if now < self.warmup {
            return;
        }
        if let Some(res) = self.reservoirs.get_mut(name) {
            res.push(value);
        }
    }

    pub fn average(&self, name: &str) -> f64 {
        self.series.get(name).map(|s| s.average()).unwrap_or(0.0)
    }

    pub fn time_weighted_average(&self, now: Time, name: &str) -> f64 {
        self.series
            .get(name)
            .map(|s| s.time_weighted_average(now.max(self.warmup)))
            .unwrap_or(0.0)
    }

    pub fn min(&self, name: &str) -> f64 {
        self.series.get(name).map(|s| s.min).unwrap_or(0.0)
    }

    pub fn max(&self, name: &str) -> f64 {
        self.series.get(name).map(|s| s.max).unwrap_or(0.0)
    }

    pub fn percentile(&mut self, name: &str, p: f64) -> SimResult<f64> {
        let res = self
            .reservoirs
            .get_mut(name)
            .ok_or_else(|| SimError::InvalidState(format!("sample tracking not enabled for {name}")))?;
        res.percentile(p)
    }

    pub fn histogram(&mut self, name: &str, bins: usize) -> SimResult<Vec<u64>> {
        let res = self
            .reservoirs
            .get_mut(name)
            .ok_or_else(|| SimError::InvalidState(format!("sample tracking not enabled for {name}")))?;
        res.histogram(bins)
    }

    pub fn std_dev(&self, name: &str) -> f64 {
        self.reservoirs.get(name).map(|r| r.std_dev()).unwrap_or(0.0)
    }
}
