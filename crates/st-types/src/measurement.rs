//! Measurements reported back by the driver after a trial has run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metric tag used when nothing else is configured.
pub const PERF_THROUGHPUT: &str = "perf_throughput";

/// Read-only metric lookup over one trial's measurement.
pub trait MetricSource {
    /// Numeric value for `tag`, or `None` when the metric is missing or
    /// could not be collected.
    fn metric(&self, tag: &str) -> Option<f64>;
}

/// Metrics collected for one trial, keyed by metric tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub metrics: HashMap<String, f64>,
}

impl Measurement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metric(mut self, tag: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(tag.into(), value);
        self
    }

    /// Convenience for the common single-throughput case.
    pub fn throughput(value: f64) -> Self {
        Self::new().with_metric(PERF_THROUGHPUT, value)
    }
}

impl MetricSource for Measurement {
    fn metric(&self, tag: &str) -> Option<f64> {
        self.metrics.get(tag).copied().filter(|v| v.is_finite())
    }
}

/// Best numeric value of `tag` across a batch of measurements.
///
/// Absent measurements and non-numeric metrics are skipped; `None` means
/// nothing in the batch was usable.
pub fn best_metric<M: MetricSource>(measurements: &[Option<M>], tag: &str) -> Option<f64> {
    measurements
        .iter()
        .flatten()
        .filter_map(|m| m.metric(tag))
        .fold(None, |best, v| match best {
            Some(b) if b >= v => Some(b),
            _ => Some(v),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_nan_metrics_are_absent() {
        let m = Measurement::new().with_metric("latency_p99", 12.0);
        assert_eq!(m.metric(PERF_THROUGHPUT), None);
        let nan = Measurement::throughput(f64::NAN);
        assert_eq!(nan.metric(PERF_THROUGHPUT), None);
    }

    #[test]
    fn best_metric_skips_erroneous_entries() {
        let batch = vec![
            Some(Measurement::throughput(10.0)),
            None,
            Some(Measurement::new()),
            Some(Measurement::throughput(42.5)),
            Some(Measurement::throughput(f64::INFINITY)),
        ];
        assert_eq!(best_metric(&batch, PERF_THROUGHPUT), Some(42.5));
    }

    #[test]
    fn best_metric_none_when_nothing_numeric() {
        let batch: Vec<Option<Measurement>> = vec![None, Some(Measurement::new())];
        assert_eq!(best_metric(&batch, PERF_THROUGHPUT), None);
        assert_eq!(best_metric::<Measurement>(&[], PERF_THROUGHPUT), None);
    }
}
