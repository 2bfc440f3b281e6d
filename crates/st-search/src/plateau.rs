//! Plateau detection over per-step best metric values.

use st_types::{best_metric, MetricSource};
use tracing::{info, warn};

/// Verdict for the most recently recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step beat every earlier step (or there is nothing to compare yet).
    Improved,
    /// The step did not beat every earlier step.
    Plateaued,
    /// No numeric value was reported for the step.
    Erroneous,
}

impl StepOutcome {
    pub fn is_improving(self) -> bool {
        matches!(self, Self::Improved)
    }
}

/// Tracks the best metric seen at each step of one sweep dimension.
#[derive(Debug, Clone)]
pub struct PlateauTracker {
    dimension: &'static str,
    metric: String,
    best_per_step: Vec<f64>,
    notice_logged: bool,
}

impl PlateauTracker {
    pub fn new(dimension: &'static str, metric: impl Into<String>) -> Self {
        Self {
            dimension,
            metric: metric.into(),
            best_per_step: Vec::new(),
            notice_logged: false,
        }
    }

    /// Record the measurements of one step and classify it.
    pub fn record<M: MetricSource>(&mut self, measurements: &[Option<M>]) -> StepOutcome {
        let Some(best) = best_metric(measurements, &self.metric) else {
            return StepOutcome::Erroneous;
        };
        self.best_per_step.push(best);
        if self.latest_is_strict_max() {
            StepOutcome::Improved
        } else {
            StepOutcome::Plateaued
        }
    }

    fn latest_is_strict_max(&self) -> bool {
        match self.best_per_step.split_last() {
            Some((latest, previous)) => previous.iter().all(|prev| latest > prev),
            None => true,
        }
    }

    /// Log why the sweep stops advancing. Only the first call per tracker
    /// logs anything; returns whether this call did.
    pub fn report_stop(&mut self, outcome: StepOutcome) -> bool {
        if self.notice_logged {
            return false;
        }
        match outcome {
            StepOutcome::Improved => return false,
            StepOutcome::Plateaued => info!(
                "No longer increasing {} because {} has plateaued",
                self.dimension, self.metric
            ),
            StepOutcome::Erroneous => warn!(
                "No longer increasing {} because no valid {} was measured",
                self.dimension, self.metric
            ),
        }
        self.notice_logged = true;
        true
    }

    /// Start a fresh history when the outer axis moves on. The notice latch
    /// survives so the generator logs at most once.
    pub fn reset(&mut self) {
        self.best_per_step.clear();
    }

    pub fn history(&self) -> &[f64] {
        &self.best_per_step
    }

    pub fn notice_logged(&self) -> bool {
        self.notice_logged
    }
}
