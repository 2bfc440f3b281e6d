//! Trial descriptors and run-level result tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use st_types::{ConfigVariant, LoadConfig, Measurement, MetricSource};
use uuid::Uuid;

/// Unique search run identifier.
pub type SearchRunId = Uuid;

/// One (model config variant, load config) pair handed to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub run_id: SearchRunId,
    pub trial_number: usize,
    /// Base model the variant was derived from.
    pub model_name: String,
    pub model_config: ConfigVariant,
    pub load_config: LoadConfig,
    pub status: TrialStatus,
    pub result: Option<Measurement>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(
        run_id: SearchRunId,
        trial_number: usize,
        model_name: impl Into<String>,
        model_config: ConfigVariant,
        load_config: LoadConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            trial_number,
            model_name: model_name.into(),
            model_config,
            load_config,
            status: TrialStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn variant_name(&self) -> &str {
        &self.model_config.name
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: Measurement) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Feedback to report for this trial: its measurement, or `None` when
    /// it failed or never ran.
    pub fn feedback(&self) -> Vec<Option<Measurement>> {
        vec![self.result.clone()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate outcome of a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub objective_metric: String,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub best_trial: Option<Trial>,
}

impl SearchReport {
    pub fn new(objective_metric: impl Into<String>) -> Self {
        Self {
            objective_metric: objective_metric.into(),
            trials_completed: 0,
            trials_failed: 0,
            best_trial: None,
        }
    }

    fn objective(&self, trial: &Trial) -> Option<f64> {
        trial.result.as_ref()?.metric(&self.objective_metric)
    }

    /// Count a finished trial and keep it if it beats the current best.
    pub fn record(&mut self, trial: &Trial) {
        match trial.status {
            TrialStatus::Completed => self.trials_completed += 1,
            TrialStatus::Failed => self.trials_failed += 1,
            TrialStatus::Pending | TrialStatus::Running => return,
        }

        let Some(objective) = self.objective(trial) else {
            return;
        };
        let improves = match self.best_trial.as_ref().and_then(|best| self.objective(best)) {
            None => true,
            Some(current_best) => objective > current_best,
        };
        if improves {
            self.best_trial = Some(trial.clone());
        }
    }

    pub fn best_objective(&self) -> Option<f64> {
        self.best_trial.as_ref().and_then(|best| self.objective(best))
    }
}
