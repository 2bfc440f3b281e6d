//! Client-side load sweep (batch size x concurrency) for one model variant.

use std::collections::BTreeMap;

use st_types::{LoadConfig, Measurement, ModelSpec, SearchConfig, StResult};

use crate::generator::{ConfigGenerator, FeedbackTurn};
use crate::plateau::PlateauTracker;
use crate::strategy::doubling_ladder;

/// Generates load configs for a single server variant.
///
/// For each client batch size the concurrency axis is walked in order. With
/// early exit enabled a plateau in the objective metric ends the current
/// batch size and moves on to the next one.
#[derive(Debug, Clone)]
pub struct LoadConfigGenerator {
    model_name: String,
    flags: BTreeMap<String, String>,
    batch_sizes: Vec<u32>,
    concurrencies: Vec<u32>,
    batch_index: usize,
    concurrency_index: usize,
    early_exit_enable: bool,
    plateau: PlateauTracker,
    turn: FeedbackTurn,
    last_results: Vec<Option<Measurement>>,
}

impl LoadConfigGenerator {
    pub fn new(
        model_name: impl Into<String>,
        batch_sizes: Vec<u32>,
        concurrencies: Vec<u32>,
        early_exit_enable: bool,
        metric: &str,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            flags: BTreeMap::new(),
            batch_sizes,
            concurrencies,
            batch_index: 0,
            concurrency_index: 0,
            early_exit_enable,
            plateau: PlateauTracker::new("concurrency", metric),
            turn: FeedbackTurn::default(),
            last_results: Vec::new(),
        }
    }

    /// Load sweep for `variant_name` derived from the run config and the
    /// model's pinned parameters. Unpinned concurrency doubles from the
    /// configured minimum; unpinned batch size is 1.
    pub fn for_variant(config: &SearchConfig, model: &ModelSpec, variant_name: &str) -> Self {
        let pinned = &model.parameters;
        let concurrencies = if pinned.concurrency.is_empty() {
            doubling_ladder(config.min_concurrency, config.max_concurrency)
        } else {
            pinned.concurrency.clone()
        };
        let batch_sizes = if pinned.batch_sizes.is_empty() {
            vec![1]
        } else {
            pinned.batch_sizes.clone()
        };
        let early_exit_enable = config.early_exit_enables(model).load;

        Self::new(
            variant_name,
            batch_sizes,
            concurrencies,
            early_exit_enable,
            &config.objective_metric,
        )
        .with_flags(model.perf_analyzer_flags.clone())
    }

    pub fn with_flags(mut self, flags: BTreeMap<String, String>) -> Self {
        self.flags = flags;
        self
    }

    pub fn early_exit_enabled(&self) -> bool {
        self.early_exit_enable
    }

    pub fn plateau(&self) -> &PlateauTracker {
        &self.plateau
    }

    pub fn protocol_violations(&self) -> usize {
        self.turn.violations()
    }

    fn done_walking(&self) -> bool {
        self.batch_index >= self.batch_sizes.len() || self.concurrencies.is_empty()
    }

    fn step(&mut self) {
        let results = std::mem::take(&mut self.last_results);
        let outcome = self.plateau.record(&results);
        let stop_run = self.early_exit_enable && !outcome.is_improving();
        if stop_run {
            self.plateau.report_stop(outcome);
        }

        if stop_run || self.concurrency_index + 1 >= self.concurrencies.len() {
            self.concurrency_index = 0;
            self.batch_index += 1;
            self.plateau.reset();
        } else {
            self.concurrency_index += 1;
        }
    }

    fn current(&self) -> Option<LoadConfig> {
        Some(LoadConfig {
            model_name: self.model_name.clone(),
            batch_size: *self.batch_sizes.get(self.batch_index)?,
            concurrency: *self.concurrencies.get(self.concurrency_index)?,
            flags: self.flags.clone(),
        })
    }
}

impl ConfigGenerator for LoadConfigGenerator {
    type Item = LoadConfig;

    fn next_config(&mut self) -> StResult<Option<LoadConfig>> {
        if self.turn.begin_pull(&self.model_name) {
            self.step();
        }
        if self.is_done() {
            return Ok(None);
        }
        self.turn.start();
        let config = self.current();
        if config.is_some() {
            self.turn.yielded();
        }
        Ok(config)
    }

    fn set_last_results(&mut self, measurements: Vec<Option<Measurement>>) {
        self.turn.accept_feedback(&self.model_name);
        self.last_results = measurements;
    }

    fn is_started(&self) -> bool {
        self.turn.started()
    }

    fn is_done(&self) -> bool {
        self.turn.started() && self.done_walking()
    }
}
