//! Lazily generated server-side model config variants.

use st_types::{
    apply_value_to_map, ConfigMap, ConfigValue, ConfigVariant, LaunchMode, Measurement,
    ModelSpec, ParameterCombination, StResult, VariantTag,
};
use tracing::{debug, info};

use crate::context::{fetch_server_config, SearchContext};
use crate::generator::{ConfigGenerator, FeedbackTurn};
use crate::namer::VariantNamer;
use crate::plateau::PlateauTracker;
use crate::strategy::{GridWalk, LadderWalk, SweepStrategy, MAX_BATCH_SIZE_KEY};

/// Build a named variant by applying `combination` on top of `base`.
///
/// Null values in the combination are skipped. The model's CPU-only flag is
/// carried over as a tag.
pub fn make_config(
    namer: &VariantNamer,
    model: &ModelSpec,
    combination: &ParameterCombination,
    base: ConfigMap,
) -> ConfigVariant {
    let name = namer.name(&model.name, combination);
    let mut config = base;
    config.insert("name".to_string(), ConfigValue::from(name.as_str()));

    info!("Creating model config: {}", name);
    for (key, value) in combination.iter().filter(|(_, value)| !value.is_null()) {
        apply_value_to_map(key, value, &mut config);
        if *value == ConfigValue::empty_mapping() {
            info!("  Enabling {}", key);
        } else {
            info!("  Setting {} to {}", key, value);
        }
    }

    let mut variant = ConfigVariant::new(name, config);
    if combination.is_default() {
        variant.tag(VariantTag::Default);
    }
    if model.cpu_only {
        variant.tag(VariantTag::CpuOnly);
    }
    variant
}

/// Generates model config variants for one base model.
pub struct ServerConfigGenerator {
    ctx: SearchContext,
    model: ModelSpec,
    strategy: SweepStrategy,
    early_exit_enable: bool,
    base_config: Option<ConfigMap>,
    plateau: PlateauTracker,
    turn: FeedbackTurn,
    last_results: Vec<Option<Measurement>>,
}

impl ServerConfigGenerator {
    pub fn new(
        ctx: SearchContext,
        model: ModelSpec,
        strategy: SweepStrategy,
        early_exit_enable: bool,
    ) -> Self {
        let plateau = PlateauTracker::new(MAX_BATCH_SIZE_KEY, ctx.config.objective_metric.clone());
        Self {
            ctx,
            model,
            strategy,
            early_exit_enable,
            base_config: None,
            plateau,
            turn: FeedbackTurn::default(),
            last_results: Vec::new(),
        }
    }

    /// Pick the strategy the run configuration calls for.
    ///
    /// Remote mode wins over everything: the server owns the config, so only
    /// its single config can be profiled.
    pub fn for_model(ctx: SearchContext, model: ModelSpec, default_only: bool) -> Self {
        let config = ctx.config.clone();
        let strategy = if config.launch_mode == LaunchMode::Remote {
            SweepStrategy::Remote
        } else if default_only || config.run_config_search_disable {
            SweepStrategy::DefaultOnly
        } else if model.has_config_parameters() {
            SweepStrategy::Grid(GridWalk::from_axes(&model.model_config_parameters))
        } else {
            SweepStrategy::Ladder(LadderWalk::from_config(&config, model.cpu_only))
        };
        let early_exit_enable = config.early_exit_enables(&model).server;
        debug!(
            "Model {} uses {} strategy (early exit: {})",
            model.name,
            strategy.name(),
            early_exit_enable
        );
        Self::new(ctx, model, strategy, early_exit_enable)
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    pub fn strategy(&self) -> &SweepStrategy {
        &self.strategy
    }

    pub fn plateau(&self) -> &PlateauTracker {
        &self.plateau
    }

    pub fn protocol_violations(&self) -> usize {
        self.turn.violations()
    }

    fn step(&mut self) {
        let results = std::mem::take(&mut self.last_results);
        if !self.strategy.is_adaptive() {
            return;
        }

        let outcome = self.plateau.record(&results);
        let stop_run = self.early_exit_enable && !outcome.is_improving();
        if stop_run {
            self.plateau.report_stop(outcome);
        }
        if self.strategy.advance(stop_run) {
            self.plateau.reset();
        }
    }

    fn next_variant(&mut self) -> StResult<Option<ConfigVariant>> {
        if matches!(self.strategy, SweepStrategy::Remote) {
            return self.make_remote_config().map(Some);
        }
        match self.strategy.current() {
            Some(combination) => {
                let base = self.base_config()?;
                Ok(Some(make_config(&self.ctx.namer, &self.model, &combination, base)))
            }
            None => Ok(None),
        }
    }

    fn base_config(&mut self) -> StResult<ConfigMap> {
        if let Some(base) = &self.base_config {
            return Ok(base.clone());
        }
        let base = self.ctx.resolve_base_config(&self.model.name)?;
        self.base_config = Some(base.clone());
        Ok(base)
    }

    fn make_remote_config(&self) -> StResult<ConfigVariant> {
        let config = &self.ctx.config;
        let server_config = fetch_server_config(
            self.ctx.require_client()?,
            &self.model.name,
            config.client_max_retries,
            !config.reload_model_disable,
        )?;

        info!("Using server-reported config for {}", self.model.name);
        let mut variant = ConfigVariant::new(self.model.name.clone(), server_config);
        variant.tag(VariantTag::Remote);
        variant.tag(VariantTag::Default);
        if self.model.cpu_only {
            variant.tag(VariantTag::CpuOnly);
        }
        Ok(variant)
    }
}

impl ConfigGenerator for ServerConfigGenerator {
    type Item = ConfigVariant;

    fn next_config(&mut self) -> StResult<Option<ConfigVariant>> {
        if self.turn.begin_pull(&self.model.name) {
            self.step();
        }
        if self.is_done() {
            return Ok(None);
        }
        self.turn.start();
        let variant = self.next_variant()?;
        if variant.is_some() {
            self.turn.yielded();
        }
        Ok(variant)
    }

    fn set_last_results(&mut self, measurements: Vec<Option<Measurement>>) {
        self.turn.accept_feedback(&self.model.name);
        self.last_results = measurements;
    }

    fn is_started(&self) -> bool {
        self.turn.started()
    }

    fn is_done(&self) -> bool {
        self.turn.started() && self.strategy.done_walking()
    }
}
