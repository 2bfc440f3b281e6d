//! Nested server-config x load-config search for one model.

use st_types::{ConfigVariant, LoadConfig, Measurement, ModelSpec, StResult};
use tracing::{debug, info};
use uuid::Uuid;

use crate::context::SearchContext;
use crate::generator::{ConfigGenerator, FeedbackTurn};
use crate::load::LoadConfigGenerator;
use crate::server::ServerConfigGenerator;
use crate::trial::{SearchRunId, Trial};

/// Builds the load sweep for a freshly produced server variant.
pub type LoadFactory = Box<dyn FnMut(&ConfigVariant) -> LoadConfigGenerator + Send>;

/// The orchestrator as wired up by [`SearchOrchestrator::for_model`].
pub type ModelSearch = SearchOrchestrator<ServerConfigGenerator, LoadConfigGenerator, LoadFactory>;

/// Composes a server-config generator with per-variant load generators.
///
/// Every server variant gets its own load sweep, which is drained before
/// the next variant is pulled. Measurements reported during that drain are
/// buffered and handed to the server generator in one call once the load
/// sweep ends, so the outer plateau decision sees the whole inner sweep.
pub struct SearchOrchestrator<S, L, F> {
    model_name: String,
    run_id: SearchRunId,
    server: S,
    make_load: F,
    current: Option<(ConfigVariant, L)>,
    buffered: Vec<Option<Measurement>>,
    turn: FeedbackTurn,
    trials_issued: usize,
}

impl SearchOrchestrator<ServerConfigGenerator, LoadConfigGenerator, LoadFactory> {
    /// Standard wiring: strategy picked from the run config, load sweep
    /// derived from the model's pinned parameters.
    pub fn for_model(ctx: SearchContext, model: ModelSpec, default_only: bool) -> ModelSearch {
        let config = ctx.config.clone();
        let load_model = model.clone();
        let server = ServerConfigGenerator::for_model(ctx, model, default_only);
        let make_load: LoadFactory = Box::new(move |variant: &ConfigVariant| {
            LoadConfigGenerator::for_variant(&config, &load_model, &variant.name)
        });
        let model_name = server.model().name.clone();
        SearchOrchestrator::new(model_name, server, make_load)
    }
}

impl<S, L, F> SearchOrchestrator<S, L, F>
where
    S: ConfigGenerator<Item = ConfigVariant>,
    L: ConfigGenerator<Item = LoadConfig>,
    F: FnMut(&ConfigVariant) -> L,
{
    pub fn new(model_name: impl Into<String>, server: S, make_load: F) -> Self {
        Self {
            model_name: model_name.into(),
            run_id: Uuid::new_v4(),
            server,
            make_load,
            current: None,
            buffered: Vec::new(),
            turn: FeedbackTurn::default(),
            trials_issued: 0,
        }
    }

    pub fn run_id(&self) -> SearchRunId {
        self.run_id
    }

    pub fn trials_issued(&self) -> usize {
        self.trials_issued
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn protocol_violations(&self) -> usize {
        self.turn.violations()
    }

    fn finish_variant(&mut self) {
        if let Some((variant, _)) = self.current.take() {
            let measurements = std::mem::take(&mut self.buffered);
            debug!(
                "Load sweep for {} finished with {} measurements",
                variant.name,
                measurements.len()
            );
            self.server.set_last_results(measurements);
        }
    }
}

impl<S, L, F> ConfigGenerator for SearchOrchestrator<S, L, F>
where
    S: ConfigGenerator<Item = ConfigVariant>,
    L: ConfigGenerator<Item = LoadConfig>,
    F: FnMut(&ConfigVariant) -> L,
{
    type Item = Trial;

    fn next_config(&mut self) -> StResult<Option<Trial>> {
        self.turn.begin_pull(&self.model_name);
        self.turn.start();
        loop {
            if let Some((variant, load)) = self.current.as_mut() {
                if let Some(load_config) = load.next_config()? {
                    let trial = Trial::new(
                        self.run_id,
                        self.trials_issued,
                        &self.model_name,
                        variant.clone(),
                        load_config,
                    );
                    self.trials_issued += 1;
                    self.turn.yielded();
                    return Ok(Some(trial));
                }
                self.finish_variant();
            }

            match self.server.next_config()? {
                Some(variant) => {
                    info!("Profiling load configs for {}", variant.name);
                    let load = (self.make_load)(&variant);
                    self.current = Some((variant, load));
                }
                None => return Ok(None),
            }
        }
    }

    fn set_last_results(&mut self, measurements: Vec<Option<Measurement>>) {
        self.turn.accept_feedback(&self.model_name);
        if let Some((_, load)) = self.current.as_mut() {
            load.set_last_results(measurements.clone());
        }
        self.buffered.extend(measurements);
    }

    fn is_started(&self) -> bool {
        self.turn.started()
    }

    fn is_done(&self) -> bool {
        self.turn.started() && self.current.is_none() && self.server.is_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{config_map, RecordingClient};
    use crate::context::InMemoryLoader;
    use crate::generator::SweepPhase;
    use serde_json::json;
    use st_types::{ConfigMap, LaunchMode, SearchConfig, PERF_THROUGHPUT};
    use std::sync::Arc;

    /// Server generator double: yields fixed variants and records feedback.
    struct ScriptedServer {
        variants: Vec<ConfigVariant>,
        next: usize,
        started: bool,
        feedback: Vec<Vec<Option<Measurement>>>,
    }

    impl ScriptedServer {
        fn new(names: &[&str]) -> Self {
            Self {
                variants: names
                    .iter()
                    .map(|name| ConfigVariant::new(*name, ConfigMap::new()))
                    .collect(),
                next: 0,
                started: false,
                feedback: Vec::new(),
            }
        }
    }

    impl ConfigGenerator for ScriptedServer {
        type Item = ConfigVariant;

        fn next_config(&mut self) -> StResult<Option<ConfigVariant>> {
            self.started = true;
            let variant = self.variants.get(self.next).cloned();
            self.next += 1;
            Ok(variant)
        }

        fn set_last_results(&mut self, measurements: Vec<Option<Measurement>>) {
            self.feedback.push(measurements);
        }

        fn is_started(&self) -> bool {
            self.started
        }

        fn is_done(&self) -> bool {
            self.started && self.next >= self.variants.len()
        }
    }

    fn pinned_loads(variant: &ConfigVariant) -> LoadConfigGenerator {
        LoadConfigGenerator::new(variant.name.clone(), vec![1], vec![1, 2], false, PERF_THROUGHPUT)
    }

    #[test]
    fn yields_nested_product_and_forwards_concatenated_feedback() {
        let mut search =
            SearchOrchestrator::new("m", ScriptedServer::new(&["V1", "V2"]), pinned_loads);
        assert_eq!(search.phase(), SweepPhase::NotStarted);

        let mut pairs = Vec::new();
        let mut value = 0.0;
        while let Some(trial) = search.next_config().unwrap() {
            pairs.push((trial.variant_name().to_string(), trial.load_config.concurrency));
            value += 1.0;
            search.set_last_results(vec![Some(Measurement::throughput(value))]);
        }

        assert_eq!(
            pairs,
            vec![
                ("V1".to_string(), 1),
                ("V1".to_string(), 2),
                ("V2".to_string(), 1),
                ("V2".to_string(), 2),
            ]
        );

        let feedback = &search.server().feedback;
        assert_eq!(feedback.len(), 2);
        assert_eq!(
            feedback[0],
            vec![
                Some(Measurement::throughput(1.0)),
                Some(Measurement::throughput(2.0))
            ]
        );
        assert_eq!(
            feedback[1],
            vec![
                Some(Measurement::throughput(3.0)),
                Some(Measurement::throughput(4.0))
            ]
        );
        assert!(search.is_done());
        assert_eq!(search.trials_issued(), 4);
        assert_eq!(search.protocol_violations(), 0);
    }

    #[test]
    fn trials_are_numbered_and_share_run_id() {
        let mut search = SearchOrchestrator::new("m", ScriptedServer::new(&["V1"]), pinned_loads);
        let first = search.next_config().unwrap().unwrap();
        search.set_last_results(vec![None]);
        let second = search.next_config().unwrap().unwrap();
        assert_eq!(first.trial_number, 0);
        assert_eq!(second.trial_number, 1);
        assert_eq!(first.run_id, search.run_id());
        assert_eq!(second.run_id, search.run_id());
        assert_ne!(first.id, second.id);
        assert_eq!(first.model_name, "m");
    }

    #[test]
    fn empty_load_sweep_still_reports_once_per_variant() {
        let no_loads = |v: &ConfigVariant| {
            LoadConfigGenerator::new(v.name.clone(), vec![1], Vec::new(), true, PERF_THROUGHPUT)
        };
        let mut search = SearchOrchestrator::new("m", ScriptedServer::new(&["V1", "V2"]), no_loads);
        assert!(search.next_config().unwrap().is_none());
        assert_eq!(search.server().feedback, vec![Vec::new(), Vec::new()]);
    }

    #[test]
    fn for_model_drives_ladder_with_outer_plateau() {
        let config = SearchConfig::new()
            .with_instance_count_range(1, 1)
            .with_model_batch_size_range(1, 8)
            .with_concurrency_range(1, 4);
        let loader = InMemoryLoader::new().with_config(
            "resnet50",
            config_map(json!({"name": "resnet50", "max_batch_size": 8})),
        );
        let ctx = SearchContext::new(config, Arc::new(loader));
        let mut search = SearchOrchestrator::for_model(ctx, ModelSpec::new("resnet50"), false);

        let mut trials = Vec::new();
        while let Some(trial) = search.next_config().unwrap() {
            let batch = trial.model_config.config["max_batch_size"].as_i64().unwrap() as f64;
            let concurrency = f64::from(trial.load_config.concurrency);
            // Server throughput peaks at max_batch_size 2.
            let throughput = concurrency * if batch <= 2.0 { batch } else { 1.0 };
            trials.push((trial.variant_name().to_string(), trial.load_config.concurrency));
            search.set_last_results(vec![Some(Measurement::throughput(throughput))]);
        }

        let variants: Vec<&str> = trials.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            variants,
            vec![
                "resnet50_config_0", "resnet50_config_0", "resnet50_config_0",
                "resnet50_config_1", "resnet50_config_1", "resnet50_config_1",
                "resnet50_config_2", "resnet50_config_2", "resnet50_config_2",
            ]
        );
        assert!(search.server().plateau().notice_logged());
        assert!(search.is_done());
    }

    #[test]
    fn default_only_search_profiles_single_variant() {
        let loader = InMemoryLoader::new().with_config("bert", ConfigMap::new());
        let model = ModelSpec::new("bert").with_concurrency(vec![1, 2, 4]);
        let ctx = SearchContext::new(SearchConfig::new(), Arc::new(loader));
        let mut search = SearchOrchestrator::for_model(ctx, model, true);

        let mut seen = Vec::new();
        while let Some(trial) = search.next_config().unwrap() {
            assert!(trial.model_config.is_default());
            seen.push(trial.load_config.concurrency);
            // Pinned concurrency: falling throughput must not stop the sweep.
            let value = 10.0 / f64::from(trial.load_config.concurrency);
            search.set_last_results(vec![Some(Measurement::throughput(value))]);
        }
        assert_eq!(seen, vec![1, 2, 4]);
    }

    #[test]
    fn missing_feedback_is_tolerated() {
        let mut search = SearchOrchestrator::new("m", ScriptedServer::new(&["V1"]), pinned_loads);
        search.next_config().unwrap().unwrap();
        let second = search.next_config().unwrap().unwrap();
        assert_eq!(second.load_config.concurrency, 2);
        assert_eq!(search.protocol_violations(), 1);
    }

    #[test]
    fn remote_model_is_profiled_once_across_passes() {
        let client = Arc::new(RecordingClient::with_config(config_map(json!({"name": "m"}))));
        let config = SearchConfig::new().with_launch_mode(LaunchMode::Remote);
        let ctx = SearchContext::new(config.clone(), Arc::new(InMemoryLoader::new()))
            .with_client(client.clone());
        let model = ModelSpec::new("m").with_concurrency(vec![1]);

        let mut profiled = Vec::new();
        for &default_only in config.default_only_passes() {
            let mut search =
                SearchOrchestrator::for_model(ctx.clone(), model.clone(), default_only);
            while let Some(trial) = search.next_config().unwrap() {
                profiled.push(trial.variant_name().to_string());
                search.set_last_results(vec![Some(Measurement::throughput(1.0))]);
            }
        }

        assert_eq!(profiled, vec!["m"]);
        assert_eq!(client.calls(), vec!["load m", "get_config m 50", "unload m"]);
    }
}
