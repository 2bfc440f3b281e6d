use std::sync::Arc;

use anyhow::Context;
use st_search::{
    ConfigGenerator, InMemoryLoader, SearchContext, SearchOrchestrator, SearchReport, ServerClient,
    Trial,
};
use st_types::{ClientError, ConfigMap, ConfigValue, Measurement, ModelSpec, SearchConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Base config every simulated model starts from.
fn base_config(model_name: &str) -> ConfigMap {
    let mut group = ConfigMap::new();
    group.insert("count".to_string(), ConfigValue::from(1u32));
    group.insert("kind".to_string(), ConfigValue::from("KIND_GPU"));

    let mut config = ConfigMap::new();
    config.insert("name".to_string(), ConfigValue::from(model_name));
    config.insert("max_batch_size".to_string(), ConfigValue::from(8u32));
    config.insert("instance_group".to_string(), ConfigValue::from(vec![ConfigValue::from(group)]));
    config
}

/// Stand-in for an externally managed server in remote mode.
struct SimulatedServer;

impl ServerClient for SimulatedServer {
    fn load_model(&self, model_name: &str) -> Result<(), ClientError> {
        info!("Loading {} on simulated server", model_name);
        Ok(())
    }

    fn unload_model(&self, model_name: &str) -> Result<(), ClientError> {
        info!("Unloading {} from simulated server", model_name);
        Ok(())
    }

    fn get_config(&self, model_name: &str, _retries: u32) -> Result<ConfigMap, ClientError> {
        Ok(base_config(model_name))
    }
}

fn instance_count(config: &ConfigMap) -> i64 {
    match config.get("instance_group") {
        Some(ConfigValue::Sequence(groups)) => groups
            .first()
            .and_then(ConfigValue::as_mapping)
            .and_then(|group| group.get("count"))
            .and_then(ConfigValue::as_i64)
            .unwrap_or(1),
        _ => 1,
    }
}

/// Synthetic throughput model: capacity grows sub-linearly with instances
/// and batch size, demand grows with concurrency; oversized loads fail.
fn simulate(trial: &Trial) -> Option<Measurement> {
    let config = &trial.model_config.config;
    let instances = instance_count(config) as f64;
    let max_batch = config
        .get("max_batch_size")
        .and_then(ConfigValue::as_i64)
        .unwrap_or(1)
        .max(1) as f64;
    let load = &trial.load_config;
    let in_flight = f64::from(load.concurrency) * f64::from(load.batch_size);
    if in_flight > 512.0 {
        return None;
    }

    let batching_gain = (1.0 + 0.3 * max_batch.log2()) / (1.0 + 0.05 * max_batch);
    let capacity = 400.0 * instances.powf(0.7) * batching_gain;
    let demand = 60.0 * in_flight;
    let throughput = if demand <= capacity {
        demand
    } else {
        capacity * (1.0 - 0.02 * (demand / capacity).ln())
    };
    Some(
        Measurement::throughput(throughput)
            .with_metric("client_concurrency", f64::from(load.concurrency)),
    )
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::var("ST_SEARCH_CONFIG") {
        Ok(path) => SearchConfig::from_file(&path)
            .with_context(|| format!("loading search config from {path}"))?,
        Err(_) => SearchConfig::new().with_model(ModelSpec::new("resnet50")),
    };

    let loader = config
        .models
        .iter()
        .fold(InMemoryLoader::new(), |loader, model| {
            loader.with_config(model.name.clone(), base_config(&model.name))
        });
    let ctx = SearchContext::new(config.clone(), Arc::new(loader))
        .with_client(Arc::new(SimulatedServer));

    let mut report = SearchReport::new(config.objective_metric.clone());
    for model in &config.models {
        for &default_only in config.default_only_passes() {
            let mut search =
                SearchOrchestrator::for_model(ctx.clone(), model.clone(), default_only);
            while let Some(mut trial) = search.next_config()? {
                trial.mark_running();
                match simulate(&trial) {
                    Some(measurement) => trial.mark_completed(measurement),
                    None => {
                        warn!("Trial {} failed: load exceeded server limits", trial.trial_number);
                        trial.mark_failed("load exceeded server limits".to_string());
                    }
                }
                info!(
                    "{} [{}] -> {:?}",
                    trial.variant_name(),
                    trial.load_config,
                    trial.result.as_ref().and_then(|m| m.metrics.get(&config.objective_metric))
                );
                report.record(&trial);
                search.set_last_results(trial.feedback());
            }
        }
    }

    info!(
        "Completed {} trials ({} failed)",
        report.trials_completed, report.trials_failed
    );
    match (&report.best_trial, report.best_objective()) {
        (Some(best), Some(objective)) => info!(
            "Best: {} with {} at {:.1} {}",
            best.variant_name(),
            best.load_config,
            objective,
            report.objective_metric
        ),
        _ => warn!("No trial produced a usable {}", report.objective_metric),
    }
    Ok(())
}
