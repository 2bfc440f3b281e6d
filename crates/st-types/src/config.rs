//! Run-wide search configuration and per-model profiling specs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::StResult;
use crate::measurement::PERF_THROUGHPUT;
use crate::value::ConfigValue;
use crate::{config_error, validation_error};

/// How the model server is managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// The server is launched by us; configs are authored locally.
    #[default]
    Local,
    /// The server is managed externally; it owns the model config.
    Remote,
}

/// One dimension of an explicit model-config grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterAxis {
    pub key: String,
    pub values: Vec<ConfigValue>,
}

/// Client-side parameters pinned by the user for a model.
///
/// An empty list means the dimension was not pinned and is searched
/// automatically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameters {
    pub concurrency: Vec<u32>,
    pub batch_sizes: Vec<u32>,
}

/// A model to profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default)]
    pub cpu_only: bool,
    /// Explicit model-config grid, in declared key order.
    #[serde(default)]
    pub model_config_parameters: Vec<ParameterAxis>,
    #[serde(default)]
    pub parameters: ModelParameters,
    #[serde(default)]
    pub perf_analyzer_flags: BTreeMap<String, String>,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cpu_only: false,
            model_config_parameters: Vec::new(),
            parameters: ModelParameters::default(),
            perf_analyzer_flags: BTreeMap::new(),
        }
    }

    pub fn with_cpu_only(mut self, cpu_only: bool) -> Self {
        self.cpu_only = cpu_only;
        self
    }

    pub fn with_config_axis(mut self, key: impl Into<String>, values: Vec<ConfigValue>) -> Self {
        self.model_config_parameters.push(ParameterAxis {
            key: key.into(),
            values,
        });
        self
    }

    pub fn with_concurrency(mut self, values: Vec<u32>) -> Self {
        self.parameters.concurrency = values;
        self
    }

    pub fn with_batch_sizes(mut self, values: Vec<u32>) -> Self {
        self.parameters.batch_sizes = values;
        self
    }

    pub fn with_perf_flag(mut self, flag: impl Into<String>, value: impl Into<String>) -> Self {
        self.perf_analyzer_flags.insert(flag.into(), value.into());
        self
    }

    /// True when at least one axis enumerates values. Empty axes contribute
    /// nothing to the grid, so they do not pin the config space.
    pub fn has_config_parameters(&self) -> bool {
        self.model_config_parameters
            .iter()
            .any(|axis| !axis.values.is_empty())
    }
}

/// Early-exit permission for each of the two search dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarlyExitEnables {
    pub server: bool,
    pub load: bool,
}

/// Top-level configuration for a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Metric tag the plateau test maximizes.
    pub objective_metric: String,

    /// Allow early exit even for dimensions the user pinned explicitly.
    pub early_exit_enable: bool,

    /// Only profile the default config of each model.
    pub run_config_search_disable: bool,

    pub launch_mode: LaunchMode,
    pub model_repository: PathBuf,

    /// Ask the server to auto-complete a base config when none exists in
    /// the repository.
    pub remote_fallback: bool,

    /// Remote mode: assume the model is already loaded.
    pub reload_model_disable: bool,

    pub client_max_retries: u32,

    pub min_concurrency: u32,
    pub max_concurrency: u32,
    pub min_model_batch_size: u32,
    pub max_model_batch_size: u32,
    pub min_instance_count: u32,
    pub max_instance_count: u32,

    pub models: Vec<ModelSpec>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            objective_metric: PERF_THROUGHPUT.to_string(),
            early_exit_enable: false,
            run_config_search_disable: false,
            launch_mode: LaunchMode::Local,
            model_repository: PathBuf::from("models"),
            remote_fallback: true,
            reload_model_disable: false,
            client_max_retries: 50,
            min_concurrency: 1,
            max_concurrency: 1024,
            min_model_batch_size: 1,
            max_model_batch_size: 128,
            min_instance_count: 1,
            max_instance_count: 5,
            models: Vec::new(),
        }
    }
}

impl SearchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(input: &str) -> StResult<Self> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> StResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read {}: {}", path.display(), e))?;
        Self::from_json_str(&raw)
    }

    pub fn with_model(mut self, model: ModelSpec) -> Self {
        self.models.push(model);
        self
    }

    pub fn with_early_exit(mut self, enable: bool) -> Self {
        self.early_exit_enable = enable;
        self
    }

    pub fn with_launch_mode(mut self, mode: LaunchMode) -> Self {
        self.launch_mode = mode;
        self
    }

    pub fn with_concurrency_range(mut self, min: u32, max: u32) -> Self {
        self.min_concurrency = min;
        self.max_concurrency = max;
        self
    }

    pub fn with_model_batch_size_range(mut self, min: u32, max: u32) -> Self {
        self.min_model_batch_size = min;
        self.max_model_batch_size = max;
        self
    }

    pub fn with_instance_count_range(mut self, min: u32, max: u32) -> Self {
        self.min_instance_count = min;
        self.max_instance_count = max;
        self
    }

    pub fn validate(&self) -> StResult<()> {
        let ranges = [
            ("concurrency", self.min_concurrency, self.max_concurrency),
            ("model batch size", self.min_model_batch_size, self.max_model_batch_size),
            ("instance count", self.min_instance_count, self.max_instance_count),
        ];
        for (label, min, max) in ranges {
            if min == 0 {
                return Err(validation_error!("minimum {} must be at least 1", label));
            }
            if min > max {
                return Err(validation_error!(
                    "minimum {} {} exceeds maximum {}",
                    label,
                    min,
                    max
                ));
            }
        }
        if self.objective_metric.is_empty() {
            return Err(validation_error!("objective metric must not be empty"));
        }
        for model in &self.models {
            if model.name.is_empty() {
                return Err(validation_error!("model name must not be empty"));
            }
            let pinned = &model.parameters;
            if pinned.concurrency.contains(&0) || pinned.batch_sizes.contains(&0) {
                return Err(validation_error!(
                    "model {}: concurrency and batch sizes must be positive",
                    model.name
                ));
            }
            if let Some(axis) = model
                .model_config_parameters
                .iter()
                .find(|axis| axis.values.is_empty())
            {
                return Err(validation_error!(
                    "model {}: parameter {} has no values",
                    model.name,
                    axis.key
                ));
            }
        }
        Ok(())
    }

    /// `default_only` flag for each generator pass over a model: the
    /// unmodified config first, then the sweep proper. Remote servers own
    /// their config and a disabled search has nothing to sweep, so both
    /// stop after the first pass.
    pub fn default_only_passes(&self) -> &'static [bool] {
        if self.launch_mode == LaunchMode::Remote || self.run_config_search_disable {
            &[true]
        } else {
            &[true, false]
        }
    }

    /// Automatic early exit is suppressed only for a dimension the user
    /// enumerated explicitly, unless the global flag forces it back on.
    pub fn early_exit_enables(&self, model: &ModelSpec) -> EarlyExitEnables {
        EarlyExitEnables {
            server: self.early_exit_enable || !model.has_config_parameters(),
            load: self.early_exit_enable || model.parameters.concurrency.is_empty(),
        }
    }
}
