//! External collaborators that supply base model configs, and the shared
//! context generators are built from.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use st_types::{
    config_error, ClientError, ConfigMap, ConfigValue, LoaderError, SearchConfig, StResult,
};
use tracing::{debug, info, warn};

use crate::namer::VariantNamer;

/// Reads a model's base config from a model repository.
pub trait ConfigLoader: Send + Sync {
    fn load(&self, repository: &Path, model_name: &str) -> Result<ConfigMap, LoaderError>;
}

/// Control-plane calls against a running model server.
pub trait ServerClient: Send + Sync {
    fn load_model(&self, model_name: &str) -> Result<(), ClientError>;

    fn unload_model(&self, model_name: &str) -> Result<(), ClientError>;

    /// Fetch the config the server is using for a loaded model, retrying up
    /// to `retries` times while the model comes up.
    fn get_config(&self, model_name: &str, retries: u32) -> Result<ConfigMap, ClientError>;
}

/// Loader backed by a fixed set of configs, keyed by model name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLoader {
    configs: HashMap<String, ConfigMap>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, model_name: impl Into<String>, config: ConfigMap) -> Self {
        self.configs.insert(model_name.into(), config);
        self
    }
}

impl ConfigLoader for InMemoryLoader {
    /// A stored config that names a different model is rejected as invalid.
    fn load(&self, repository: &Path, model_name: &str) -> Result<ConfigMap, LoaderError> {
        let config = self
            .configs
            .get(model_name)
            .ok_or_else(|| LoaderError::NotFound {
                repository: repository.display().to_string(),
                model: model_name.to_string(),
            })?;
        match config.get("name").and_then(ConfigValue::as_str) {
            Some(name) if name != model_name => Err(LoaderError::Invalid {
                model: model_name.to_string(),
                message: format!("config is named {name}"),
            }),
            _ => Ok(config.clone()),
        }
    }
}

/// Everything a generator needs from the surrounding run.
#[derive(Clone)]
pub struct SearchContext {
    pub config: Arc<SearchConfig>,
    pub namer: VariantNamer,
    pub loader: Arc<dyn ConfigLoader>,
    pub client: Option<Arc<dyn ServerClient>>,
}

impl SearchContext {
    pub fn new(config: SearchConfig, loader: Arc<dyn ConfigLoader>) -> Self {
        Self {
            config: Arc::new(config),
            namer: VariantNamer::new(),
            loader,
            client: None,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn ServerClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub(crate) fn require_client(&self) -> StResult<&dyn ServerClient> {
        self.client
            .as_deref()
            .ok_or_else(|| config_error!("no server client configured"))
    }

    /// Base config for `model_name`: the repository first, then the server's
    /// auto-completed config when the repository has none and fallback is on.
    pub fn resolve_base_config(&self, model_name: &str) -> StResult<ConfigMap> {
        let repository = &self.config.model_repository;
        match self.loader.load(repository, model_name) {
            Ok(config) => Ok(config),
            Err(LoaderError::NotFound { .. }) if self.config.remote_fallback => {
                info!(
                    "No config for {} in {}; asking the server for a default",
                    model_name,
                    repository.display()
                );
                fetch_server_config(
                    self.require_client()?,
                    model_name,
                    self.config.client_max_retries,
                    true,
                )
            }
            Err(LoaderError::NotFound { .. }) => Err(config_error!(
                "no config for model {} in {} and remote fallback is disabled",
                model_name,
                repository.display()
            )),
            Err(e) => Err(e.into()),
        }
    }
}

/// Ask the server for the config it derives for `model_name`. With
/// `reload` set the model is loaded first and unloaded afterwards.
///
/// A failed fetch still unloads the model before the fetch error is
/// returned; a failure of that unload is only logged.
pub fn fetch_server_config(
    client: &dyn ServerClient,
    model_name: &str,
    retries: u32,
    reload: bool,
) -> StResult<ConfigMap> {
    if reload {
        client.load_model(model_name)?;
    }
    let config = match client.get_config(model_name, retries) {
        Ok(config) => config,
        Err(e) => {
            if reload {
                if let Err(unload) = client.unload_model(model_name) {
                    warn!("Could not unload {} after failed fetch: {}", model_name, unload);
                }
            }
            return Err(e.into());
        }
    };
    debug!("Server reported config for {}", model_name);
    if reload {
        client.unload_model(model_name)?;
    }
    Ok(config)
}


#[cfg(test)]
mod tests {
    use super::testing::{config_map, RecordingClient};
    use super::*;
    use serde_json::json;
    use st_types::StError;

    fn loader() -> Arc<dyn ConfigLoader> {
        let configs =
            InMemoryLoader::new().with_config("bert", config_map(json!({"max_batch_size": 4})));
        Arc::new(configs)
    }

    #[test]
    fn repository_config_wins() {
        let client = Arc::new(RecordingClient::default());
        let ctx = SearchContext::new(SearchConfig::new(), loader()).with_client(client.clone());
        let config = ctx.resolve_base_config("bert").unwrap();
        assert_eq!(config, config_map(json!({"max_batch_size": 4})));
        assert!(client.calls().is_empty());
    }

    #[test]
    fn missing_config_falls_back_to_server() {
        let client = Arc::new(RecordingClient::with_config(config_map(
            json!({"name": "gpt", "max_batch_size": 0}),
        )));
        let ctx = SearchContext::new(SearchConfig::new(), loader()).with_client(client.clone());
        let config = ctx.resolve_base_config("gpt").unwrap();
        assert_eq!(config, config_map(json!({"name": "gpt", "max_batch_size": 0})));
        assert_eq!(
            client.calls(),
            vec!["load gpt", "get_config gpt 50", "unload gpt"]
        );
    }

    #[test]
    fn missing_config_without_fallback_is_fatal() {
        let mut config = SearchConfig::new();
        config.remote_fallback = false;
        let ctx = SearchContext::new(config, loader())
            .with_client(Arc::new(RecordingClient::default()));
        let err = ctx.resolve_base_config("gpt").unwrap_err();
        assert!(matches!(err, StError::Config(_)));
    }

    #[test]
    fn fallback_without_client_is_fatal() {
        let ctx = SearchContext::new(SearchConfig::new(), loader());
        assert!(matches!(
            ctx.resolve_base_config("gpt"),
            Err(StError::Config(_))
        ));
    }

    #[test]
    fn load_failure_propagates_without_fetching() {
        let client = RecordingClient {
            fail_load: true,
            ..RecordingClient::default()
        };
        let err = fetch_server_config(&client, "gpt", 3, true).unwrap_err();
        assert!(matches!(err, StError::Client(ClientError::LoadFailed { .. })));
        assert_eq!(client.calls(), vec!["load gpt"]);
    }

    #[test]
    fn no_reload_skips_load_and_unload() {
        let client = RecordingClient::default();
        fetch_server_config(&client, "gpt", 7, false).unwrap();
        assert_eq!(client.calls(), vec!["get_config gpt 7"]);
    }

    #[test]
    fn unload_failure_propagates() {
        let client = RecordingClient {
            fail_unload: true,
            ..RecordingClient::default()
        };
        let err = fetch_server_config(&client, "gpt", 3, true).unwrap_err();
        assert!(matches!(err, StError::Client(ClientError::UnloadFailed { .. })));
        assert_eq!(client.calls(), vec!["load gpt", "get_config gpt 3", "unload gpt"]);
    }

    #[test]
    fn fetch_failure_still_unloads_and_keeps_fetch_error() {
        let client = RecordingClient {
            fail_get: true,
            fail_unload: true,
            ..RecordingClient::default()
        };
        let err = fetch_server_config(&client, "gpt", 5, true).unwrap_err();
        assert!(matches!(
            err,
            StError::Client(ClientError::ConfigUnavailable { retries: 5, .. })
        ));
        assert_eq!(client.calls(), vec!["load gpt", "get_config gpt 5", "unload gpt"]);
    }

    #[test]
    fn fetch_failure_without_reload_makes_no_other_calls() {
        let client = RecordingClient {
            fail_get: true,
            ..RecordingClient::default()
        };
        assert!(fetch_server_config(&client, "gpt", 1, false).is_err());
        assert_eq!(client.calls(), vec!["get_config gpt 1"]);
    }

    #[test]
    fn in_memory_loader_rejects_mismatched_name() {
        let loader = InMemoryLoader::new()
            .with_config("bert", config_map(json!({"name": "gpt", "max_batch_size": 4})));
        let err = loader.load(Path::new("models"), "bert").unwrap_err();
        assert!(matches!(err, LoaderError::Invalid { ref model, .. } if model == "bert"));
    }

    #[test]
    fn invalid_repository_config_is_fatal_even_with_fallback() {
        let loader = InMemoryLoader::new().with_config("bert", config_map(json!({"name": "gpt"})));
        let client = Arc::new(RecordingClient::default());
        let ctx =
            SearchContext::new(SearchConfig::new(), Arc::new(loader)).with_client(client.clone());
        let err = ctx.resolve_base_config("bert").unwrap_err();
        assert!(matches!(err, StError::Loader(LoaderError::Invalid { .. })));
        assert!(client.calls().is_empty());
    }
}
