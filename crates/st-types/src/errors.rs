use thiserror::Error;

/// Main error type for the ServeTune system
#[derive(Error, Debug)]
pub enum StError {
    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Server client error: {0}")]
    Client(#[from] ClientError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors raised while reading a base model configuration from a repository
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Model config not found: {model} in {repository}")]
    NotFound { repository: String, model: String },

    #[error("Invalid model config for {model}: {message}")]
    Invalid { model: String, message: String },
}

/// Errors raised by the model server client
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to load model {model}: {message}")]
    LoadFailed { model: String, message: String },

    #[error("Failed to unload model {model}: {message}")]
    UnloadFailed { model: String, message: String },

    #[error("Could not fetch config for {model} after {retries} retries")]
    ConfigUnavailable { model: String, retries: u32 },
}

/// Result type alias for ServeTune operations
pub type StResult<T> = Result<T, StError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::StError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::StError::Config(format!($($arg)*))
    };
}
