//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building a runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A bus asks for the webhook middleware but no HTTP client is available.
    #[error("The {0} bus uses the webhook middleware but no HTTP client was provided")]
    MissingHttpClient(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
