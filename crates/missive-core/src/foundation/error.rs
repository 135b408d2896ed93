//! Unified error types for the Missive core.
//!
//! [`DispatchError`] is what a caller sees when a dispatch fails. The more
//! specific types ([`ValidationError`], [`HandlerError`], [`AdapterError`],
//! [`TransportError`]) are produced by collaborators and wrapped on the way up.

use std::time::Duration;

use thiserror::Error;

/// Boxed error type accepted as the source of a [`HandlerError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Validation Errors
// =============================================================================

/// Raised by a [`Validator`](crate::Validator) when raw intent input does not
/// have the expected shape.
#[derive(Debug, Clone, Error)]
#[error("invalid intent for '{message_type}': {reason}")]
pub struct ValidationError {
    /// The message type whose validator rejected the input.
    pub message_type: String,
    /// Why the input was rejected.
    pub reason: String,
}

impl ValidationError {
    /// Creates a validation error. The message type is filled in by the bus
    /// when left empty.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            message_type: String::new(),
            reason: reason.into(),
        }
    }

    pub(crate) fn for_type(mut self, message_type: &str) -> Self {
        if self.message_type.is_empty() {
            self.message_type = message_type.to_string();
        }
        self
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

// =============================================================================
// Handler Errors
// =============================================================================

/// An error raised by business logic: handlers, fallbacks, stubs and producers.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl HandlerError {
    /// Creates a handler error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps any error, keeping it as the source.
    pub fn from_err<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_err(err)
    }
}

// =============================================================================
// Collaborator Errors
// =============================================================================

/// Errors raised by storage adapters (cache, lock).
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The backing store could not be reached.
    #[error("adapter unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be encoded or decoded.
    #[error("adapter serialization error: {0}")]
    Serialization(String),

    /// Any other adapter failure.
    #[error("adapter error: {0}")]
    Internal(String),
}

impl AdapterError {
    /// Creates an internal adapter error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Errors raised by the HTTP client used for webhook delivery.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request could not be sent or no response was received.
    #[error("request to {url} failed: {reason}")]
    RequestFailed {
        /// Target URL.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The request timed out.
    #[error("request to {url} timed out")]
    Timeout {
        /// Target URL.
        url: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Dispatch Errors
// =============================================================================

/// The error returned by [`Bus::create_intent`](crate::Bus::create_intent) and
/// [`Bus::dispatch`](crate::Bus::dispatch).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler was registered for the message type.
    #[error("no handler found for type: {0}")]
    UnknownMessageType(String),

    /// The raw intent input was rejected by the validator.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A handler (or a middleware acting for one) failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The lock middleware could not acquire its key in time.
    #[error("lock '{key}' not acquired after {waited:?}")]
    LockTimeout {
        /// The contended lock key.
        key: String,
        /// How long acquisition was attempted.
        waited: Duration,
    },

    /// The message type is switched off and no fallback is configured.
    #[error("intent '{0}' is not allowed and no fallback handler is configured")]
    FeatureDisabled(String),

    /// A storage adapter failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl DispatchError {
    /// Returns `true` for errors raised before any middleware runs.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::UnknownMessageType(_) | Self::Validation(_))
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Result type returned by handlers.
pub type HandlerResult<T = serde_json::Value> = Result<T, HandlerError>;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Result type for HTTP client operations.
pub type TransportResult<T> = Result<T, TransportError>;
