//! Configuration for the Missive runtime.
//!
//! Settings are layered with figment (defaults, files, `MISSIVE_*`
//! environment variables, programmatic merges) and checked by
//! [`validate_config`] before any bus is built.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BusConfig, BusesConfig, CacheConfig, CacheIntentConfig, DispatchTracing, EndpointConfig,
    LockConfig, LockIntentConfig, LogFormat, LogLevel, LogOutput, LoggingConfig,
    MiddlewareName, MissiveConfig, RetrySection, SpanEventConfig, WebhookConfig,
    WebhookIntentConfig,
};
pub use validation::validate_config;
