//! Missive Runtime - configuration and wiring for Missive buses.
//!
//! This crate provides:
//! - Layered configuration (`MissiveConfig`, `ConfigLoader`) with validation
//! - Logging setup (`LoggingBuilder`, `logging::init_from_config`)
//! - `MissiveRuntime`, which builds the query, command and event buses with
//!   the middleware stacks named in configuration
//!
//! ```toml
//! [retry]
//! max_attempts = 5
//! waiting_algorithm = "fibonacci"
//!
//! [buses.query]
//! middlewares = ["logger", "cacher"]
//!
//! [buses.command]
//! middlewares = ["logger", "retryer", "webhook"]
//!
//! [[webhook.intents.order-placed.endpoints]]
//! url = "https://hooks.example.com/orders"
//! secret = "change-me"
//! ```
//!
//! ```ignore
//! use missive_runtime::MissiveRuntime;
//!
//! let mut runtime = MissiveRuntime::load()?;
//! runtime.init_logging();
//! runtime.command_bus_mut().register("place-order", AnyInput, place_order);
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, MissiveConfig, validate_config};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{MissiveRuntime, RuntimeDeps};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for application code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
