//! # Missive
//!
//! An in-process mediator: messages are routed through a query, a command or
//! an event bus, wrapped in an envelope of stamps, and pass through an onion
//! of middlewares before reaching their handlers.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐   ┌──────────┐   ┌────────────────────────────────────────┐   ┌──────────┐
//! │ Intent │──▶│ Envelope │──▶│ logger ▶ cacher ▶ retryer ▶ webhook ▶ │──▶│ handlers │
//! └────────┘   │ (stamps) │   │ ◀───────── after-logic unwinds ◀────── │   └──────────┘
//!              └──────────┘   └────────────────────────────────────────┘
//! ```
//!
//! - **Intent**: a typed JSON payload, validated when created
//! - **Envelope**: the intent plus an append-only list of stamps
//! - **Middlewares**: logger, retryer, lock, cacher, webhook, feature flag, mocker, async
//! - **Handlers**: async functions; a command or event may have several
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use missive::prelude::*;
//! use serde_json::json;
//!
//! let mut bus = QueryBus::new();
//! bus.register("echo", AnyInput, |env: Arc<Envelope>| async move {
//!     Ok(json!({ "out": env.message().get("in").cloned() }))
//! });
//! bus.use_logger(Logger::default()).use_cacher(Cacher::default());
//!
//! let intent = bus.create_query("echo", json!({ "in": "x" }))?;
//! let dispatched = bus.dispatch(intent).await?;
//! assert_eq!(dispatched.result, Some(json!({ "out": "x" })));
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): `missive.toml` configuration files
//! - `yaml-config`: `missive.yaml` configuration files
//! - `json-log`: JSON log lines
//! - `http-client`: reqwest-backed webhook delivery

pub use missive_core as core;
pub use missive_middleware as middleware;
pub use missive_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use missive::prelude::*;
/// ```
pub mod prelude {
    // Buses, envelopes and the middleware contract
    pub use missive_core::prelude::*;
    pub use missive_core::{BusKind, TypedHandler};

    // Middlewares and their installers
    pub use missive_middleware::{
        AsyncBusExt, AsyncMiddleware, BusMiddlewareExt, CachePolicy, Cacher, Fallback,
        FeatureFlag, Lock, Logger, Mocker, QueryBusExt, RetryConfig, Retryer, WaitingAlgorithm,
        Webhook, WebhookEndpoint, WebhookIntent,
    };

    // Runtime - configuration-driven setup
    pub use missive_runtime::{MissiveConfig, MissiveRuntime, RuntimeDeps};
}
