//! # Missive middlewares
//!
//! Middlewares that plug into the onion chain of a `missive_core` bus.
//!
//! ## Overview
//!
//! | Middleware | Buses | Purpose |
//! |------------|-------|---------|
//! | [`Logger`] | all | lifecycle records and a `timings` stamp |
//! | [`Retryer`] | all | bounded retries with backoff |
//! | [`Lock`] | all | per-key mutual exclusion |
//! | [`Cacher`] | query | content-addressed result cache |
//! | [`Webhook`] | all | HTTP notifications after success |
//! | [`FeatureFlag`] | all | gate types behind a checker, with fallbacks |
//! | [`Mocker`] | all | replace handlers with stubs |
//! | [`AsyncMiddleware`] | command, event | hand envelopes to a producer |
//!
//! Every stateful collaborator (cache store, lock store, HTTP client, log
//! sink, clock) is a trait with an in-memory or tokio default.
//!
//! ## Features
//!
//! - `http-client`: [`ReqwestHttpClient`] for webhook delivery

pub mod async_middleware;
pub mod backoff;
pub mod cacher;
pub mod ext;
pub mod feature_flag;
pub mod lock;
pub mod logger;
pub mod mocker;
pub mod retryer;
pub mod webhook;

pub use async_middleware::{AsyncIntent, AsyncMiddleware, Producer};
pub use backoff::{
    Backoff, RecordingSleeper, RetryConfig, RetryOverrides, RetryPolicy, Sleeper, TokioSleeper,
    WaitingAlgorithm,
};
pub use cacher::{CacheAdapter, CachePolicy, Cacher, DEFAULT_CACHE_TTL, MemoryCacheAdapter, cache_key};
pub use ext::{AsyncBusExt, BusMiddlewareExt, QueryBusExt};
pub use feature_flag::{Fallback, FeatureFlag, FeatureFlagChecker};
pub use lock::{KeyFn, Lock, LockAdapter, LockOptions, LockOverrides, MemoryLockAdapter};
pub use logger::{LogRecord, LogStep, Logger, LoggerAdapter, LoggerMode, TracingLoggerAdapter};
pub use mocker::Mocker;
pub use retryer::Retryer;
#[cfg(feature = "http-client")]
pub use webhook::ReqwestHttpClient;
pub use webhook::{
    HmacSha256Signer, HttpClient, HttpMethod, HttpRequest, HttpResponse, Signer, Webhook,
    WebhookEndpoint, WebhookIntent,
};
