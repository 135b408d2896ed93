//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use missive_core::BusKind;
use missive_middleware::{
    CacheAdapter, CachePolicy, Cacher, HmacSha256Signer, HttpClient, HttpMethod, KeyFn, Lock,
    LockOptions, LockOverrides, RetryConfig, RetryOverrides, RetryPolicy, Sleeper,
    WaitingAlgorithm, Webhook, WebhookEndpoint, WebhookIntent,
};
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissiveConfig {
    pub logging: LoggingConfig,
    pub retry: RetrySection,
    pub lock: LockConfig,
    pub cache: CacheConfig,
    pub webhook: WebhookConfig,
    pub buses: BusesConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line format of emitted logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    Json,
}

/// Where logs are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// How much of each dispatch reaches the logs.
///
/// Dispatches run inside a DEBUG `dispatch` span in `missive_core`, and
/// middleware chain events are DEBUG events in `missive_middleware`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchTracing {
    /// Missive targets follow `level`.
    #[default]
    Inherit,
    /// Only warnings and errors from Missive targets.
    Quiet,
    /// Chain events (cache hits, lock waits, retries) at DEBUG.
    Events,
    /// `Events` plus one line when each span opens and closes.
    Spans,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub dispatch: DispatchTracing,
    /// Per-target levels, e.g. `missive_middleware = "debug"`. Applied after
    /// `dispatch`.
    pub filters: BTreeMap<String, LogLevel>,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Log file, used when `output` is `file`.
    pub file_path: Option<PathBuf>,
    pub span_events: SpanEventConfig,
    pub thread_ids: bool,
    /// Include file and line of each event.
    pub file_location: bool,
}

// =============================================================================
// Retry
// =============================================================================

/// `retry` section: global retryer policy plus per-type overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub waiting_algorithm: WaitingAlgorithm,
    pub multiplier: f64,
    pub jitter: f64,
    pub intents: BTreeMap<String, RetryOverrides>,
}

impl Default for RetrySection {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            waiting_algorithm: defaults.waiting_algorithm,
            multiplier: defaults.multiplier,
            jitter: defaults.jitter,
            intents: BTreeMap::new(),
        }
    }
}

impl RetrySection {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            waiting_algorithm: self.waiting_algorithm,
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }

    pub fn to_policy(&self) -> RetryPolicy {
        self.intents
            .iter()
            .fold(RetryPolicy::new(self.to_retry_config()), |policy, (ty, o)| {
                policy.with_intent(ty.clone(), o.clone())
            })
    }
}

// =============================================================================
// Lock
// =============================================================================

/// Per-type lock timing, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockIntentConfig {
    pub ttl_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub tick_ms: Option<u64>,
}

/// `lock` section. Key functions are code, so only timing lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub ttl_ms: u64,
    pub timeout_ms: u64,
    pub tick_ms: u64,
    pub intents: BTreeMap<String, LockIntentConfig>,
}

impl Default for LockConfig {
    fn default() -> Self {
        let defaults = LockOptions::default();
        Self {
            ttl_ms: duration_ms(defaults.ttl),
            timeout_ms: duration_ms(defaults.timeout),
            tick_ms: duration_ms(defaults.tick),
            intents: BTreeMap::new(),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl LockConfig {
    pub fn to_options(&self) -> LockOptions {
        LockOptions {
            ttl: Duration::from_millis(self.ttl_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            tick: Duration::from_millis(self.tick_ms),
        }
    }

    /// Builds a lock middleware keyed by `key_fn` with these timings.
    pub fn build(&self, key_fn: KeyFn) -> Lock {
        self.intents.iter().fold(
            Lock::with_key_fn(key_fn).options(self.to_options()),
            |lock, (ty, o)| {
                lock.with_intent(
                    ty.clone(),
                    LockOverrides {
                        ttl: o.ttl_ms.map(Duration::from_millis),
                        timeout: o.timeout_ms.map(Duration::from_millis),
                        tick: o.tick_ms.map(Duration::from_millis),
                        key_fn: None,
                    },
                )
            },
        )
    }
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheIntentConfig {
    pub ttl_secs: Option<u64>,
}

/// `cache` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub policy: CachePolicy,
    pub default_ttl_secs: u64,
    pub intents: BTreeMap<String, CacheIntentConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: CachePolicy::All,
            default_ttl_secs: missive_middleware::DEFAULT_CACHE_TTL.as_secs(),
            intents: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn build(&self, adapter: Arc<dyn CacheAdapter>) -> Cacher {
        let cacher = Cacher::new(adapter)
            .policy(self.policy)
            .default_ttl(Duration::from_secs(self.default_ttl_secs));
        self.intents.iter().fold(cacher, |cacher, (ty, intent)| match intent.ttl_secs {
            Some(secs) => cacher.intent_ttl(ty.clone(), Duration::from_secs(secs)),
            None => cacher,
        })
    }
}

// =============================================================================
// Webhook
// =============================================================================

/// One webhook target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    /// Header for the signature; a default name is used when unset.
    pub signature_header: Option<String>,
    /// Shared secret; when set, payloads are signed with HMAC-SHA256.
    pub secret: Option<String>,
}

impl EndpointConfig {
    pub fn to_endpoint(&self) -> WebhookEndpoint {
        let endpoint = self
            .headers
            .iter()
            .fold(WebhookEndpoint::new(&self.url).method(self.method), |e, (k, v)| {
                e.header(k, v)
            });
        match &self.secret {
            Some(secret) => {
                let header = self
                    .signature_header
                    .clone()
                    .unwrap_or_else(|| endpoint.signature_header.clone());
                endpoint.signed(header, HmacSha256Signer::new(secret))
            }
            None => endpoint,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookIntentConfig {
    pub endpoints: Vec<EndpointConfig>,
    pub retry: RetryOverrides,
    pub parallel: Option<bool>,
    pub detached: Option<bool>,
}

/// `webhook` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub retry: RetryConfig,
    pub parallel: bool,
    pub detached: bool,
    pub intents: BTreeMap<String, WebhookIntentConfig>,
}

impl WebhookConfig {
    pub fn build(&self, client: Arc<dyn HttpClient>, sleeper: Arc<dyn Sleeper>) -> Webhook {
        let webhook = Webhook::new(client)
            .retry(self.retry.clone())
            .parallel(self.parallel)
            .detached(self.detached)
            .sleeper(sleeper);
        self.intents.iter().fold(webhook, |webhook, (ty, cfg)| {
            let intent = WebhookIntent {
                endpoints: cfg.endpoints.iter().map(EndpointConfig::to_endpoint).collect(),
                retry: cfg.retry.clone(),
                parallel: cfg.parallel,
                detached: cfg.detached,
            };
            webhook.with_intent(ty.clone(), intent)
        })
    }
}

// =============================================================================
// Buses
// =============================================================================

/// Middlewares that can be built from configuration alone.
///
/// Unknown names fail extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MiddlewareName {
    Logger,
    Retryer,
    Cacher,
    Webhook,
}

impl MiddlewareName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logger => "logger",
            Self::Retryer => "retryer",
            Self::Cacher => "cacher",
            Self::Webhook => "webhook",
        }
    }

    /// Whether this middleware may be installed on a bus of `kind`.
    pub fn allowed_on(&self, kind: BusKind) -> bool {
        !matches!(self, Self::Cacher) || kind == BusKind::Query
    }
}

impl fmt::Display for MiddlewareName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Middleware stack of one bus, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub middlewares: Vec<MiddlewareName>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusesConfig {
    pub query: BusConfig,
    pub command: BusConfig,
    pub event: BusConfig,
}

impl BusesConfig {
    pub fn get(&self, kind: BusKind) -> &BusConfig {
        match kind {
            BusKind::Query => &self.query,
            BusKind::Command => &self.command,
            BusKind::Event => &self.event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_mirror_middleware_defaults() {
        let config = MissiveConfig::default();
        assert_eq!(config.retry.to_retry_config(), RetryConfig::default());
        assert_eq!(config.lock.to_options(), LockOptions::default());
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_retry_policy_overrides() {
        let mut section = RetrySection::default();
        section.intents.insert(
            "pay".into(),
            RetryOverrides {
                max_attempts: Some(7),
                ..Default::default()
            },
        );
        let policy = section.to_policy();
        assert_eq!(policy.for_type("pay").max_attempts, 7);
        assert_eq!(policy.for_type("other").max_attempts, 3);
    }

    #[test]
    fn test_endpoint_signing() {
        let plain = EndpointConfig {
            url: "http://hooks.local".into(),
            ..Default::default()
        }
        .to_endpoint();
        assert!(plain.signer.is_none());

        let signed = EndpointConfig {
            url: "http://hooks.local".into(),
            secret: Some("s3cret".into()),
            signature_header: Some("x-sig".into()),
            ..Default::default()
        }
        .to_endpoint();
        assert!(signed.signer.is_some());
        assert_eq!(signed.signature_header, "x-sig");
    }

    #[test]
    fn test_cacher_only_on_query() {
        assert!(MiddlewareName::Cacher.allowed_on(BusKind::Query));
        assert!(!MiddlewareName::Cacher.allowed_on(BusKind::Event));
        assert!(MiddlewareName::Webhook.allowed_on(BusKind::Command));
    }

    #[test]
    fn test_middleware_names_deserialize() {
        let bus: BusConfig =
            serde_json::from_str(r#"{"middlewares": ["logger", "retryer", "webhook"]}"#).unwrap();
        assert_eq!(
            bus.middlewares,
            vec![
                MiddlewareName::Logger,
                MiddlewareName::Retryer,
                MiddlewareName::Webhook
            ]
        );
        assert!(serde_json::from_str::<BusConfig>(r#"{"middlewares": ["tracer"]}"#).is_err());
    }
}
