//! Content-addressed result caching for query buses.
//!
//! The cache key is the hex SHA-256 of the serialized intent. On a hit the
//! cached value is appended as the `handled` result, followed by a
//! `cache-hit` marker, and the rest of the chain is skipped. On a miss the
//! chain runs and its last `handled` result is stored, subject to the
//! [`CachePolicy`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use missive_core::{
    AdapterResult, CacheableBody, DispatchResult, Envelope, Intent, Middleware, Next, stamps,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default time-to-live of a cached result.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

// =============================================================================
// Adapter
// =============================================================================

/// Storage behind the cacher.
#[async_trait]
pub trait CacheAdapter: Send + Sync + 'static {
    /// Returns the live value stored under `key`.
    async fn get(&self, key: &str) -> AdapterResult<Option<Value>>;

    /// Stores `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> AdapterResult<()>;
}

/// In-process cache with lazy expiry on read.
#[derive(Debug, Default)]
pub struct MemoryCacheAdapter {
    entries: Mutex<HashMap<String, (Value, Instant)>>,
}

impl MemoryCacheAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CacheAdapter for MemoryCacheAdapter {
    async fn get(&self, key: &str) -> AdapterResult<Option<Value>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> AdapterResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}

// =============================================================================
// Middleware
// =============================================================================

/// Which results get stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Every non-null result.
    #[default]
    All,
    /// Only results whose handler attached a `cacheable` stamp.
    OnlyCacheable,
}

/// Lowercase hex SHA-256 of the intent's JSON form.
pub fn cache_key(intent: &Intent) -> String {
    let serialized = intent.to_json().to_string();
    format!("{:x}", Sha256::digest(serialized.as_bytes()))
}

/// Caches query results.
pub struct Cacher {
    adapter: Arc<dyn CacheAdapter>,
    policy: CachePolicy,
    default_ttl: Duration,
    intent_ttls: HashMap<String, Duration>,
}

impl Default for Cacher {
    fn default() -> Self {
        Self::new(Arc::new(MemoryCacheAdapter::new()))
    }
}

impl Cacher {
    pub fn new(adapter: Arc<dyn CacheAdapter>) -> Self {
        Self {
            adapter,
            policy: CachePolicy::All,
            default_ttl: DEFAULT_CACHE_TTL,
            intent_ttls: HashMap::new(),
        }
    }

    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the TTL used for one message type when the result carries none.
    pub fn intent_ttl(mut self, message_type: impl Into<String>, ttl: Duration) -> Self {
        self.intent_ttls.insert(message_type.into(), ttl);
        self
    }

    fn resolve_ttl(&self, envelope: &Envelope, cacheable: Option<&CacheableBody>) -> Duration {
        cacheable
            .and_then(|c| c.ttl)
            .map(Duration::from_secs)
            .or_else(|| self.intent_ttls.get(envelope.message_type()).copied())
            .unwrap_or(self.default_ttl)
    }
}

#[async_trait]
impl Middleware for Cacher {
    async fn handle(&self, envelope: Arc<Envelope>, next: Next<'_>) -> DispatchResult<()> {
        let key = cache_key(envelope.message());

        match self.adapter.get(&key).await {
            // A stored null is a miss, like an absent entry.
            Ok(Some(cached)) if !cached.is_null() => {
                debug!(key = %key, "Cache hit");
                envelope.add_stamp(stamps::HANDLED, Some(cached));
                envelope.add_stamp(stamps::CACHE_HIT, None);
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => warn!(key = %key, error = %e, "Cache lookup failed, treating as miss"),
        }

        next.run(Arc::clone(&envelope)).await?;

        let result = match envelope.last_stamp(stamps::HANDLED).and_then(|s| s.body) {
            Some(Value::Null) | None => return Ok(()),
            Some(result) => result,
        };
        let cacheable = envelope
            .first_stamp(stamps::CACHEABLE)
            .map(|s| s.body_as::<CacheableBody>().unwrap_or_default());
        if self.policy == CachePolicy::OnlyCacheable && cacheable.is_none() {
            return Ok(());
        }

        let ttl = self.resolve_ttl(&envelope, cacheable.as_ref());
        if let Err(e) = self.adapter.set(&key, result, ttl).await {
            warn!(key = %key, error = %e, "Cache store failed");
        }
        Ok(())
    }
}
