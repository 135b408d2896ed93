//! Per-key mutual exclusion around the downstream chain.
//!
//! The lock key is computed from the envelope. While another dispatch holds
//! the key, acquisition is retried every `tick` until `timeout` has elapsed,
//! after which the dispatch fails with [`DispatchError::LockTimeout`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use missive_core::{AdapterResult, DispatchError, DispatchResult, Envelope, Middleware, Next};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Computes the lock key of an envelope.
pub type KeyFn = Arc<dyn Fn(&Envelope) -> String + Send + Sync>;

// =============================================================================
// Adapter
// =============================================================================

/// Storage behind the lock middleware.
#[async_trait]
pub trait LockAdapter: Send + Sync + 'static {
    /// Takes `key` for `ttl`. Returns `false` while another holder has it.
    async fn acquire(&self, key: &str, ttl: Duration) -> AdapterResult<bool>;

    /// Gives `key` back.
    async fn release(&self, key: &str) -> AdapterResult<()>;
}

/// In-process lock table mapping keys to their expiry.
#[derive(Debug, Default)]
pub struct MemoryLockAdapter {
    locks: Mutex<HashMap<String, Instant>>,
}

impl MemoryLockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `key` is held and not expired.
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .lock()
            .get(key)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }
}

#[async_trait]
impl LockAdapter for MemoryLockAdapter {
    async fn acquire(&self, key: &str, ttl: Duration) -> AdapterResult<bool> {
        let now = Instant::now();
        let mut locks = self.locks.lock();
        if locks.get(key).is_some_and(|expires_at| *expires_at > now) {
            return Ok(false);
        }
        locks.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn release(&self, key: &str) -> AdapterResult<()> {
        self.locks.lock().remove(key);
        Ok(())
    }
}

// =============================================================================
// Options
// =============================================================================

/// Timing of lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// How long an acquired lock lives if never released.
    pub ttl: Duration,
    /// How long to keep trying before giving up.
    pub timeout: Duration,
    /// Pause between two acquisition attempts.
    pub tick: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(500),
            timeout: Duration::from_millis(5000),
            tick: Duration::from_millis(100),
        }
    }
}

/// Per-message-type changes to the lock behavior. Unset fields inherit.
#[derive(Clone, Default)]
pub struct LockOverrides {
    pub ttl: Option<Duration>,
    pub timeout: Option<Duration>,
    pub tick: Option<Duration>,
    pub key_fn: Option<KeyFn>,
}

impl std::fmt::Debug for LockOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockOverrides")
            .field("ttl", &self.ttl)
            .field("timeout", &self.timeout)
            .field("tick", &self.tick)
            .field("key_fn", &self.key_fn.is_some())
            .finish()
    }
}

// =============================================================================
// Guard
// =============================================================================

/// Holds an acquired key until released.
///
/// Dropping an unreleased guard (the dispatch future was cancelled) hands the
/// release to the current tokio runtime.
struct LockGuard {
    adapter: Arc<dyn LockAdapter>,
    key: String,
    released: bool,
}

impl LockGuard {
    async fn release(mut self) -> AdapterResult<()> {
        self.released = true;
        self.adapter.release(&self.key).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let adapter = Arc::clone(&self.adapter);
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = adapter.release(&key).await {
                        warn!(key = %key, error = %e, "Failed to release abandoned lock");
                    }
                });
            }
            Err(_) => warn!(key = %key, "Lock abandoned outside a runtime, left to expire"),
        }
    }
}

// =============================================================================
// Middleware
// =============================================================================

/// Serializes dispatches that share a lock key.
pub struct Lock {
    adapter: Arc<dyn LockAdapter>,
    options: LockOptions,
    key_fn: KeyFn,
    intents: HashMap<String, LockOverrides>,
}

impl Lock {
    /// Creates a lock middleware keyed by `key_fn`.
    pub fn new<F>(key_fn: F) -> Self
    where
        F: Fn(&Envelope) -> String + Send + Sync + 'static,
    {
        Self::with_key_fn(Arc::new(key_fn))
    }

    pub fn with_key_fn(key_fn: KeyFn) -> Self {
        Self {
            adapter: Arc::new(MemoryLockAdapter::new()),
            options: LockOptions::default(),
            key_fn,
            intents: HashMap::new(),
        }
    }

    pub fn adapter(mut self, adapter: Arc<dyn LockAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn options(mut self, options: LockOptions) -> Self {
        self.options = options;
        self
    }

    /// Overrides timing or key for one message type.
    pub fn with_intent(mut self, message_type: impl Into<String>, overrides: LockOverrides) -> Self {
        self.intents.insert(message_type.into(), overrides);
        self
    }

    fn resolve(&self, message_type: &str) -> (LockOptions, &KeyFn) {
        match self.intents.get(message_type) {
            Some(o) => (
                LockOptions {
                    ttl: o.ttl.unwrap_or(self.options.ttl),
                    timeout: o.timeout.unwrap_or(self.options.timeout),
                    tick: o.tick.unwrap_or(self.options.tick),
                },
                o.key_fn.as_ref().unwrap_or(&self.key_fn),
            ),
            None => (self.options, &self.key_fn),
        }
    }
}

#[async_trait]
impl Middleware for Lock {
    async fn handle(&self, envelope: Arc<Envelope>, next: Next<'_>) -> DispatchResult<()> {
        let (options, key_fn) = self.resolve(envelope.message_type());
        let key = key_fn(&envelope);
        let started = Instant::now();
        let deadline = started + options.timeout;

        loop {
            if self.adapter.acquire(&key, options.ttl).await? {
                debug!(key = %key, "Lock acquired");
                let guard = LockGuard {
                    adapter: Arc::clone(&self.adapter),
                    key: key.clone(),
                    released: false,
                };
                let outcome = next.run(Arc::clone(&envelope)).await;
                let released = guard.release().await;
                outcome?;
                released?;
                return Ok(());
            }

            if Instant::now() >= deadline {
                warn!(key = %key, "Lock not acquired before timeout");
                return Err(DispatchError::LockTimeout {
                    key,
                    waited: started.elapsed(),
                });
            }
            trace!(key = %key, "Lock contended, waiting");
            tokio::time::sleep(options.tick).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use missive_core::{AnyInput, CommandBus, HandlerError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn by_account(env: &Envelope) -> String {
        env.message()
            .get("account")
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    /// A bus whose handler records the highest concurrency it observed.
    fn slow_bus(active: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>, work: Duration) -> CommandBus {
        let active = Arc::clone(active);
        let peak = Arc::clone(peak);
        let mut bus = CommandBus::new();
        bus.register("withdraw", AnyInput, move |_env: Arc<Envelope>| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(work).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(json!("ok"))
            }
        });
        bus
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_never_overlaps() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut bus = slow_bus(&active, &peak, Duration::from_millis(200));
        bus.use_middleware(Lock::new(by_account).options(LockOptions {
            ttl: Duration::from_secs(10),
            ..Default::default()
        }));
        let bus = Arc::new(bus);

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let bus = Arc::clone(&bus);
                tokio::spawn(async move {
                    let intent = bus.create_command("withdraw", json!({"account": 1})).unwrap();
                    bus.dispatch(intent).await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let adapter = Arc::new(MemoryLockAdapter::new());
        adapter
            .acquire("1", Duration::from_secs(60))
            .await
            .unwrap();

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut bus = slow_bus(&active, &peak, Duration::ZERO);
        bus.use_middleware(
            Lock::new(by_account)
                .adapter(adapter.clone())
                .options(LockOptions {
                    timeout: Duration::from_millis(300),
                    ..Default::default()
                }),
        );

        let intent = bus.create_command("withdraw", json!({"account": 1})).unwrap();
        let err = bus.dispatch(intent).await.unwrap_err();
        match err {
            DispatchError::LockTimeout { key, waited } => {
                assert_eq!(key, "1");
                assert!(waited >= Duration::from_millis(300));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert_eq!(peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_released_after_handler_error() {
        let adapter = Arc::new(MemoryLockAdapter::new());
        let mut bus = CommandBus::new();
        bus.register("fail", AnyInput, |_env: Arc<Envelope>| async move {
            Err::<serde_json::Value, _>(HandlerError::msg("nope"))
        });
        bus.use_middleware(Lock::new(|_env: &Envelope| "global".to_string()).adapter(adapter.clone()));

        let intent = bus.create_command("fail", json!({})).unwrap();
        assert!(bus.dispatch(intent).await.is_err());
        assert!(!adapter.is_locked("global"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_dispatch_releases_before_ttl() {
        let adapter = Arc::new(MemoryLockAdapter::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut bus = slow_bus(&active, &peak, Duration::from_secs(10));
        bus.use_middleware(
            Lock::new(by_account)
                .adapter(adapter.clone())
                .options(LockOptions {
                    ttl: Duration::from_secs(60),
                    timeout: Duration::from_millis(50),
                    tick: Duration::from_millis(10),
                }),
        );
        let started = Instant::now();

        let intent = bus.create_command("withdraw", json!({"account": 1})).unwrap();
        let cancelled = tokio::time::timeout(Duration::from_millis(100), bus.dispatch(intent)).await;
        assert!(cancelled.is_err());

        tokio::task::yield_now().await;
        assert!(!adapter.is_locked("1"));

        let intent = bus.create_command("withdraw", json!({"account": 1})).unwrap();
        let dispatched = bus.dispatch(intent).await.unwrap();
        assert_eq!(dispatched.result, Some(json!("ok")));
        assert!(started.elapsed() < Duration::from_secs(60));
        assert!(!adapter.is_locked("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_adapter_expiry() {
        let adapter = MemoryLockAdapter::new();
        assert!(adapter.acquire("k", Duration::from_millis(500)).await.unwrap());
        assert!(!adapter.acquire("k", Duration::from_millis(500)).await.unwrap());

        tokio::time::advance(Duration::from_millis(501)).await;
        assert!(adapter.acquire("k", Duration::from_millis(500)).await.unwrap());

        adapter.release("k").await.unwrap();
        assert!(!adapter.is_locked("k"));
    }

    #[test]
    fn test_intent_overrides() {
        let lock = Lock::new(by_account).with_intent(
            "transfer",
            LockOverrides {
                tick: Some(Duration::from_millis(10)),
                key_fn: Some(Arc::new(|_env: &Envelope| "transfers".to_string())),
                ..Default::default()
            },
        );
        let (options, _) = lock.resolve("transfer");
        assert_eq!(options.tick, Duration::from_millis(10));
        assert_eq!(options.ttl, Duration::from_millis(500));
        assert_eq!(lock.resolve("other").0, LockOptions::default());
    }
}
