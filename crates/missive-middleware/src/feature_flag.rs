//! Gating message types behind feature flags.
//!
//! When the checker reports a type as disabled, a configured fallback answers
//! in place of the handlers (a `handled` stamp followed by a
//! `feature-flag-fallback` marker). Without a fallback the dispatch fails with
//! [`DispatchError::FeatureDisabled`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use missive_core::{
    BoxedHandler, DispatchError, DispatchResult, Envelope, Handler, Middleware, Next, stamps,
};
use tracing::debug;

/// Decides whether a message type is switched on.
#[async_trait]
pub trait FeatureFlagChecker: Send + Sync + 'static {
    async fn is_enabled(&self, message_type: &str) -> bool;
}

#[async_trait]
impl<F, Fut> FeatureFlagChecker for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    async fn is_enabled(&self, message_type: &str) -> bool {
        self(message_type.to_string()).await
    }
}

/// What answers a disabled message type.
#[derive(Clone)]
pub struct Fallback {
    handler: BoxedHandler,
    short_circuit: bool,
}

impl Fallback {
    pub fn new<H: Handler>(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            short_circuit: true,
        }
    }

    /// Whether to stop the chain after the fallback (the default) or to keep
    /// going.
    pub fn short_circuit(mut self, short_circuit: bool) -> Self {
        self.short_circuit = short_circuit;
        self
    }
}

/// Routes disabled message types to their fallback.
pub struct FeatureFlag {
    checker: Arc<dyn FeatureFlagChecker>,
    fallbacks: HashMap<String, Fallback>,
}

impl FeatureFlag {
    pub fn new<C: FeatureFlagChecker>(checker: C) -> Self {
        Self::from_shared(Arc::new(checker))
    }

    pub fn from_shared(checker: Arc<dyn FeatureFlagChecker>) -> Self {
        Self {
            checker,
            fallbacks: HashMap::new(),
        }
    }

    pub fn with_fallback(mut self, message_type: impl Into<String>, fallback: Fallback) -> Self {
        self.fallbacks.insert(message_type.into(), fallback);
        self
    }
}

#[async_trait]
impl Middleware for FeatureFlag {
    async fn handle(&self, envelope: Arc<Envelope>, next: Next<'_>) -> DispatchResult<()> {
        let message_type = envelope.message_type().to_string();
        if self.checker.is_enabled(&message_type).await {
            return next.run(envelope).await;
        }

        let Some(fallback) = self.fallbacks.get(&message_type) else {
            return Err(DispatchError::FeatureDisabled(message_type));
        };
        debug!(message_type = %message_type, "Feature disabled, using fallback");
        let result = fallback.handler.handle(Arc::clone(&envelope)).await?;
        envelope.add_stamp(stamps::HANDLED, Some(result));
        envelope.add_stamp(stamps::FEATURE_FLAG_FALLBACK, None);

        if fallback.short_circuit {
            return Ok(());
        }
        next.run(envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use missive_core::{AnyInput, HandlerError, QueryBus};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bus(calls: &Arc<AtomicUsize>, flag: FeatureFlag) -> QueryBus {
        let calls = Arc::clone(calls);
        let mut bus = QueryBus::new();
        for message_type in ["search", "recommend"] {
            let calls = Arc::clone(&calls);
            bus.register(message_type, AnyInput, move |_env: Arc<Envelope>| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, HandlerError>(json!("real"))
                }
            });
        }
        bus.use_middleware(flag);
        bus
    }

    fn only_search() -> FeatureFlag {
        FeatureFlag::new(|message_type: String| async move { message_type == "search" })
    }

    fn fallback() -> Fallback {
        Fallback::new(|_env: Arc<Envelope>| async move { Ok::<_, HandlerError>(json!("fallback")) })
    }

    #[tokio::test]
    async fn test_enabled_runs_handlers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bus = bus(&calls, only_search());

        let intent = bus.create_query("search", json!({})).unwrap();
        let dispatched = bus.dispatch(intent).await.unwrap();
        assert_eq!(dispatched.result, Some(json!("real")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_uses_fallback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bus = bus(&calls, only_search().with_fallback("recommend", fallback()));

        let intent = bus.create_query("recommend", json!({})).unwrap();
        let dispatched = bus.dispatch(intent).await.unwrap();

        assert_eq!(dispatched.result, Some(json!("fallback")));
        assert!(dispatched.envelope.has_stamp(stamps::FEATURE_FLAG_FALLBACK));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_without_short_circuit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bus = bus(
            &calls,
            only_search().with_fallback("recommend", fallback().short_circuit(false)),
        );

        let intent = bus.create_query("recommend", json!({})).unwrap();
        let dispatched = bus.dispatch(intent).await.unwrap();

        // The chain continues, but the handlers see the fallback's result.
        assert_eq!(dispatched.result, Some(json!("fallback")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_without_fallback_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bus = bus(&calls, only_search());

        let intent = bus.create_query("recommend", json!({})).unwrap();
        let err = bus.dispatch(intent).await.unwrap_err();
        assert!(matches!(err, DispatchError::FeatureDisabled(ref t) if t == "recommend"));
    }
}
