//! Handing commands and events to a producer instead of their handlers.
//!
//! In producer mode an eligible envelope gets an `async` stamp and is passed
//! to a [`Producer`] (typically a queue); the handlers do not run. In consumer
//! mode, on the side that pulls envelopes back off the queue, the middleware
//! lets everything through.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use missive_core::{DispatchResult, Envelope, HandlerResult, Middleware, Next, stamps};
use tracing::debug;

/// Receives envelopes diverted from in-process handling.
#[async_trait]
pub trait Producer: Send + Sync + 'static {
    async fn produce(&self, envelope: Arc<Envelope>) -> HandlerResult<()>;
}

#[async_trait]
impl<F, Fut> Producer for F
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<()>> + Send + 'static,
{
    async fn produce(&self, envelope: Arc<Envelope>) -> HandlerResult<()> {
        self(envelope).await
    }
}

/// Per-message-type producer settings.
#[derive(Clone, Default)]
pub struct AsyncIntent {
    /// Whether this type is diverted; inherits the global default when unset.
    pub enabled: Option<bool>,
    /// A dedicated producer for this type.
    pub producer: Option<Arc<dyn Producer>>,
}

enum Mode {
    Produce {
        producer: Arc<dyn Producer>,
        enabled: bool,
        intents: HashMap<String, AsyncIntent>,
    },
    Consume,
}

/// Diverts dispatches to a producer.
pub struct AsyncMiddleware {
    mode: Mode,
}

impl AsyncMiddleware {
    /// Diverts every message type to `producer`.
    pub fn producer<P: Producer>(producer: P) -> Self {
        Self {
            mode: Mode::Produce {
                producer: Arc::new(producer),
                enabled: true,
                intents: HashMap::new(),
            },
        }
    }

    /// Passes everything through.
    pub fn consumer() -> Self {
        Self {
            mode: Mode::Consume,
        }
    }

    /// Sets whether message types without their own setting are diverted.
    pub fn enabled_by_default(mut self, enabled: bool) -> Self {
        if let Mode::Produce { enabled: e, .. } = &mut self.mode {
            *e = enabled;
        }
        self
    }

    /// Overrides the behavior for one message type. Ignored in consumer mode.
    pub fn with_intent(mut self, message_type: impl Into<String>, intent: AsyncIntent) -> Self {
        if let Mode::Produce { intents, .. } = &mut self.mode {
            intents.insert(message_type.into(), intent);
        }
        self
    }

    pub fn is_consumer(&self) -> bool {
        matches!(self.mode, Mode::Consume)
    }
}

#[async_trait]
impl Middleware for AsyncMiddleware {
    async fn handle(&self, envelope: Arc<Envelope>, next: Next<'_>) -> DispatchResult<()> {
        let Mode::Produce {
            producer,
            enabled,
            intents,
        } = &self.mode
        else {
            return next.run(envelope).await;
        };

        let intent = intents.get(envelope.message_type());
        if !intent.and_then(|i| i.enabled).unwrap_or(*enabled) {
            return next.run(envelope).await;
        }

        let producer = intent.and_then(|i| i.producer.as_ref()).unwrap_or(producer);
        debug!(message_type = %envelope.message_type(), "Handing envelope to producer");
        envelope.add_stamp(stamps::ASYNC, None);
        producer.produce(envelope).await?;
        Ok(())
    }
}
