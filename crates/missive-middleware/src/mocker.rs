//! Stubbed results for selected message types.
//!
//! A stub runs before the rest of the chain and its result is appended as the
//! `handled` stamp. The chain still continues, so middlewares below the mocker
//! run as usual while the real handlers are skipped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use missive_core::{BoxedHandler, DispatchResult, Envelope, Handler, Middleware, Next, stamps};
use tracing::debug;

/// Replaces handlers with stubs.
#[derive(Default)]
pub struct Mocker {
    stubs: HashMap<String, BoxedHandler>,
}

impl Mocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stub<H: Handler>(mut self, message_type: impl Into<String>, stub: H) -> Self {
        self.stubs.insert(message_type.into(), Arc::new(stub));
        self
    }

    pub fn is_mocked(&self, message_type: &str) -> bool {
        self.stubs.contains_key(message_type)
    }
}

#[async_trait]
impl Middleware for Mocker {
    async fn handle(&self, envelope: Arc<Envelope>, next: Next<'_>) -> DispatchResult<()> {
        if let Some(stub) = self.stubs.get(envelope.message_type()) {
            debug!(message_type = %envelope.message_type(), "Answering with stub");
            let result = stub.handle(Arc::clone(&envelope)).await?;
            envelope.add_stamp(stamps::HANDLED, Some(result));
        }
        next.run(envelope).await
    }
}
