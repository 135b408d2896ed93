//! The middleware contract and the onion chain.
//!
//! Middlewares run in registration order on the way in and in reverse order
//! on the way out. A middleware continues the chain by calling
//! [`Next::run`]; not calling it short-circuits everything downstream,
//! including the handlers.
//!
//! ```text
//!   m1 ──▶ m2 ──▶ … ──▶ mn ──▶ handlers
//!   m1 ◀── m2 ◀── … ◀── mn ◀──┘
//! ```
//!
//! [`Next`] is a copyable cursor (slice + index) rather than a stack of
//! closures. Running the same `Next` twice replays the whole downstream chain,
//! which is what the retryer relies on.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::trace;

use super::handler::BoxedHandler;
use crate::foundation::{DispatchResult, Envelope, stamps};

/// A type-erased middleware as stored by the bus.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// A pipeline stage wrapped around the handlers of a bus.
///
/// # Example
///
/// ```rust,ignore
/// struct Audit;
///
/// #[async_trait]
/// impl Middleware for Audit {
///     async fn handle(&self, envelope: Arc<Envelope>, next: Next<'_>) -> DispatchResult<()> {
///         envelope.add_stamp("audit:before", None);
///         next.run(Arc::clone(&envelope)).await?;
///         envelope.add_stamp("audit:after", None);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Processes the envelope, calling `next` to continue the chain.
    async fn handle(&self, envelope: Arc<Envelope>, next: Next<'_>) -> DispatchResult<()>;
}

/// The continuation handed to a middleware.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middlewares: &'a [BoxedMiddleware],
    handlers: &'a [BoxedHandler],
    index: usize,
}

impl<'a> Next<'a> {
    /// Creates a cursor at the start of a chain.
    pub fn new(middlewares: &'a [BoxedMiddleware], handlers: &'a [BoxedHandler]) -> Self {
        Self {
            middlewares,
            handlers,
            index: 0,
        }
    }

    /// Number of middlewares still ahead of this cursor.
    pub fn remaining(&self) -> usize {
        self.middlewares.len().saturating_sub(self.index)
    }

    /// Runs the rest of the chain.
    pub async fn run(self, envelope: Arc<Envelope>) -> DispatchResult<()> {
        match self.middlewares.get(self.index) {
            Some(middleware) => {
                let next = Next {
                    index: self.index + 1,
                    ..self
                };
                middleware.handle(envelope, next).await
            }
            None => invoke_handlers(self.handlers, envelope).await,
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("middlewares", &self.middlewares.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// The chain terminal: fans the envelope out to every handler.
///
/// Skipped entirely when an upstream middleware already answered with a
/// `handled` stamp. Handlers run concurrently; their results are stamped in
/// registration order once all of them succeeded.
async fn invoke_handlers(handlers: &[BoxedHandler], envelope: Arc<Envelope>) -> DispatchResult<()> {
    if envelope.has_stamp(stamps::HANDLED) {
        trace!("Envelope already handled upstream, skipping handlers");
        return Ok(());
    }

    let results = try_join_all(handlers.iter().map(|h| h.handle(Arc::clone(&envelope)))).await?;
    for result in results {
        envelope.add_stamp(stamps::HANDLED, Some(result));
    }
    Ok(())
}
