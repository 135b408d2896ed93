//! Message handlers.
//!
//! A [`Handler`] receives the shared envelope and returns a JSON result that
//! the bus records as a `handled` stamp. Any async closure taking an
//! `Arc<Envelope>` is a handler; [`TypedHandler`] adapts closures that work on
//! a typed input and output instead.
//!
//! ```rust,ignore
//! bus.register("echo", AnyInput, |env: Arc<Envelope>| async move {
//!     Ok::<_, HandlerError>(json!({ "out": env.message().get("in") }))
//! });
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::foundation::{Envelope, HandlerError, HandlerResult};

/// A type alias for a boxed, pinned future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A type-erased handler that can be stored in the registry.
pub type BoxedHandler = Arc<dyn Handler>;

/// Handles one message type.
pub trait Handler: Send + Sync + 'static {
    /// Handles the message carried by `envelope`.
    fn handle(&self, envelope: Arc<Envelope>) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, envelope: Arc<Envelope>) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(envelope))
    }
}

// ============================================================================
// TypedHandler
// ============================================================================

/// Wraps a closure over a typed input `I` and output `R`.
///
/// The payload is decoded into `I` before the call and the returned `R` is
/// encoded to JSON afterwards; both conversions surface as [`HandlerError`].
pub struct TypedHandler<F, I, R> {
    f: F,
    _marker: PhantomData<fn(I) -> R>,
}

impl<F, I, R> TypedHandler<F, I, R> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<F, Fut, I, R> Handler for TypedHandler<F, I, R>
where
    F: Fn(I, Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    fn handle(&self, envelope: Arc<Envelope>) -> BoxFuture<'static, HandlerResult> {
        let input = match envelope.message().parse::<I>() {
            Ok(input) => input,
            Err(e) => {
                let err = HandlerError::from(e);
                return Box::pin(async move { Err(err) });
            }
        };
        let fut = (self.f)(input, envelope);
        Box::pin(async move {
            let output = fut.await?;
            Ok(serde_json::to_value(output)?)
        })
    }
}
