//! # Missive Core
//!
//! The in-process mediator at the heart of Missive.
//!
//! Application code describes *what* must happen as a typed message (an
//! [`Intent`]) and dispatches it on a bus; the bus finds *who* handles it in a
//! name-keyed registry and runs it through an ordered middleware chain.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! The data model threaded through a dispatch:
//! - **Intent**: a JSON payload tagged with its message type ([`Intent`])
//! - **Stamps**: an append-only, timestamped metadata log ([`Stamp`], [`stamps`])
//! - **Envelope**: an intent plus its stamps, shared as `Arc<Envelope>` ([`Envelope`])
//! - **Errors**: [`DispatchError`] and the collaborator errors it wraps
//!
//! ### Bus Layer
//!
//! Registration and dispatch:
//! - **Bus**: registry plus dispatcher, one per kind ([`QueryBus`], [`CommandBus`], [`EventBus`])
//! - **Handlers and validators**: [`Handler`], [`Validator`], [`TypedHandler`], [`Schema`]
//! - **Middleware chain**: [`Middleware`] and the [`Next`] continuation
//!
//! ## The Onion
//!
//! ```text
//!  dispatch ──▶ logger ──▶ retryer ──▶ lock ──▶ handlers
//!                  ◀──────────◀───────────◀──────┘
//! ```
//!
//! Every middleware sees the envelope on the way in and again on the way out.
//! The handlers' results are appended as `handled` stamps; the dispatch
//! returns them as a [`Dispatched`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use missive_core::prelude::*;
//! use serde_json::json;
//!
//! let mut bus = QueryBus::new();
//! bus.register("echo", AnyInput, |env: Arc<Envelope>| async move {
//!     Ok::<_, HandlerError>(json!({ "out": env.message().get("in") }))
//! });
//!
//! let intent = bus.create_query("echo", json!({ "in": "x" }))?;
//! let dispatched = bus.dispatch(intent).await?;
//! assert_eq!(dispatched.result, Some(json!({ "out": "x" })));
//! ```

pub mod bus;
pub mod foundation;

pub use bus::{
    AnyInput, BoxFuture, BoxedHandler, BoxedMiddleware, Bus, BusKind, Command, CommandBus,
    Dispatched, Event, EventBus, Handler, MessageKind, Middleware, Next, ProducibleKind, Query,
    QueryBus, Schema, TypedHandler, Validator,
};
pub use foundation::{
    AdapterError, AdapterResult, BoxError, CacheableBody, DispatchError, DispatchResult, Envelope,
    HandlerError, HandlerResult, IdentityBody, Intent, ReprocessedBody, RetriedBody, Stamp,
    TYPE_KEY, TimingsBody, TransportError, TransportResult, ValidationError, WebhookCalledBody,
    stamps,
};

/// Commonly used types.
pub mod prelude {
    pub use std::sync::Arc;

    pub use async_trait::async_trait;

    pub use crate::{
        AnyInput, CommandBus, DispatchError, DispatchResult, Dispatched, Envelope, EventBus,
        Handler, HandlerError, HandlerResult, Intent, Middleware, Next, QueryBus, Schema, Stamp,
        Validator, stamps,
    };
}
