//! The bus: handler registry plus dispatcher.
//!
//! A [`Bus`] maps message-type names to a validator and a list of handlers,
//! and owns the ordered middleware list wrapped around every dispatch.
//!
//! ```rust,ignore
//! use missive_core::{AnyInput, CommandBus, Envelope, HandlerError};
//!
//! let mut bus = CommandBus::new();
//! bus.register("echo", AnyInput, |env: Arc<Envelope>| async move {
//!     Ok::<_, HandlerError>(json!({ "out": env.message().get("in") }))
//! });
//!
//! let intent = bus.create_command("echo", json!({ "in": "x" }))?;
//! let dispatched = bus.dispatch(intent).await?;
//! assert_eq!(dispatched.result, Some(json!({ "out": "x" })));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{Instrument, debug, debug_span, warn};
use uuid::Uuid;

use super::handler::{BoxedHandler, Handler, TypedHandler};
use super::kind::{Command, Event, MessageKind, Query};
use super::middleware::{BoxedMiddleware, Middleware, Next};
use super::validator::{Schema, Validator};
use crate::foundation::{
    DispatchError, DispatchResult, Envelope, HandlerResult, IdentityBody, Intent,
    ReprocessedBody, TYPE_KEY, ValidationError, stamps,
};

/// A query bus.
pub type QueryBus = Bus<Query>;
/// A command bus.
pub type CommandBus = Bus<Command>;
/// An event bus.
pub type EventBus = Bus<Event>;

struct RegistryEntry {
    validator: Arc<dyn Validator>,
    handlers: Vec<BoxedHandler>,
}

/// The outcome of a successful dispatch.
#[derive(Debug, Clone)]
pub struct Dispatched {
    /// The envelope with every stamp added during the dispatch.
    pub envelope: Arc<Envelope>,
    /// Body of the last `handled` stamp.
    pub result: Option<Value>,
    /// Bodies of all `handled` stamps, in stamp order.
    pub results: Vec<Option<Value>>,
}

impl Dispatched {
    fn from_envelope(envelope: Arc<Envelope>) -> Self {
        let results: Vec<Option<Value>> = envelope
            .stamps_of_type(stamps::HANDLED)
            .into_iter()
            .map(|s| s.body)
            .collect();
        let result = results.last().cloned().flatten();
        Self {
            envelope,
            result,
            results,
        }
    }

    /// Decodes [`result`](Self::result) into a typed value.
    pub fn result_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.result
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// A message bus of kind `K`.
///
/// Registration takes `&mut self`; dispatching takes `&self`, so a fully
/// configured bus is usually wrapped in an `Arc` and shared.
pub struct Bus<K: MessageKind> {
    registry: HashMap<String, RegistryEntry>,
    middlewares: Vec<BoxedMiddleware>,
    _kind: PhantomData<K>,
}

impl<K: MessageKind> Default for Bus<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MessageKind> Bus<K> {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            registry: HashMap::new(),
            middlewares: Vec::new(),
            _kind: PhantomData,
        }
    }

    /// Appends a middleware. Middlewares run in the order they are added.
    pub fn use_middleware<M: Middleware>(&mut self, middleware: M) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared middleware.
    pub fn use_shared(&mut self, middleware: BoxedMiddleware) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    /// Adds a middleware (builder pattern).
    pub fn with<M: Middleware>(mut self, middleware: M) -> Self {
        self.use_middleware(middleware);
        self
    }

    /// Registers a handler for `message_type`.
    ///
    /// Registering the same type again adds a fan-out handler; the validator
    /// of the first registration is kept.
    pub fn register<V, H>(&mut self, message_type: impl Into<String>, validator: V, handler: H) -> &mut Self
    where
        V: Validator,
        H: Handler,
    {
        let message_type = message_type.into();
        let entry = self
            .registry
            .entry(message_type.clone())
            .or_insert_with(|| RegistryEntry {
                validator: Arc::new(validator),
                handlers: Vec::new(),
            });
        entry.handlers.push(Arc::new(handler));
        debug!(
            kind = %K::KIND,
            message_type = %message_type,
            handlers = entry.handlers.len(),
            "Registered handler"
        );
        self
    }

    /// Registers a handler working on typed input and output.
    ///
    /// The validator is [`Schema<I>`].
    pub fn register_fn<I, R, F, Fut>(&mut self, message_type: impl Into<String>, f: F) -> &mut Self
    where
        I: DeserializeOwned + Serialize + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(I, Arc<Envelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    {
        self.register(message_type, Schema::<I>::new(), TypedHandler::new(f))
    }

    /// Returns `true` if a handler is registered for `message_type`.
    pub fn has_handler(&self, message_type: &str) -> bool {
        self.registry.contains_key(message_type)
    }

    /// Returns the number of handlers registered for `message_type`.
    pub fn handler_count(&self, message_type: &str) -> usize {
        self.registry
            .get(message_type)
            .map_or(0, |e| e.handlers.len())
    }

    /// Returns all registered message types.
    pub fn message_types(&self) -> Vec<&str> {
        self.registry.keys().map(String::as_str).collect()
    }

    /// Returns the number of installed middlewares.
    pub fn middleware_count(&self) -> usize {
        self.middlewares.len()
    }

    fn entry(&self, message_type: &str) -> DispatchResult<&RegistryEntry> {
        self.registry.get(message_type).ok_or_else(|| {
            warn!(kind = %K::KIND, message_type = %message_type, "No handler registered");
            DispatchError::UnknownMessageType(message_type.to_string())
        })
    }

    /// Validates raw input and tags it with `message_type`.
    pub fn create_intent(&self, message_type: &str, input: Value) -> DispatchResult<Intent> {
        let entry = self.entry(message_type)?;
        let parsed = entry
            .validator
            .validate(input)
            .map_err(|e| e.for_type(message_type))?;
        match parsed {
            Value::Object(payload) if payload.contains_key(TYPE_KEY) => Err(ValidationError::new(
                format!("intent payload must not contain the reserved `{TYPE_KEY}` key"),
            )
            .for_type(message_type)
            .into()),
            Value::Object(payload) => Ok(Intent::new(message_type, payload)),
            other => Err(ValidationError::new(format!(
                "intent payload must be a JSON object, got {other}"
            ))
            .for_type(message_type)
            .into()),
        }
    }

    /// Like [`create_intent`](Self::create_intent), from any serializable input.
    pub fn create_intent_from<T: Serialize>(&self, message_type: &str, input: &T) -> DispatchResult<Intent> {
        let value = serde_json::to_value(input)
            .map_err(|e| ValidationError::from(e).for_type(message_type))?;
        self.create_intent(message_type, value)
    }

    /// Dispatches an intent through the middleware chain to its handlers.
    pub async fn dispatch(&self, intent: Intent) -> DispatchResult<Dispatched> {
        let entry = self.entry(intent.message_type())?;
        let envelope = Envelope::new(intent);
        envelope.add_stamp_with(
            stamps::IDENTITY,
            &IdentityBody {
                id: Uuid::new_v4().to_string(),
            },
        );
        self.run(entry, envelope).await
    }

    /// Dispatches a previously produced envelope again.
    ///
    /// The new envelope keeps the original identity id and carries a
    /// `reprocessed` stamp holding the earlier stamps.
    pub async fn redispatch(&self, previous: &Envelope) -> DispatchResult<Dispatched> {
        let entry = self.entry(previous.message_type())?;
        let id = previous
            .identity()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let earlier: Vec<_> = previous
            .stamps()
            .into_iter()
            .filter(|s| !s.is(stamps::IDENTITY))
            .collect();

        let envelope = Envelope::new(previous.message().clone());
        envelope.add_stamp_with(stamps::IDENTITY, &IdentityBody { id });
        envelope.add_stamp_with(stamps::REPROCESSED, &ReprocessedBody { stamps: earlier });
        self.run(entry, envelope).await
    }

    async fn run(&self, entry: &RegistryEntry, envelope: Envelope) -> DispatchResult<Dispatched> {
        let span = debug_span!(
            "dispatch",
            kind = %K::KIND,
            message_type = %envelope.message_type(),
            id = %envelope.identity().unwrap_or_default(),
        );
        let envelope = Arc::new(envelope);

        async {
            debug!(middlewares = self.middlewares.len(), "Dispatching");
            Next::new(&self.middlewares, &entry.handlers)
                .run(Arc::clone(&envelope))
                .await
        }
        .instrument(span)
        .await?;

        Ok(Dispatched::from_envelope(envelope))
    }
}

impl Bus<Query> {
    /// Kind-named alias of [`create_intent`](Self::create_intent).
    pub fn create_query(&self, message_type: &str, input: Value) -> DispatchResult<Intent> {
        self.create_intent(message_type, input)
    }
}

impl Bus<Command> {
    /// Kind-named alias of [`create_intent`](Self::create_intent).
    pub fn create_command(&self, message_type: &str, input: Value) -> DispatchResult<Intent> {
        self.create_intent(message_type, input)
    }
}

impl Bus<Event> {
    /// Kind-named alias of [`create_intent`](Self::create_intent).
    pub fn create_event(&self, message_type: &str, input: Value) -> DispatchResult<Intent> {
        self.create_intent(message_type, input)
    }
}

impl<K: MessageKind> std::fmt::Debug for Bus<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("kind", &K::KIND)
            .field("message_types", &self.registry.len())
            .field("middleware_count", &self.middlewares.len())
            .finish()
    }
}
