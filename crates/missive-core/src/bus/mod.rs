//! Bus layer: registry, handlers, validators, the middleware chain and the
//! dispatcher.

pub mod dispatcher;
pub mod handler;
pub mod kind;
pub mod middleware;
pub mod validator;

pub use dispatcher::{Bus, CommandBus, Dispatched, EventBus, QueryBus};
pub use handler::{BoxFuture, BoxedHandler, Handler, TypedHandler};
pub use kind::{BusKind, Command, Event, MessageKind, ProducibleKind, Query};
pub use middleware::{BoxedMiddleware, Middleware, Next};
pub use validator::{AnyInput, Schema, Validator};
