//! Foundation layer: the data model threaded through a dispatch.

pub mod envelope;
pub mod error;
pub mod intent;
pub mod stamp;

pub use envelope::Envelope;
pub use error::{
    AdapterError, AdapterResult, BoxError, DispatchError, DispatchResult, HandlerError,
    HandlerResult, TransportError, TransportResult, ValidationError,
};
pub use intent::{Intent, TYPE_KEY};
pub use stamp::{
    CacheableBody, IdentityBody, ReprocessedBody, RetriedBody, Stamp, TimingsBody,
    WebhookCalledBody, stamps,
};
