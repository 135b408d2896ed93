//! The envelope threaded through one dispatch.
//!
//! An [`Envelope`] pairs an immutable [`Intent`] with an append-only stamp log.
//! It is shared as `Arc<Envelope>` between the middlewares and handlers of a
//! dispatch; appends go through a mutex because fan-out handlers run
//! concurrently against the same envelope.

use parking_lot::Mutex;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::Value;

use super::intent::Intent;
use super::stamp::{IdentityBody, Stamp, stamps};

/// A message plus its ordered stamp log.
#[derive(Debug)]
pub struct Envelope {
    message: Intent,
    stamps: Mutex<Vec<Stamp>>,
}

impl Envelope {
    /// Creates an envelope with an empty stamp log.
    pub fn new(message: Intent) -> Self {
        Self {
            message,
            stamps: Mutex::new(Vec::new()),
        }
    }

    /// Returns the message carried by this envelope.
    pub fn message(&self) -> &Intent {
        &self.message
    }

    /// Shortcut for `self.message().message_type()`.
    pub fn message_type(&self) -> &str {
        self.message.message_type()
    }

    /// Appends a stamp.
    pub fn add_stamp(&self, stamp_type: impl Into<String>, body: Option<Value>) {
        self.stamps.lock().push(Stamp::new(stamp_type, body));
    }

    /// Appends a stamp whose body is the JSON form of `body`.
    ///
    /// A body that fails to serialize is recorded as `null`.
    pub fn add_stamp_with<T: Serialize>(&self, stamp_type: impl Into<String>, body: &T) {
        let body = serde_json::to_value(body).unwrap_or(Value::Null);
        self.add_stamp(stamp_type, Some(body));
    }

    /// Returns a snapshot of all stamps in insertion order.
    pub fn stamps(&self) -> Vec<Stamp> {
        self.stamps.lock().clone()
    }

    /// Returns every stamp of the given type, in insertion order.
    pub fn stamps_of_type(&self, stamp_type: &str) -> Vec<Stamp> {
        self.stamps
            .lock()
            .iter()
            .filter(|s| s.is(stamp_type))
            .cloned()
            .collect()
    }

    /// Returns the earliest stamp of the given type.
    pub fn first_stamp(&self, stamp_type: &str) -> Option<Stamp> {
        self.stamps.lock().iter().find(|s| s.is(stamp_type)).cloned()
    }

    /// Returns the latest stamp of the given type.
    pub fn last_stamp(&self, stamp_type: &str) -> Option<Stamp> {
        self.stamps
            .lock()
            .iter()
            .rev()
            .find(|s| s.is(stamp_type))
            .cloned()
    }

    /// Counts the stamps of the given type.
    pub fn count_stamps(&self, stamp_type: &str) -> usize {
        self.stamps.lock().iter().filter(|s| s.is(stamp_type)).count()
    }

    /// Returns `true` if at least one stamp of the given type exists.
    pub fn has_stamp(&self, stamp_type: &str) -> bool {
        self.stamps.lock().iter().any(|s| s.is(stamp_type))
    }

    /// Returns the id carried by the identity stamp.
    pub fn identity(&self) -> Option<String> {
        self.first_stamp(stamps::IDENTITY)
            .and_then(|s| s.body_as::<IdentityBody>())
            .map(|b| b.id)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let stamps = self.stamps();
        let mut state = serializer.serialize_struct("Envelope", 2)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("stamps", &stamps)?;
        state.end()
    }
}
