//! Tagged messages.
//!
//! An [`Intent`] is a validated JSON object tagged with its message-type
//! discriminator. Payload keys are stored in a sorted map so that
//! serialization is deterministic, which the cacher relies on for its keys.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key carrying the message type in the serialized form. Payloads cannot
/// use it.
pub const TYPE_KEY: &str = "__type";

/// A message tagged with its message-type name.
///
/// Serializes as the payload object with an extra `"__type"` key:
///
/// ```text
/// { "__type": "get-user", "id": 42 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "__type")]
    message_type: String,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl Intent {
    /// Creates an intent without validation. A [`TYPE_KEY`] entry in
    /// `payload` is dropped.
    ///
    /// Normally intents come from [`Bus::create_intent`](crate::Bus::create_intent),
    /// which runs the registered validator first and rejects that key.
    pub fn new(message_type: impl Into<String>, mut payload: Map<String, Value>) -> Self {
        payload.remove(TYPE_KEY);
        Self {
            message_type: message_type.into(),
            payload,
        }
    }

    /// Returns the message-type discriminator.
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Returns the payload object (without the discriminator).
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Returns one payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Decodes the payload into a typed value.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }

    /// Returns the canonical JSON form used for hashing and logging.
    pub fn to_json(&self) -> Value {
        let mut object = self.payload.clone();
        object.insert(TYPE_KEY.to_string(), Value::String(self.message_type.clone()));
        Value::Object(object)
    }
}
