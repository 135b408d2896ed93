//! Stamps: the append-only metadata log carried by an [`Envelope`](super::Envelope).
//!
//! Stamp type names form a stable protocol shared with logging and
//! observability consumers, so they live here as constants rather than being
//! spelled out at each call site.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known stamp type names.
pub mod stamps {
    /// Unique id of a dispatch, always the first stamp of an envelope.
    pub const IDENTITY: &str = "identity";
    /// Result of a handler (or of a middleware answering in its place).
    pub const HANDLED: &str = "handled";
    /// Attached by a handler to allow caching of its result.
    pub const CACHEABLE: &str = "cacheable";
    /// The result was served from the cache.
    pub const CACHE_HIT: &str = "cache-hit";
    /// One failed attempt observed by the retryer.
    pub const RETRIED: &str = "retried";
    /// Outcome of one webhook endpoint.
    pub const WEBHOOK_CALLED: &str = "webhook-called";
    /// Elapsed time measured by the logger.
    pub const TIMINGS: &str = "timings";
    /// The envelope was handed to a producer instead of its handlers.
    pub const ASYNC: &str = "async";
    /// A feature-flag fallback answered instead of the handlers.
    pub const FEATURE_FLAG_FALLBACK: &str = "feature-flag-fallback";
    /// Soft failure signal: the retryer retries when the count of these grows.
    pub const ERROR: &str = "error";
    /// The envelope is a re-dispatch of an earlier one.
    pub const REPROCESSED: &str = "reprocessed";
}

/// A single timestamped entry in an envelope's stamp log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamp {
    /// The stamp type, see [`stamps`].
    #[serde(rename = "type")]
    pub stamp_type: String,
    /// Optional payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// When the stamp was appended.
    pub timestamp: DateTime<Utc>,
}

impl Stamp {
    /// Creates a stamp timestamped now.
    pub fn new(stamp_type: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            stamp_type: stamp_type.into(),
            body,
            timestamp: Utc::now(),
        }
    }

    /// Returns `true` if the stamp has the given type.
    pub fn is(&self, stamp_type: &str) -> bool {
        self.stamp_type == stamp_type
    }

    /// Decodes the body into a typed value.
    ///
    /// Returns `None` when the body is absent or does not match `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.body
            .as_ref()
            .and_then(|b| serde_json::from_value(b.clone()).ok())
    }
}

// =============================================================================
// Typed stamp bodies
// =============================================================================

/// Body of an [`stamps::IDENTITY`] stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityBody {
    pub id: String,
}

/// Body of a [`stamps::CACHEABLE`] stamp. `ttl` is in seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheableBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// Body of a [`stamps::RETRIED`] stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetriedBody {
    pub attempt: u32,
    pub error_message: String,
}

/// Body of a [`stamps::WEBHOOK_CALLED`] stamp.
///
/// `status` and `response_text` are absent when every attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookCalledBody {
    pub url: String,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
}

/// Body of a [`stamps::TIMINGS`] stamp. `total` is in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingsBody {
    pub total: u64,
}

/// Body of a [`stamps::REPROCESSED`] stamp: the stamps of the earlier run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprocessedBody {
    pub stamps: Vec<Stamp>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stamp_serializes_type_key() {
        let stamp = Stamp::new(stamps::CACHE_HIT, None);
        let value = serde_json::to_value(&stamp).unwrap();
        assert_eq!(value["type"], "cache-hit");
        assert!(value.get("body").is_none());
    }

    #[test]
    fn test_body_as() {
        let stamp = Stamp::new(
            stamps::RETRIED,
            Some(json!({"attempt": 2, "errorMessage": "boom"})),
        );
        let body: RetriedBody = stamp.body_as().unwrap();
        assert_eq!(body.attempt, 2);
        assert_eq!(body.error_message, "boom");
        assert!(stamp.body_as::<TimingsBody>().is_none());
    }
}
