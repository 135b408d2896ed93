//! Bus kinds.
//!
//! The three buses share one implementation; the kind is a type-level marker
//! so that kind-specific middlewares (the cacher on queries, the async
//! producer on commands and events) can only be installed where they apply.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime view of a bus kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusKind {
    Query,
    Command,
    Event,
}

impl BusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Command => "command",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-level marker for a bus kind.
pub trait MessageKind: Send + Sync + 'static {
    const KIND: BusKind;
}

/// Marker for query buses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Query;

/// Marker for command buses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Command;

/// Marker for event buses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Event;

impl MessageKind for Query {
    const KIND: BusKind = BusKind::Query;
}

impl MessageKind for Command {
    const KIND: BusKind = BusKind::Command;
}

impl MessageKind for Event {
    const KIND: BusKind = BusKind::Event;
}

/// Kinds whose messages may be handed to a producer instead of being handled
/// in-process.
pub trait ProducibleKind: MessageKind {}

impl ProducibleKind for Command {}
impl ProducibleKind for Event {}
