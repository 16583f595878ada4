//! Typed domain events pushed to browsers over the events stream.
//!
//! Each event serializes to one SSE frame: `data: <JSON>\n\n`, with the kind
//! carried inside the JSON body rather than an SSE `event:` field, so a
//! single `onmessage` handler on the client sees everything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What happened, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// First event on every new connection, confirming the stream is live.
    Connected,
    ActivityCreated,
    ActivityUpdated,
    AssignmentChanged,
    PresenceUpdated,
    /// Periodic no-op keeping intermediaries from closing idle connections.
    Heartbeat,
}

/// A domain event as delivered to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub kind: EventKind,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    /// The user who triggered the event, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl DomainEvent {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: Utc::now(),
            actor: None,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn connected(connection_id: &str) -> Self {
        Self::new(
            EventKind::Connected,
            serde_json::json!({ "connection_id": connection_id }),
        )
    }

    pub fn heartbeat() -> Self {
        Self::new(EventKind::Heartbeat, serde_json::json!({}))
    }

    /// Render the JSON line placed in the SSE `data:` field.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
