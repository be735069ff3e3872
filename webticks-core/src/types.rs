//! Core domain types for webticks
//!
//! These types are the wire model shared by every adapter: a recorded
//! [`Event`] and the [`BatchPayload`] that carries a drained batch of them
//! to the collection endpoint.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | One recorded occurrence (page view, custom interaction, server request) |
//! | **Batch** | The events drained from the queue for a single transmission attempt |
//! | **Flush** | Draining the queue and attempting to transmit the batch |
//! | **Requeue** | Restoring an undelivered batch to the front of the live queue |
//!
//! ## Wire format
//!
//! ```json
//! {
//!   "userId": "7c1e...",
//!   "sessionId": "91ab...",
//!   "events": [
//!     { "requestId": "...", "type": "pageview", "path": "https://example.com/", "timestamp": "..." }
//!   ],
//!   "sentAt": "2024-05-01T12:00:00Z"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================
// Event
// ============================================

/// Discriminant of an [`Event`], as written in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "pageview")]
    PageView,
    #[serde(rename = "custom")]
    Custom,
    #[serde(rename = "server_request")]
    ServerRequest,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageView => "pageview",
            EventType::Custom => "custom",
            EventType::ServerRequest => "server_request",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant-specific payload of an [`Event`].
///
/// Serialized internally tagged on `type` so the variant fields sit next to
/// the common ones in the JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    /// A page was viewed
    #[serde(rename = "pageview")]
    PageView {
        /// Absolute URL of the page
        path: String,
    },

    /// Application-defined interaction
    #[serde(rename = "custom")]
    Custom {
        /// Event label (e.g. `button_click`)
        name: String,
        /// Arbitrary key/value details
        details: serde_json::Map<String, serde_json::Value>,
        /// Current URL; `null` when the runtime has no location
        path: Option<String>,
    },

    /// Inbound request observed by a server integration
    #[serde(rename = "server_request")]
    ServerRequest {
        method: String,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<BTreeMap<String, String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<BTreeMap<String, String>>,
    },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::PageView { .. } => EventType::PageView,
            EventKind::Custom { .. } => EventType::Custom,
            EventKind::ServerRequest { .. } => EventType::ServerRequest,
        }
    }
}

/// One recorded occurrence queued for delivery.
///
/// Events are immutable: the tracker assigns `request_id` and `timestamp`
/// when it enqueues them and nothing changes them afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    request_id: String,
    #[serde(flatten)]
    kind: EventKind,
    timestamp: DateTime<Utc>,
}

impl Event {
    pub(crate) fn new(request_id: String, kind: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            request_id,
            kind,
            timestamp,
        }
    }

    /// Unique identifier of this event, used by receivers for tracing
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    /// When the event was enqueued
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The `path` field of the event, if it has one
    pub fn path(&self) -> Option<&str> {
        match &self.kind {
            EventKind::PageView { path } => Some(path),
            EventKind::Custom { path, .. } => path.as_deref(),
            EventKind::ServerRequest { path, .. } => Some(path),
        }
    }
}

// ============================================
// Server requests
// ============================================

/// Description of an inbound request, handed to
/// [`crate::Tracker::record_server_request`] by the host framework.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
}

impl ServerRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: None,
            headers: None,
        }
    }

    pub fn with_query(mut self, query: BTreeMap<String, String>) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }
}

impl From<ServerRequest> for EventKind {
    fn from(req: ServerRequest) -> Self {
        EventKind::ServerRequest {
            method: req.method,
            path: req.path,
            query: req.query,
            headers: req.headers,
        }
    }
}

// ============================================
// Batch
// ============================================

/// Body of the single POST issued per flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload {
    pub user_id: String,
    pub session_id: String,
    pub events: Vec<Event>,
    pub sent_at: DateTime<Utc>,
}

impl BatchPayload {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
