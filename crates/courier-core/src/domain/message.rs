//! Message envelope and the stored-message value returned by the store.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::errors::StoreError;
use super::ids::MessageId;

/// Well-known header names carried by a [`Message`].
pub mod headers {
    /// Outbound message id, decimal text of a 64-bit integer.
    pub const MESSAGE_ID: &str = "courier-msg-id";
    pub const MESSAGE_NAME: &str = "courier-msg-name";
    pub const GROUP: &str = "courier-msg-group";
    pub const SENT_TIME: &str = "courier-senttime";
    pub const EXCEPTION: &str = "courier-exception";
}

/// The payload envelope: headers + an optional JSON value.
///
/// The store never inspects it beyond the id header; it is persisted through
/// the `Serializer` port.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "Headers")]
    pub headers: BTreeMap<String, String>,

    #[serde(rename = "Value")]
    pub value: Option<serde_json::Value>,
}

impl Message {
    pub fn new(headers: BTreeMap<String, String>, value: Option<serde_json::Value>) -> Self {
        Self { headers, value }
    }

    /// Build an outbound message with the id and name headers filled in.
    pub fn outbound(id: MessageId, name: impl Into<String>, value: serde_json::Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(headers::MESSAGE_ID.to_string(), id.to_string());
        headers.insert(headers::MESSAGE_NAME.to_string(), name.into());
        Self {
            headers,
            value: Some(value),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// The id taken from the `courier-msg-id` header.
    pub fn id(&self) -> Result<MessageId, StoreError> {
        self.header(headers::MESSAGE_ID)
            .and_then(|raw| raw.parse().ok())
            .ok_or(StoreError::MissingMessageId)
    }

    pub fn name(&self) -> Option<&str> {
        self.header(headers::MESSAGE_NAME)
    }
}

/// A stored message as handed back to callers.
///
/// This is a value copy: mutating it does not touch the row until it is
/// passed back through `change_publish_state` / `change_receive_state`,
/// which re-serialize `origin` into `content`.
#[derive(Debug, Clone, PartialEq)]
pub struct MediumMessage {
    pub db_id: MessageId,
    pub origin: Message,
    pub content: String,
    pub added: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub retries: u32,
}

impl MediumMessage {
    /// Set `expires_at = now + after` (retention deadline or due time).
    pub fn expire_after(&mut self, now: DateTime<Utc>, after: TimeDelta) {
        self.expires_at = Some(now + after);
    }

    /// Count one more dispatch attempt.
    pub fn increment_retries(&mut self) {
        self.retries = self.retries.saturating_add(1);
    }
}
