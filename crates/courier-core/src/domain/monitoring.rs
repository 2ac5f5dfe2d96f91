//! Monitoring views: read-only shapes returned by `MonitoringApi`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::MessageId;

/// Which message table a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Outbound (`Published` table).
    Publish,
    /// Inbound (`Received` table).
    Subscribe,
}

/// Succeeded / Failed counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsView {
    pub published_succeeded: i64,
    pub received_succeeded: i64,
    pub published_failed: i64,
    pub received_failed: i64,
}

/// Hour bucket start -> count, 24 entries, zero-filled.
pub type HourlyTimeline = BTreeMap<DateTime<Utc>, i64>;

/// Filter + page for `MonitoringApi::messages`.
///
/// 空文字列のフィルタは「指定なし」として扱います。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageQuery {
    pub message_type: MessageType,
    /// Compared case-insensitively.
    pub status_name: Option<String>,
    pub name: Option<String>,
    /// Ignored for `MessageType::Publish`.
    pub group: Option<String>,
    /// Substring match on the serialized content.
    pub content: Option<String>,
    pub current_page: u32,
    pub page_size: u32,
}

impl MessageQuery {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            status_name: None,
            name: None,
            group: None,
            content: None,
            current_page: 0,
            page_size: 20,
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.current_page) * i64::from(self.page_size)
    }
}

/// One row as shown by monitoring, content left serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: MessageId,
    pub version: Option<String>,
    pub name: String,
    pub group: Option<String>,
    pub content: Option<String>,
    pub retries: u32,
    pub added: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status_name: String,
}

/// A page of items plus the total count for the same filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedQueryResult<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub current_page: u32,
    pub page_size: u32,
}
