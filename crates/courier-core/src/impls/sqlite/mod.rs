//! SQLite 実装
//!
//! `sqlx::SqlitePool` 上に各ポートを実装します。
//!
//! # 保存形式
//! - 時刻は UTC の unix ミリ秒（INTEGER）。範囲比較はすべて数値比較
//! - `StatusName` 列は `COLLATE NOCASE`
//! - 識別子は常にダブルクォート（`"courier.Published"`）

mod initializer;
mod lock;
mod monitoring;
mod sql;
mod storage;

#[cfg(test)]
pub(crate) mod test_support;

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::domain::{MediumMessage, MessageId, MessageView, StatusName, StoreError};
use crate::ports::Serializer;

pub use self::initializer::SqliteStorageInitializer;
pub use self::lock::SqliteLockCoordinator;
pub use self::monitoring::SqliteMonitoringApi;
pub use self::sql::TableNames;
pub use self::storage::{SqliteDataStorage, StoreSettings};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a pool for `connection_string` (`sqlite://path.db`, `sqlite::memory:`, ...).
///
/// ファイルが無ければ作成し、WAL モードで開きます。
pub async fn connect(connection_string: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(connection_string)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or(StoreError::InvalidTimestamp(millis))
}

fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// `at - duration`, clamped at the earliest representable time.
pub(crate) fn before(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(delta(duration))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `at + duration`, clamped at the latest representable time.
pub(crate) fn after(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at.checked_add_signed(delta(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// One row of `Published` / `Received`.
///
/// `Published` には `Group` 列が無いので `#[sqlx(default)]` で None になります。
#[derive(Debug, sqlx::FromRow)]
#[sqlx(rename_all = "PascalCase")]
pub(crate) struct MessageRow {
    pub id: i64,
    pub version: Option<String>,
    pub name: String,
    #[sqlx(default)]
    pub group: Option<String>,
    pub content: Option<String>,
    pub retries: i64,
    pub added: i64,
    pub expires_at: Option<i64>,
    pub status_name: String,
}

impl MessageRow {
    fn retries(&self) -> u32 {
        u32::try_from(self.retries.max(0)).unwrap_or(u32::MAX)
    }

    /// Deserialize the content back into a value copy.
    pub fn into_medium(self, serializer: &dyn Serializer) -> Result<MediumMessage, StoreError> {
        let retries = self.retries();
        let content = self.content.unwrap_or_default();
        Ok(MediumMessage {
            db_id: MessageId::new(self.id),
            origin: serializer.deserialize(&content)?,
            content,
            added: from_millis(self.added)?,
            expires_at: self.expires_at.map(from_millis).transpose()?,
            retries,
        })
    }

    /// 状態名は大文字小文字を問わず読み、正規の綴りで返す
    pub fn into_view(self) -> Result<MessageView, StoreError> {
        let retries = self.retries();
        let status: StatusName = self.status_name.parse()?;
        Ok(MessageView {
            id: MessageId::new(self.id),
            version: self.version,
            name: self.name,
            group: self.group,
            content: self.content,
            retries,
            added: from_millis(self.added)?,
            expires_at: self.expires_at.map(from_millis).transpose()?,
            status_name: status.to_string(),
        })
    }
}
