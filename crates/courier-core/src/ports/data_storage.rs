//! DataStorage port - Published / Received の正本（source of truth）
//!
//! DataStorage は以下を担当します：
//! - 保存（store_message / store_received_message / 例外メッセージ）
//! - 状態遷移（change_publish_state / change_receive_state / delayed 化）
//! - リトライ対象の選択（retry selector）
//! - 遅延メッセージの claim（schedule_messages_of_delayed）
//! - 期限切れの削除（delete_expires）
//!
//! # 設計原則
//! - 各操作は独立した短い unit of work。内部リトライはしない
//! - 外部トランザクションは `DbTransaction` で明示的に受け取る（outbox の同一トランザクション書き込み）
//! - 複数インスタンスが同時に retry selector を呼ぶと結果は重複しうる。
//!   重複を避けたい呼び出し側は LockCoordinator で包むこと

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::domain::{MediumMessage, Message, MessageId, MessageType, StatusName, StoreError};
use crate::ports::MonitoringApi;

/// 1 回の retry selector が返す最大件数
pub const RETRY_BATCH_SIZE: i64 = 200;

/// 初回送信中のメッセージと競合しないための猶予
pub const DEFAULT_RETRY_LOOKBACK: Duration = Duration::from_secs(4 * 60);

/// 受信時に処理できなかった（poison）メッセージの保持期間
pub const FAILED_MESSAGE_RETENTION: Duration = Duration::from_secs(15 * 24 * 60 * 60);

/// 期限切れ削除の 1 バッチあたりの既定件数
pub const DEFAULT_DELETE_BATCH: u32 = 1000;

/// 呼び出し側のトランザクション
///
/// - `None`: ストアが自分のプール接続で実行する
/// - `Sqlite`: 呼び出し側のトランザクション上で実行する（commit / rollback は呼び出し側）
pub enum DbTransaction<'a> {
    None,
    Sqlite(&'a mut SqliteConnection),
}

impl<'a> From<&'a mut SqliteConnection> for DbTransaction<'a> {
    fn from(conn: &'a mut SqliteConnection) -> Self {
        DbTransaction::Sqlite(conn)
    }
}

/// 遅延メッセージの claim 範囲
///
/// - Delayed: `ExpiresAt < now + lookahead` を claim（少し早めに拾う）
/// - Queued: `ExpiresAt < now - lookbehind` を claim（処理が止まった Queued の再 claim）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub lookahead: Duration,
    pub lookbehind: Duration,
}

impl Default for ScheduleWindow {
    fn default() -> Self {
        Self {
            lookahead: Duration::from_secs(2 * 60),
            lookbehind: Duration::from_secs(60),
        }
    }
}

/// claim したメッセージを、同じトランザクションの中で遷移させる handler
///
/// `conn` は claim に使っているトランザクションそのものです。
/// 状態変更は `DbTransaction::Sqlite(&mut *conn)` を渡して行ってください。
/// Err を返すとトランザクションは rollback され、行は次の周期に残ります。
#[async_trait]
pub trait ScheduleHandler: Send + Sync {
    async fn schedule(
        &self,
        conn: &mut SqliteConnection,
        messages: Vec<MediumMessage>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DataStorage: Send + Sync {
    /// Published に Scheduled で保存する。ID は envelope の `courier-msg-id`。
    async fn store_message(
        &self,
        name: &str,
        content: &Message,
        transaction: DbTransaction<'_>,
    ) -> Result<MediumMessage, StoreError>;

    /// Received に Scheduled で保存する。ID は IdGenerator が採番する。
    async fn store_received_message(
        &self,
        name: &str,
        group: &str,
        content: Message,
    ) -> Result<MediumMessage, StoreError>;

    /// デシリアライズできなかった受信メッセージを Failed で保存する（自動リトライ対象外）。
    async fn store_received_exception_message(
        &self,
        name: &str,
        group: &str,
        content: &str,
    ) -> Result<(), StoreError>;

    async fn change_publish_state(
        &self,
        message: &MediumMessage,
        state: StatusName,
        transaction: DbTransaction<'_>,
    ) -> Result<(), StoreError>;

    async fn change_receive_state(
        &self,
        message: &MediumMessage,
        state: StatusName,
    ) -> Result<(), StoreError>;

    /// 指定 ID を一括で Delayed にする。更新件数を返す。
    async fn change_publish_state_to_delayed(&self, ids: &[MessageId]) -> Result<u64, StoreError>;

    async fn get_published_messages_of_need_retry(
        &self,
        lookback: Duration,
    ) -> Result<Vec<MediumMessage>, StoreError>;

    async fn get_received_messages_of_need_retry(
        &self,
        lookback: Duration,
    ) -> Result<Vec<MediumMessage>, StoreError>;

    /// 期限到来した Delayed / 停滞した Queued を 1 トランザクションで claim し、handler に渡す。
    /// claim した件数を返す（0 件なら handler は呼ばれない）。
    async fn schedule_messages_of_delayed(
        &self,
        window: ScheduleWindow,
        handler: &dyn ScheduleHandler,
    ) -> Result<usize, StoreError>;

    /// `ExpiresAt < timeout` の終端状態の行を最大 `batch_count` 件削除する。
    async fn delete_expires(
        &self,
        table: MessageType,
        timeout: DateTime<Utc>,
        batch_count: u32,
    ) -> Result<u64, StoreError>;

    fn monitoring_api(&self) -> Arc<dyn MonitoringApi>;
}
