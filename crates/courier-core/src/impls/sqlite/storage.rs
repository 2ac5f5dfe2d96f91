//! SqliteDataStorage - Published / Received の SQLite 実装
//!
//! # 実装
//! - 各操作はプール接続 1 本で完結する短い unit of work
//! - `DbTransaction::Sqlite` が渡された場合は呼び出し側の接続で実行する
//! - `change_publish_state_to_delayed` は全チャンクを 1 トランザクションで更新する
//! - `schedule_messages_of_delayed` は `BEGIN IMMEDIATE` で書き込みロックを先に取る

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::monitoring::SqliteMonitoringApi;
use super::sql::{MessageTableSql, SqlTemplates, TableNames};
use super::{after, before, to_millis, MessageRow};
use crate::domain::{
    MediumMessage, Message, MessageId, MessageType, StatusName, StoreError,
};
use crate::ports::{
    Clock, DataStorage, DbTransaction, IdGenerator, MonitoringApi, ScheduleHandler, ScheduleWindow,
    Serializer, FAILED_MESSAGE_RETENTION, RETRY_BATCH_SIZE,
};

/// `IN (...)` 1 文あたりの ID 数
const DELAYED_UPDATE_CHUNK: usize = 500;

/// SELECT より前に書き込みロックを取る。競合側は busy_timeout まで待ってから読み直す
const BEGIN_CLAIM: &str = "BEGIN IMMEDIATE";

/// Store-wide settings taken from the storage options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Version tag written on every row and required by the selectors.
    pub version: String,
    /// Rows with `Retries >= failed_retry_count` are never selected for retry.
    pub failed_retry_count: u32,
}

pub struct SqliteDataStorage {
    pool: SqlitePool,
    sql: Arc<SqlTemplates>,
    settings: StoreSettings,
    clock: Arc<dyn Clock>,
    id_generator: Arc<dyn IdGenerator>,
    serializer: Arc<dyn Serializer>,
    monitoring: Arc<SqliteMonitoringApi>,
}

impl SqliteDataStorage {
    pub fn new(
        pool: SqlitePool,
        tables: &TableNames,
        settings: StoreSettings,
        clock: Arc<dyn Clock>,
        id_generator: Arc<dyn IdGenerator>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        let sql = Arc::new(SqlTemplates::new(tables));
        let monitoring = Arc::new(SqliteMonitoringApi::from_parts(
            pool.clone(),
            sql.clone(),
            clock.clone(),
            serializer.clone(),
        ));
        Self {
            pool,
            sql,
            settings,
            clock,
            id_generator,
            serializer,
            monitoring,
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_received(
        &self,
        id: MessageId,
        name: &str,
        group: &str,
        content: &str,
        retries: u32,
        added: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        status: StatusName,
    ) -> Result<(), StoreError> {
        sqlx::query(&self.sql.received.insert)
            .bind(id.as_i64())
            .bind(self.settings.version.as_str())
            .bind(name)
            .bind(group)
            .bind(content)
            .bind(i64::from(retries))
            .bind(to_millis(added))
            .bind(expires_at.map(to_millis))
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_state(
        &self,
        sql: &MessageTableSql,
        message: &MediumMessage,
        state: StatusName,
        transaction: DbTransaction<'_>,
    ) -> Result<(), StoreError> {
        let content = self.serializer.serialize(&message.origin)?;
        let query = sqlx::query(&sql.update_state)
            .bind(content)
            .bind(i64::from(message.retries))
            .bind(message.expires_at.map(to_millis))
            .bind(state.as_str())
            .bind(message.db_id.as_i64());

        let rows = execute_with(&self.pool, query, transaction).await?;
        tracing::debug!(id = %message.db_id, state = %state, rows, "message state changed");
        Ok(())
    }

    async fn messages_of_need_retry(
        &self,
        sql: &MessageTableSql,
        lookback: Duration,
    ) -> Result<Vec<MediumMessage>, StoreError> {
        let cutoff = before(self.clock.now(), lookback);

        let rows: Vec<MessageRow> = sqlx::query_as(&sql.select_retry)
            .bind(i64::from(self.settings.failed_retry_count))
            .bind(self.settings.version.as_str())
            .bind(to_millis(cutoff))
            .bind(StatusName::Failed.as_str())
            .bind(StatusName::Scheduled.as_str())
            .bind(RETRY_BATCH_SIZE)
            .fetch_all(&self.pool)
            .await?;

        tracing::debug!(table = %sql.table, count = rows.len(), "selected messages for retry");
        rows.into_iter()
            .map(|row| row.into_medium(self.serializer.as_ref()))
            .collect()
    }
}

/// Run `query` on the caller's connection or on the pool.
async fn execute_with<'q>(
    pool: &SqlitePool,
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    transaction: DbTransaction<'_>,
) -> Result<u64, StoreError> {
    let result = match transaction {
        DbTransaction::None => query.execute(pool).await?,
        DbTransaction::Sqlite(conn) => query.execute(conn).await?,
    };
    Ok(result.rows_affected())
}

#[async_trait]
impl DataStorage for SqliteDataStorage {
    async fn store_message(
        &self,
        name: &str,
        content: &Message,
        transaction: DbTransaction<'_>,
    ) -> Result<MediumMessage, StoreError> {
        let id = content.id()?;
        let message = MediumMessage {
            db_id: id,
            origin: content.clone(),
            content: self.serializer.serialize(content)?,
            added: self.clock.now(),
            expires_at: None,
            retries: 0,
        };

        let query = sqlx::query(&self.sql.published.insert)
            .bind(id.as_i64())
            .bind(self.settings.version.as_str())
            .bind(name)
            .bind(message.content.as_str())
            .bind(0_i64)
            .bind(to_millis(message.added))
            .bind(Option::<i64>::None)
            .bind(StatusName::Scheduled.as_str());
        execute_with(&self.pool, query, transaction).await?;

        tracing::debug!(id = %id, name, "published message stored");
        Ok(message)
    }

    async fn store_received_message(
        &self,
        name: &str,
        group: &str,
        content: Message,
    ) -> Result<MediumMessage, StoreError> {
        let message = MediumMessage {
            db_id: self.id_generator.next_id(),
            content: self.serializer.serialize(&content)?,
            origin: content,
            added: self.clock.now(),
            expires_at: None,
            retries: 0,
        };

        self.insert_received(
            message.db_id,
            name,
            group,
            &message.content,
            0,
            message.added,
            None,
            StatusName::Scheduled,
        )
        .await?;

        tracing::debug!(id = %message.db_id, name, group, "received message stored");
        Ok(message)
    }

    async fn store_received_exception_message(
        &self,
        name: &str,
        group: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        let id = self.id_generator.next_id();
        let now = self.clock.now();

        self.insert_received(
            id,
            name,
            group,
            content,
            self.settings.failed_retry_count,
            now,
            Some(after(now, FAILED_MESSAGE_RETENTION)),
            StatusName::Failed,
        )
        .await?;

        tracing::debug!(id = %id, name, group, "undecodable received message stored as failed");
        Ok(())
    }

    async fn change_publish_state(
        &self,
        message: &MediumMessage,
        state: StatusName,
        transaction: DbTransaction<'_>,
    ) -> Result<(), StoreError> {
        self.update_state(&self.sql.published, message, state, transaction)
            .await
    }

    async fn change_receive_state(
        &self,
        message: &MediumMessage,
        state: StatusName,
    ) -> Result<(), StoreError> {
        self.update_state(&self.sql.received, message, state, DbTransaction::None)
            .await
    }

    async fn change_publish_state_to_delayed(&self, ids: &[MessageId]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut updated = 0;
        let mut tx = self.pool.begin().await?;
        for chunk in ids.chunks(DELAYED_UPDATE_CHUNK) {
            let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
                r#"UPDATE {} SET "StatusName" = "#,
                self.sql.published.table
            ));
            builder.push_bind(StatusName::Delayed.as_str());
            builder.push(r#" WHERE "Id" IN ("#);
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_i64());
            }
            separated.push_unseparated(")");

            updated += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        tracing::debug!(requested = ids.len(), updated, "messages moved to delayed");
        Ok(updated)
    }

    async fn get_published_messages_of_need_retry(
        &self,
        lookback: Duration,
    ) -> Result<Vec<MediumMessage>, StoreError> {
        self.messages_of_need_retry(&self.sql.published, lookback)
            .await
    }

    async fn get_received_messages_of_need_retry(
        &self,
        lookback: Duration,
    ) -> Result<Vec<MediumMessage>, StoreError> {
        self.messages_of_need_retry(&self.sql.received, lookback)
            .await
    }

    async fn schedule_messages_of_delayed(
        &self,
        window: ScheduleWindow,
        handler: &dyn ScheduleHandler,
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin_with(BEGIN_CLAIM).await?;
        let now = self.clock.now();

        let rows: Vec<MessageRow> = sqlx::query_as(&self.sql.select_delayed)
            .bind(self.settings.version.as_str())
            .bind(StatusName::Delayed.as_str())
            .bind(to_millis(after(now, window.lookahead)))
            .bind(StatusName::Queued.as_str())
            .bind(to_millis(before(now, window.lookbehind)))
            .fetch_all(&mut *tx)
            .await?;

        if rows.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let messages = rows
            .into_iter()
            .map(|row| row.into_medium(self.serializer.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let claimed = messages.len();

        if let Err(err) = handler.schedule(&mut *tx, messages).await {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback after schedule handler failure failed");
            }
            return Err(err);
        }

        tx.commit().await?;
        tracing::debug!(claimed, "delayed messages scheduled");
        Ok(claimed)
    }

    async fn delete_expires(
        &self,
        table: MessageType,
        timeout: DateTime<Utc>,
        batch_count: u32,
    ) -> Result<u64, StoreError> {
        let sql = self.sql.for_table(table);
        let result = sqlx::query(&sql.delete_expired)
            .bind(to_millis(timeout))
            .bind(StatusName::Succeeded.as_str())
            .bind(StatusName::Failed.as_str())
            .bind(i64::from(batch_count))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    fn monitoring_api(&self) -> Arc<dyn MonitoringApi> {
        self.monitoring.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::headers;
    use crate::impls::sqlite::test_support::{test_store, MAX_RETRIES, TestStore};
    use chrono::TimeDelta;
    use rstest::rstest;
    use serde_json::json;
    use sqlx::SqliteConnection;

    fn outbound(id: i64) -> Message {
        Message::outbound(MessageId::new(id), "orders.created", json!({ "order": id }))
    }

    async fn status_of(store: &TestStore, table: &str, id: MessageId) -> String {
        sqlx::query_scalar(&format!(r#"SELECT "StatusName" FROM "courier.{table}" WHERE "Id" = ?"#))
            .bind(id.as_i64())
            .fetch_one(&store.pool)
            .await
            .unwrap()
    }

    /// Insert a published row directly, bypassing the store.
    async fn insert_published(
        store: &TestStore,
        id: i64,
        version: &str,
        retries: u32,
        added: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        status: &str,
    ) {
        let content = serde_json::to_string(&outbound(id)).unwrap();
        sqlx::query(
            r#"INSERT INTO "courier.Published" ("Id", "Version", "Name", "Content", "Retries", "Added", "ExpiresAt", "StatusName")
               VALUES (?, ?, 'orders.created', ?, ?, ?, ?, ?)"#,
        )
        .bind(id)
        .bind(version)
        .bind(content)
        .bind(i64::from(retries))
        .bind(to_millis(added))
        .bind(expires_at.map(to_millis))
        .bind(status)
        .execute(&store.pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn stored_message_keeps_headers_and_reaches_succeeded() {
        let store = test_store().await;
        let message = outbound(42).with_header("test-header", "test-value");

        let mut medium = store
            .storage
            .store_message("orders.created", &message, DbTransaction::None)
            .await
            .unwrap();
        assert_eq!(medium.db_id, MessageId::new(42));
        assert_eq!(medium.retries, 0);
        assert_eq!(medium.expires_at, None);
        assert_eq!(status_of(&store, "Published", medium.db_id).await, "Scheduled");

        medium.expire_after(store.clock.now(), TimeDelta::days(1));
        store
            .storage
            .change_publish_state(&medium, StatusName::Succeeded, DbTransaction::None)
            .await
            .unwrap();

        let monitoring = store.storage.monitoring_api();
        let loaded = monitoring
            .get_published_message(MessageId::new(42))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.origin.header("test-header"), Some("test-value"));
        assert_eq!(loaded.expires_at, medium.expires_at);
        assert_eq!(monitoring.published_succeeded_count().await.unwrap(), 1);
        assert_eq!(monitoring.published_failed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn store_message_requires_an_id_header() {
        let store = test_store().await;
        let message = Message::default().with_header(headers::MESSAGE_NAME, "orders.created");

        let err = store
            .storage
            .store_message("orders.created", &message, DbTransaction::None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingMessageId));
    }

    #[tokio::test]
    async fn store_message_joins_the_callers_transaction() {
        let store = test_store().await;

        let mut tx = store.pool.begin().await.unwrap();
        store
            .storage
            .store_message("orders.created", &outbound(1), DbTransaction::Sqlite(&mut *tx))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let monitoring = store.storage.monitoring_api();
        assert!(monitoring
            .get_published_message(MessageId::new(1))
            .await
            .unwrap()
            .is_none());

        let mut tx = store.pool.begin().await.unwrap();
        store
            .storage
            .store_message("orders.created", &outbound(2), (&mut *tx).into())
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert!(monitoring
            .get_published_message(MessageId::new(2))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn received_messages_get_generated_ids() {
        let store = test_store().await;

        let first = store
            .storage
            .store_received_message("orders.created", "billing", outbound(1))
            .await
            .unwrap();
        let second = store
            .storage
            .store_received_message("orders.created", "billing", outbound(1))
            .await
            .unwrap();

        assert_ne!(first.db_id, second.db_id);
        assert_eq!(status_of(&store, "Received", first.db_id).await, "Scheduled");
        let loaded = store
            .storage
            .monitoring_api()
            .get_received_message(second.db_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.origin, outbound(1));
    }

    #[tokio::test]
    async fn exception_messages_are_failed_and_never_retried() {
        let store = test_store().await;
        store
            .storage
            .store_received_exception_message("orders.created", "billing", "{not json")
            .await
            .unwrap();

        let (retries, expires_at, status): (i64, i64, String) = sqlx::query_as(
            r#"SELECT "Retries", "ExpiresAt", "StatusName" FROM "courier.Received""#,
        )
        .fetch_one(&store.pool)
        .await
        .unwrap();
        assert_eq!(retries, i64::from(MAX_RETRIES));
        assert_eq!(status, "Failed");
        assert_eq!(expires_at, to_millis(store.clock.now() + TimeDelta::days(15)));

        store.clock.advance(TimeDelta::hours(1));
        let retry = store
            .storage
            .get_received_messages_of_need_retry(Duration::ZERO)
            .await
            .unwrap();
        assert!(retry.is_empty());
    }

    #[tokio::test]
    async fn change_receive_state_reserializes_origin() {
        let store = test_store().await;
        let mut medium = store
            .storage
            .store_received_message("orders.created", "billing", outbound(1))
            .await
            .unwrap();

        medium.origin = medium.origin.with_header(headers::EXCEPTION, "boom");
        medium.increment_retries();
        store
            .storage
            .change_receive_state(&medium, StatusName::Failed)
            .await
            .unwrap();

        let loaded = store
            .storage
            .monitoring_api()
            .get_received_message(medium.db_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.origin.header(headers::EXCEPTION), Some("boom"));
        assert_eq!(loaded.retries, 1);
        assert_eq!(status_of(&store, "Received", medium.db_id).await, "Failed");
    }

    #[tokio::test]
    async fn delayed_bulk_update_counts_rows() {
        let store = test_store().await;
        for id in 1..=3 {
            store
                .storage
                .store_message("orders.created", &outbound(id), DbTransaction::None)
                .await
                .unwrap();
        }

        assert_eq!(store.storage.change_publish_state_to_delayed(&[]).await.unwrap(), 0);

        let updated = store
            .storage
            .change_publish_state_to_delayed(&[MessageId::new(1), MessageId::new(3), MessageId::new(99)])
            .await
            .unwrap();
        assert_eq!(updated, 2);
        assert_eq!(status_of(&store, "Published", MessageId::new(1)).await, "Delayed");
        assert_eq!(status_of(&store, "Published", MessageId::new(2)).await, "Scheduled");
    }

    #[tokio::test]
    async fn delayed_bulk_update_is_all_or_nothing_across_chunks() {
        let store = test_store().await;
        let now = store.clock.now();
        insert_published(&store, 1, "v1", 0, now, None, "Scheduled").await;
        insert_published(&store, 600, "v1", 0, now, None, "Scheduled").await;
        sqlx::query(
            r#"CREATE TRIGGER "reject_600" BEFORE UPDATE ON "courier.Published"
               WHEN NEW."Id" = 600 BEGIN SELECT RAISE(ABORT, 'rejected'); END"#,
        )
        .execute(&store.pool)
        .await
        .unwrap();

        // 1 は最初のチャンク、600 は 2 つ目のチャンク
        let ids: Vec<MessageId> = (1..=600).map(MessageId::new).collect();
        let err = store
            .storage
            .change_publish_state_to_delayed(&ids)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Database(_)));
        assert_eq!(status_of(&store, "Published", MessageId::new(1)).await, "Scheduled");
        assert_eq!(status_of(&store, "Published", MessageId::new(600)).await, "Scheduled");
    }

    #[rstest]
    #[case::eligible_failed(1, "v1", 0, 10, "Failed", true)]
    #[case::eligible_scheduled(2, "v1", 4, 10, "Scheduled", true)]
    #[case::lowercase_status(3, "v1", 0, 10, "failed", true)]
    #[case::retries_exhausted(4, "v1", 5, 10, "Failed", false)]
    #[case::other_version(5, "v2", 0, 10, "Failed", false)]
    #[case::too_recent(6, "v1", 0, 3, "Failed", false)]
    #[case::on_the_boundary(7, "v1", 0, 4, "Failed", false)]
    #[case::succeeded(8, "v1", 0, 10, "Succeeded", false)]
    #[case::delayed(9, "v1", 0, 10, "Delayed", false)]
    #[case::queued(10, "v1", 0, 10, "Queued", false)]
    #[tokio::test]
    async fn retry_selection_matches_the_filter(
        #[case] id: i64,
        #[case] version: &str,
        #[case] retries: u32,
        #[case] minutes_ago: i64,
        #[case] status: &str,
        #[case] expected: bool,
    ) {
        let store = test_store().await;
        let added = store.clock.now() - TimeDelta::minutes(minutes_ago);
        insert_published(&store, id, version, retries, added, None, status).await;

        let selected = store
            .storage
            .get_published_messages_of_need_retry(Duration::from_secs(4 * 60))
            .await
            .unwrap();

        assert_eq!(selected.iter().any(|m| m.db_id == MessageId::new(id)), expected);
        assert!(selected.len() <= 1);
    }

    #[tokio::test]
    async fn retry_selection_is_capped_per_call() {
        let store = test_store().await;
        let added = store.clock.now() - TimeDelta::hours(1);
        for id in 1..=250 {
            insert_published(&store, id, "v1", 0, added, None, "Failed").await;
        }

        let selected = store
            .storage
            .get_published_messages_of_need_retry(Duration::from_secs(4 * 60))
            .await
            .unwrap();
        assert_eq!(selected.len(), RETRY_BATCH_SIZE as usize);
    }

    /// Moves every claimed message to Queued inside the claim transaction.
    struct QueueAll {
        storage: Arc<SqliteDataStorage>,
        claimed: std::sync::Mutex<Vec<MessageId>>,
        fail: bool,
        /// 書き込み前の待ち（配送にかかる時間の代わり）
        pause: Duration,
    }

    impl QueueAll {
        fn new(store: &TestStore, fail: bool, pause: Duration) -> Self {
            // ハンドラ側は同じプールを共有する別インスタンス
            let storage = Arc::new(SqliteDataStorage::new(
                store.pool.clone(),
                &TableNames::with_prefix("courier"),
                store.storage.settings().clone(),
                Arc::new(store.clock.clone()),
                Arc::new(crate::ports::SnowflakeGenerator::new(store.clock.clone(), 2)),
                Arc::new(crate::ports::JsonSerializer),
            ));
            Self {
                storage,
                claimed: Default::default(),
                fail,
                pause,
            }
        }

        fn claimed(&self) -> Vec<MessageId> {
            self.claimed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ScheduleHandler for QueueAll {
        async fn schedule(
            &self,
            conn: &mut SqliteConnection,
            messages: Vec<MediumMessage>,
        ) -> Result<(), StoreError> {
            tokio::time::sleep(self.pause).await;
            for message in &messages {
                self.storage
                    .change_publish_state(message, StatusName::Queued, DbTransaction::Sqlite(&mut *conn))
                    .await?;
                self.claimed.lock().unwrap().push(message.db_id);
            }
            if self.fail {
                return Err(StoreError::handler("transport down"));
            }
            Ok(())
        }
    }

    async fn scheduler_fixture(fail: bool) -> (TestStore, QueueAll) {
        let store = test_store().await;
        let now = store.clock.now();
        let in_window = Some(now + TimeDelta::minutes(1));
        let beyond_window = Some(now + TimeDelta::minutes(10));
        let stale_queue = Some(now - TimeDelta::minutes(5));
        let fresh_queue = Some(now + TimeDelta::minutes(1));

        insert_published(&store, 1, "v1", 0, now, in_window, "Delayed").await;
        insert_published(&store, 2, "v1", 0, now, beyond_window, "Delayed").await;
        insert_published(&store, 3, "v1", 0, now, stale_queue, "Queued").await;
        insert_published(&store, 4, "v1", 0, now, fresh_queue, "Queued").await;
        insert_published(&store, 5, "v2", 0, now, in_window, "Delayed").await;

        let handler = QueueAll::new(&store, fail, Duration::ZERO);
        (store, handler)
    }

    #[tokio::test]
    async fn due_delayed_and_stale_queued_are_claimed_once() {
        let (store, handler) = scheduler_fixture(false).await;

        let claimed = store
            .storage
            .schedule_messages_of_delayed(ScheduleWindow::default(), &handler)
            .await
            .unwrap();

        let mut ids = handler.claimed();
        ids.sort();
        assert_eq!(claimed, 2);
        assert_eq!(ids, vec![MessageId::new(1), MessageId::new(3)]);
        assert_eq!(status_of(&store, "Published", MessageId::new(1)).await, "Queued");
        assert_eq!(status_of(&store, "Published", MessageId::new(2)).await, "Delayed");
    }

    #[tokio::test]
    async fn handler_failure_rolls_back_the_claim() {
        let (store, handler) = scheduler_fixture(true).await;

        let err = store
            .storage
            .schedule_messages_of_delayed(ScheduleWindow::default(), &handler)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Handler(_)));
        assert_eq!(status_of(&store, "Published", MessageId::new(1)).await, "Delayed");
    }

    #[tokio::test]
    async fn nothing_due_skips_the_handler() {
        let store = test_store().await;
        let handler = QueueAll::new(&store, true, Duration::ZERO);

        let claimed = store
            .storage
            .schedule_messages_of_delayed(ScheduleWindow::default(), &handler)
            .await
            .unwrap();
        assert_eq!(claimed, 0);
        assert!(handler.claimed().is_empty());
    }

    #[tokio::test]
    async fn racing_schedulers_hand_a_message_to_one_handler() {
        let store = test_store().await;
        let now = store.clock.now();
        insert_published(&store, 1, "v1", 0, now, Some(now + TimeDelta::minutes(1)), "Delayed").await;

        let first = QueueAll::new(&store, false, Duration::from_millis(200));
        let second = QueueAll::new(&store, false, Duration::from_millis(200));

        let (a, b) = tokio::join!(
            store
                .storage
                .schedule_messages_of_delayed(ScheduleWindow::default(), &first),
            store
                .storage
                .schedule_messages_of_delayed(ScheduleWindow::default(), &second),
        );

        assert_eq!(a.unwrap() + b.unwrap(), 1);
        let mut seen = first.claimed();
        seen.extend(second.claimed());
        assert_eq!(seen, vec![MessageId::new(1)]);
        assert_eq!(status_of(&store, "Published", MessageId::new(1)).await, "Queued");
    }

    #[tokio::test]
    async fn delete_expires_only_removes_expired_terminal_rows() {
        let store = test_store().await;
        let now = store.clock.now();
        let past = Some(now - TimeDelta::seconds(2));
        let future = Some(now + TimeDelta::hours(1));

        insert_published(&store, 1, "v1", 0, now, past, "Succeeded").await;
        insert_published(&store, 2, "v1", 0, now, future, "Succeeded").await;
        insert_published(&store, 3, "v1", 0, now, past, "Delayed").await;
        insert_published(&store, 4, "v1", 0, now, past, "Queued").await;
        insert_published(&store, 5, "v1", 0, now, None, "Scheduled").await;

        let mut received = store
            .storage
            .store_received_message("orders.created", "billing", outbound(1))
            .await
            .unwrap();
        received.expire_after(now, TimeDelta::seconds(-2));
        store
            .storage
            .change_receive_state(&received, StatusName::Succeeded)
            .await
            .unwrap();

        let deleted_published = store
            .storage
            .delete_expires(MessageType::Publish, now, 1000)
            .await
            .unwrap();
        let deleted_received = store
            .storage
            .delete_expires(MessageType::Subscribe, now, 1000)
            .await
            .unwrap();

        assert_eq!(deleted_published, 1);
        assert_eq!(deleted_received, 1);
        let remaining: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "courier.Published""#)
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(remaining, 4);
    }

    #[tokio::test]
    async fn delete_expires_respects_the_batch_size() {
        let store = test_store().await;
        let now = store.clock.now();
        for id in 1..=5 {
            insert_published(&store, id, "v1", 0, now, Some(now - TimeDelta::days(1)), "Failed").await;
        }

        let first = store
            .storage
            .delete_expires(MessageType::Publish, now, 3)
            .await
            .unwrap();
        let second = store
            .storage
            .delete_expires(MessageType::Publish, now, 3)
            .await
            .unwrap();
        assert_eq!((first, second), (3, 2));
    }
}
