//! SqliteMonitoringApi - 読み取り専用の集計クエリ
//!
//! 動的なフィルタは `sqlx::QueryBuilder` で組み立て、値はすべてバインドします。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::sql::{SqlTemplates, TableNames};
use super::{from_millis, to_millis, MessageRow};
use crate::domain::{
    HourlyTimeline, MediumMessage, MessageId, MessageQuery, MessageType, MessageView,
    PagedQueryResult, StatisticsView, StatusName, StoreError,
};
use crate::ports::{Clock, MonitoringApi, Serializer};

const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;
const TIMELINE_HOURS: i64 = 24;

pub struct SqliteMonitoringApi {
    pool: SqlitePool,
    sql: Arc<SqlTemplates>,
    clock: Arc<dyn Clock>,
    serializer: Arc<dyn Serializer>,
}

impl SqliteMonitoringApi {
    pub fn new(
        pool: SqlitePool,
        tables: &TableNames,
        clock: Arc<dyn Clock>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self::from_parts(pool, Arc::new(SqlTemplates::new(tables)), clock, serializer)
    }

    pub(crate) fn from_parts(
        pool: SqlitePool,
        sql: Arc<SqlTemplates>,
        clock: Arc<dyn Clock>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            pool,
            sql,
            clock,
            serializer,
        }
    }

    async fn get_message(
        &self,
        message_type: MessageType,
        id: MessageId,
    ) -> Result<Option<MediumMessage>, StoreError> {
        let row: Option<MessageRow> = sqlx::query_as(&self.sql.for_table(message_type).select_by_id)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row.into_medium(self.serializer.as_ref()))
            .transpose()
    }

    async fn count(&self, message_type: MessageType, status: StatusName) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar(&self.sql.for_table(message_type).count_by_status)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// `%`, `_`, `\` をエスケープした部分一致パターン
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, query: &MessageQuery) {
    builder.push(" WHERE 1 = 1");

    if let Some(status) = non_empty(&query.status_name) {
        builder.push(r#" AND "StatusName" = "#);
        builder.push_bind(status.to_string());
    }
    if let Some(name) = non_empty(&query.name) {
        builder.push(r#" AND "Name" = "#);
        builder.push_bind(name.to_string());
    }
    if query.message_type == MessageType::Subscribe {
        if let Some(group) = non_empty(&query.group) {
            builder.push(r#" AND "Group" = "#);
            builder.push_bind(group.to_string());
        }
    }
    if let Some(content) = non_empty(&query.content) {
        builder.push(r#" AND "Content" LIKE "#);
        builder.push_bind(like_pattern(content));
        builder.push(r" ESCAPE '\'");
    }
}

#[async_trait]
impl MonitoringApi for SqliteMonitoringApi {
    async fn get_published_message(
        &self,
        id: MessageId,
    ) -> Result<Option<MediumMessage>, StoreError> {
        self.get_message(MessageType::Publish, id).await
    }

    async fn get_received_message(
        &self,
        id: MessageId,
    ) -> Result<Option<MediumMessage>, StoreError> {
        self.get_message(MessageType::Subscribe, id).await
    }

    async fn get_statistics(&self) -> Result<StatisticsView, StoreError> {
        let (published_succeeded, received_succeeded, published_failed, received_failed): (
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(&self.sql.statistics)
            .bind(StatusName::Succeeded.as_str())
            .bind(StatusName::Succeeded.as_str())
            .bind(StatusName::Failed.as_str())
            .bind(StatusName::Failed.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(StatisticsView {
            published_succeeded,
            received_succeeded,
            published_failed,
            received_failed,
        })
    }

    async fn hourly_jobs(
        &self,
        message_type: MessageType,
        status: StatusName,
    ) -> Result<HourlyTimeline, StoreError> {
        let current_hour = to_millis(self.clock.now()).div_euclid(MILLIS_PER_HOUR);
        let first_hour = current_hour - (TIMELINE_HOURS - 1);

        let rows: Vec<(i64, i64)> = sqlx::query_as(&self.sql.for_table(message_type).hourly_counts)
            .bind(status.as_str())
            .bind(first_hour * MILLIS_PER_HOUR)
            .fetch_all(&self.pool)
            .await?;
        let counts: HashMap<i64, i64> = rows.into_iter().collect();

        (first_hour..=current_hour)
            .map(|hour| {
                from_millis(hour * MILLIS_PER_HOUR)
                    .map(|start| (start, counts.get(&hour).copied().unwrap_or(0)))
            })
            .collect()
    }

    async fn messages(
        &self,
        query: &MessageQuery,
    ) -> Result<PagedQueryResult<MessageView>, StoreError> {
        let sql = self.sql.for_table(query.message_type);

        let mut select: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM {}", sql.columns, sql.table));
        push_filter(&mut select, query);
        select.push(r#" ORDER BY "Added" DESC, "Id" DESC LIMIT "#);
        select.push_bind(i64::from(query.page_size));
        select.push(" OFFSET ");
        select.push_bind(query.offset());

        let rows: Vec<MessageRow> = select.build_query_as().fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(MessageRow::into_view)
            .collect::<Result<Vec<_>, _>>()?;

        let mut count: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!(r#"SELECT COUNT("Id") FROM {}"#, sql.table));
        push_filter(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        Ok(PagedQueryResult {
            items,
            total,
            current_page: query.current_page,
            page_size: query.page_size,
        })
    }

    async fn published_succeeded_count(&self) -> Result<i64, StoreError> {
        self.count(MessageType::Publish, StatusName::Succeeded).await
    }

    async fn published_failed_count(&self) -> Result<i64, StoreError> {
        self.count(MessageType::Publish, StatusName::Failed).await
    }

    async fn received_succeeded_count(&self) -> Result<i64, StoreError> {
        self.count(MessageType::Subscribe, StatusName::Succeeded).await
    }

    async fn received_failed_count(&self) -> Result<i64, StoreError> {
        self.count(MessageType::Subscribe, StatusName::Failed).await
    }
}
