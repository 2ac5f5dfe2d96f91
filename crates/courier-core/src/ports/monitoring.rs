//! MonitoringApi port - 読み取り専用の集計
//!
//! ダッシュボードなどのフロントエンドはこの trait だけを使います。

use async_trait::async_trait;

use crate::domain::{
    HourlyTimeline, MediumMessage, MessageId, MessageQuery, MessageType, MessageView,
    PagedQueryResult, StatisticsView, StatusName, StoreError,
};

#[async_trait]
pub trait MonitoringApi: Send + Sync {
    async fn get_published_message(
        &self,
        id: MessageId,
    ) -> Result<Option<MediumMessage>, StoreError>;

    async fn get_received_message(&self, id: MessageId)
    -> Result<Option<MediumMessage>, StoreError>;

    async fn get_statistics(&self) -> Result<StatisticsView, StoreError>;

    /// 現在時刻までの 24 時間分（1 時間ごと）の件数。該当なしの時間は 0。
    async fn hourly_jobs(
        &self,
        message_type: MessageType,
        status: StatusName,
    ) -> Result<HourlyTimeline, StoreError>;

    async fn hourly_succeeded_jobs(
        &self,
        message_type: MessageType,
    ) -> Result<HourlyTimeline, StoreError> {
        self.hourly_jobs(message_type, StatusName::Succeeded).await
    }

    async fn hourly_failed_jobs(
        &self,
        message_type: MessageType,
    ) -> Result<HourlyTimeline, StoreError> {
        self.hourly_jobs(message_type, StatusName::Failed).await
    }

    /// 新しい順のページと、同じ条件の総件数。
    async fn messages(
        &self,
        query: &MessageQuery,
    ) -> Result<PagedQueryResult<MessageView>, StoreError>;

    async fn published_succeeded_count(&self) -> Result<i64, StoreError>;

    async fn published_failed_count(&self) -> Result<i64, StoreError>;

    async fn received_succeeded_count(&self) -> Result<i64, StoreError>;

    async fn received_failed_count(&self) -> Result<i64, StoreError>;
}
