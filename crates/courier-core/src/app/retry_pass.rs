//! RetryPass - lease lock で包んだ 1 回分のリトライ処理
//!
//! # フロー
//! 1. use_storage_lock なら `<table>_retry_<version>` の lease を取得（取れなければ Skipped）
//! 2. リトライ対象を選択（最大 RETRY_BATCH_SIZE 件）
//! 3. 1 件ずつ RetryDispatcher に渡す（失敗はログに出して数えるだけ）
//! 4. lease を release（dispatcher が失敗しても必ず）

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::app::builder::Storage;
use crate::domain::{InstanceId, MediumMessage, MessageType, StoreError};
use crate::ports::{DataStorage, LockCoordinator, LockKey, DEFAULT_RETRY_LOOKBACK};

/// lease の既定 TTL
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);

/// リトライ対象を実際に再送・再実行する側
#[async_trait]
pub trait RetryDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        message_type: MessageType,
        message: MediumMessage,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPassOutcome {
    /// 他のインスタンスが lease を保持していた
    Skipped,
    Completed { selected: usize, failed: usize },
}

pub struct RetryPass {
    storage: Arc<dyn DataStorage>,
    lock: Arc<dyn LockCoordinator>,
    instance: InstanceId,
    version: String,
    use_storage_lock: bool,
    lookback: Duration,
    lock_ttl: Duration,
}

impl RetryPass {
    pub fn new(
        storage: Arc<dyn DataStorage>,
        lock: Arc<dyn LockCoordinator>,
        version: impl Into<String>,
        use_storage_lock: bool,
    ) -> Self {
        Self {
            storage,
            lock,
            instance: InstanceId::generate(),
            version: version.into(),
            use_storage_lock,
            lookback: DEFAULT_RETRY_LOOKBACK,
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn from_storage(storage: &Storage) -> Self {
        Self::new(
            storage.data.clone(),
            storage.lock.clone(),
            storage.options.version.clone(),
            storage.options.use_storage_lock,
        )
    }

    pub fn with_instance(mut self, instance: InstanceId) -> Self {
        self.instance = instance;
        self
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    fn lock_key(&self, message_type: MessageType) -> String {
        match message_type {
            MessageType::Publish => LockKey::publish_retry(&self.version),
            MessageType::Subscribe => LockKey::received_retry(&self.version),
        }
    }

    pub async fn run(
        &self,
        message_type: MessageType,
        dispatcher: &dyn RetryDispatcher,
    ) -> Result<RetryPassOutcome, StoreError> {
        if !self.use_storage_lock {
            return self.dispatch_all(message_type, dispatcher).await;
        }

        let key = self.lock_key(message_type);
        if !self.lock.acquire(&key, self.lock_ttl, &self.instance).await? {
            tracing::debug!(key = %key, "retry pass skipped, lease held elsewhere");
            return Ok(RetryPassOutcome::Skipped);
        }

        let outcome = self.dispatch_all(message_type, dispatcher).await;
        let released = self.lock.release(&key, &self.instance).await;
        let outcome = outcome?;
        released?;
        Ok(outcome)
    }

    async fn dispatch_all(
        &self,
        message_type: MessageType,
        dispatcher: &dyn RetryDispatcher,
    ) -> Result<RetryPassOutcome, StoreError> {
        let messages = match message_type {
            MessageType::Publish => {
                self.storage
                    .get_published_messages_of_need_retry(self.lookback)
                    .await?
            }
            MessageType::Subscribe => {
                self.storage
                    .get_received_messages_of_need_retry(self.lookback)
                    .await?
            }
        };

        let selected = messages.len();
        let mut failed = 0;
        for message in messages {
            let id = message.db_id;
            if let Err(err) = dispatcher.dispatch(message_type, message).await {
                failed += 1;
                tracing::warn!(id = %id, error = %err, "retry dispatch failed");
            }
        }

        tracing::info!(?message_type, selected, failed, "retry pass finished");
        Ok(RetryPassOutcome::Completed { selected, failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Message, MessageId, StatusName};
    use crate::impls::sqlite::test_support::{test_store, TestStore, VERSION};
    use crate::ports::DbTransaction;
    use chrono::TimeDelta;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(MessageType, MessageId)>>,
        fail_on: Option<MessageId>,
    }

    #[async_trait]
    impl RetryDispatcher for Recorder {
        async fn dispatch(
            &self,
            message_type: MessageType,
            message: MediumMessage,
        ) -> Result<(), StoreError> {
            self.seen.lock().unwrap().push((message_type, message.db_id));
            if self.fail_on == Some(message.db_id) {
                return Err(StoreError::handler("broker unavailable"));
            }
            Ok(())
        }
    }

    async fn failed_published(store: &TestStore, id: i64) {
        let message = Message::outbound(MessageId::new(id), "orders.created", json!({}));
        let medium = store
            .storage
            .store_message("orders.created", &message, DbTransaction::None)
            .await
            .unwrap();
        store
            .storage
            .change_publish_state(&medium, StatusName::Failed, DbTransaction::None)
            .await
            .unwrap();
    }

    fn pass(store: &TestStore, use_lock: bool, instance: &str) -> RetryPass {
        RetryPass::new(store.storage.clone(), store.lock.clone(), VERSION, use_lock)
            .with_instance(InstanceId::named(instance).unwrap())
    }

    #[tokio::test]
    async fn unlocked_pass_dispatches_every_retryable_message() {
        let store = test_store().await;
        failed_published(&store, 1).await;
        failed_published(&store, 2).await;
        store.clock.advance(TimeDelta::minutes(5));

        let recorder = Recorder::default();
        let outcome = pass(&store, false, "a")
            .run(MessageType::Publish, &recorder)
            .await
            .unwrap();

        assert_eq!(outcome, RetryPassOutcome::Completed { selected: 2, failed: 0 });
        assert_eq!(recorder.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn recent_messages_wait_for_the_lookback() {
        let store = test_store().await;
        failed_published(&store, 1).await;

        let recorder = Recorder::default();
        let outcome = pass(&store, false, "a")
            .run(MessageType::Publish, &recorder)
            .await
            .unwrap();
        assert_eq!(outcome, RetryPassOutcome::Completed { selected: 0, failed: 0 });
    }

    #[tokio::test]
    async fn contention_skips_without_dispatching() {
        let store = test_store().await;
        failed_published(&store, 1).await;
        store.clock.advance(TimeDelta::minutes(5));

        let other = InstanceId::named("other").unwrap();
        assert!(store
            .lock
            .acquire(&LockKey::publish_retry(VERSION), DEFAULT_LOCK_TTL, &other)
            .await
            .unwrap());

        let recorder = Recorder::default();
        let outcome = pass(&store, true, "a")
            .run(MessageType::Publish, &recorder)
            .await
            .unwrap();

        assert_eq!(outcome, RetryPassOutcome::Skipped);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lease_is_released_even_when_dispatch_fails() {
        let store = test_store().await;
        failed_published(&store, 1).await;
        failed_published(&store, 2).await;
        store.clock.advance(TimeDelta::minutes(5));

        let recorder = Recorder {
            fail_on: Some(MessageId::new(1)),
            ..Default::default()
        };
        let outcome = pass(&store, true, "a")
            .run(MessageType::Publish, &recorder)
            .await
            .unwrap();
        assert_eq!(outcome, RetryPassOutcome::Completed { selected: 2, failed: 1 });

        let next = InstanceId::named("b").unwrap();
        assert!(store
            .lock
            .acquire(&LockKey::publish_retry(VERSION), DEFAULT_LOCK_TTL, &next)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn received_pass_uses_its_own_lease() {
        let store = test_store().await;
        let medium = store
            .storage
            .store_received_message("orders.created", "billing", Message::default())
            .await
            .unwrap();
        store.clock.advance(TimeDelta::minutes(5));

        let other = InstanceId::named("other").unwrap();
        assert!(store
            .lock
            .acquire(&LockKey::publish_retry(VERSION), DEFAULT_LOCK_TTL, &other)
            .await
            .unwrap());

        let recorder = Recorder::default();
        let outcome = pass(&store, true, "a")
            .run(MessageType::Subscribe, &recorder)
            .await
            .unwrap();

        assert_eq!(outcome, RetryPassOutcome::Completed { selected: 1, failed: 0 });
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![(MessageType::Subscribe, medium.db_id)]
        );
    }
}
