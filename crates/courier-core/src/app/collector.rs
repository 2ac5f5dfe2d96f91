//! CollectorLoop - 期限切れメッセージの回収
//!
//! # フロー
//! 1. Published → Received の順に、`ExpiresAt < now` の終端状態の行を batch_count 件ずつ削除
//! 2. 1 件以上消えたら delay だけ待ち、shutdown を確認してから次の batch
//! 3. 0 件の batch でそのテーブルは完了
//! 4. 両テーブルが終わったら waiting_interval 待って 1 に戻る
//!
//! ストレージのエラーはログに出してそのパスを打ち切る（残りは次のパスで拾う）。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::{MessageType, StoreError};
use crate::ports::{Clock, DataStorage, DEFAULT_DELETE_BATCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorOptions {
    pub batch_count: u32,
    /// batch の間の待ち時間
    pub delay: Duration,
    /// パスとパスの間の待ち時間
    pub waiting_interval: Duration,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            batch_count: DEFAULT_DELETE_BATCH,
            delay: Duration::from_secs(1),
            waiting_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// 1 パスで削除した件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub published: u64,
    pub received: u64,
}

impl CollectReport {
    fn add(&mut self, table: MessageType, deleted: u64) {
        match table {
            MessageType::Publish => self.published += deleted,
            MessageType::Subscribe => self.received += deleted,
        }
    }

    pub fn total(&self) -> u64 {
        self.published + self.received
    }
}

pub struct CollectorLoop {
    storage: Arc<dyn DataStorage>,
    clock: Arc<dyn Clock>,
    options: CollectorOptions,
}

impl CollectorLoop {
    pub fn new(storage: Arc<dyn DataStorage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            options: CollectorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CollectorOptions) -> Self {
        self.options = options;
        self
    }

    /// 1 パスだけ実行する（shutdown なし）
    pub async fn collect_once(&self) -> Result<CollectReport, StoreError> {
        // sender を保持している間は changed() が返らない
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.collect_pass(&mut shutdown_rx).await
    }

    /// shutdown が来るまでパスを繰り返す
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.collect_pass(&mut shutdown_rx).await {
                Ok(report) if report.total() > 0 => {
                    tracing::info!(
                        published = report.published,
                        received = report.received,
                        "expired messages collected"
                    );
                }
                Ok(_) => tracing::debug!("no expired messages"),
                Err(err) => {
                    tracing::warn!(error = %err, "collector pass failed");
                }
            }

            if wait_or_shutdown(&mut shutdown_rx, self.options.waiting_interval).await {
                break;
            }
        }
        tracing::debug!("collector stopped");
    }

    async fn collect_pass(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<CollectReport, StoreError> {
        let timeout = self.clock.now();
        let mut report = CollectReport::default();

        for table in [MessageType::Publish, MessageType::Subscribe] {
            loop {
                let deleted = self
                    .storage
                    .delete_expires(table, timeout, self.options.batch_count)
                    .await?;
                report.add(table, deleted);

                if deleted == 0 {
                    break;
                }
                tracing::debug!(?table, deleted, "expired batch deleted");

                if wait_or_shutdown(shutdown_rx, self.options.delay).await {
                    return Ok(report);
                }
            }
        }

        Ok(report)
    }
}

/// `duration` だけ待つ。shutdown が要求されていれば true。
///
/// sender が drop された場合も停止とみなす。
async fn wait_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    // 既に見た停止要求では changed() が返らない
    if *shutdown_rx.borrow_and_update() {
        return true;
    }
    if duration.is_zero() {
        if shutdown_rx.has_changed().is_err() {
            return true;
        }
    } else {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    return true;
                }
            }
        }
    }
    *shutdown_rx.borrow()
}

/// Collector task handle.
/// - `request_shutdown()` で次の待機点で止まる
/// - `shutdown_and_join()` で終了まで待てる
pub struct CollectorHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl CollectorHandle {
    pub fn spawn(collector: CollectorLoop) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            collector.run(shutdown_rx).await;
        });
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            tracing::warn!(error = %err, "collector task ended abnormally");
        }
    }
}
