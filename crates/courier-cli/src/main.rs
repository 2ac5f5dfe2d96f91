use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use tracing_subscriber::EnvFilter;

use courier_core::app::{
    CollectorHandle, CollectorLoop, RetryDispatcher, RetryPass, StorageBuilder, StorageOptions,
};
use courier_core::domain::{
    headers, MediumMessage, Message, MessageQuery, MessageType, StatusName, StoreError,
};
use courier_core::ports::{
    Clock, DataStorage, DbTransaction, IdGenerator, MonitoringApi, SnowflakeGenerator, SystemClock,
};

const DEFAULT_CONNECTION: &str = "sqlite://courier-demo.db";

/// リトライ対象をログに出すだけの dispatcher（本番はここでブローカーへ再送する）
struct LoggingDispatcher;

#[async_trait]
impl RetryDispatcher for LoggingDispatcher {
    async fn dispatch(
        &self,
        message_type: MessageType,
        message: MediumMessage,
    ) -> Result<(), StoreError> {
        tracing::info!(
            ?message_type,
            id = %message.db_id,
            retries = message.retries,
            name = message.origin.name().unwrap_or("-"),
            "would redeliver"
        );
        Ok(())
    }
}

fn load_options() -> Result<(StorageOptions, bool), Box<dyn Error>> {
    let mut path = None;
    let mut watch = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--watch" => watch = true,
            other => path = Some(other.to_string()),
        }
    }

    let options = match path {
        Some(path) => StorageOptions::from_json_file(path)?,
        None => StorageOptions {
            use_storage_lock: true,
            ..StorageOptions::new(DEFAULT_CONNECTION)
        },
    };
    Ok((options, watch))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) 設定を読み込んでストレージを構築（検証 → 接続 → スキーマ初期化）
    let (options, watch) = load_options()?;
    let storage = StorageBuilder::new(options).build().await?;
    let ids = SnowflakeGenerator::with_random_worker(SystemClock);

    // (B) outbox: 業務データと同じトランザクションで Published に保存
    let outbound = Message::outbound(
        ids.next_id(),
        "orders.created",
        serde_json::json!({ "order_id": 1001, "amount": 42 }),
    )
    .with_header("test-header", "test-value");

    let mut tx = storage.pool.begin().await?;
    let mut published = storage
        .data
        .store_message("orders.created", &outbound, DbTransaction::Sqlite(&mut *tx))
        .await?;
    tx.commit().await?;
    println!("stored published message: id={}", published.db_id);

    // (C) 送信できたことにして Succeeded（1 日後に回収対象）
    published.expire_after(storage.clock.now(), TimeDelta::days(1));
    storage
        .data
        .change_publish_state(&published, StatusName::Succeeded, DbTransaction::None)
        .await?;

    // (D) inbox: 受信 → 処理失敗、デシリアライズできない受信
    let mut received = storage
        .data
        .store_received_message("orders.created", "billing", outbound.clone())
        .await?;
    received.origin = received
        .origin
        .with_header(headers::EXCEPTION, "handler timed out");
    received.increment_retries();
    storage
        .data
        .change_receive_state(&received, StatusName::Failed)
        .await?;
    storage
        .data
        .store_received_exception_message("orders.created", "billing", "{ not json")
        .await?;

    // (E) lease lock で包んだリトライ（デモなので lookback なし）
    let outcome = RetryPass::from_storage(&storage)
        .with_lookback(Duration::ZERO)
        .run(MessageType::Subscribe, &LoggingDispatcher)
        .await?;
    println!("retry pass: {outcome:?}");

    // (F) 期限切れの回収を 1 パス
    let collector = CollectorLoop::new(storage.data.clone(), storage.clock.clone());
    let report = collector.collect_once().await?;
    println!(
        "collected: published={} received={}",
        report.published, report.received
    );

    // (G) モニタリング
    let monitoring = storage.monitoring.clone();
    let stats = monitoring.get_statistics().await?;
    println!("statistics: {}", serde_json::to_string(&stats)?);

    let failed_today: i64 = monitoring
        .hourly_failed_jobs(MessageType::Subscribe)
        .await?
        .values()
        .sum();
    println!("received failed (24h): {failed_today}");

    let mut query = MessageQuery::new(MessageType::Subscribe);
    query.status_name = Some(StatusName::Failed.to_string());
    let page = monitoring.messages(&query).await?;
    for view in &page.items {
        println!(
            "  #{} {} group={:?} retries={} status={}",
            view.id, view.name, view.group, view.retries, view.status_name
        );
    }
    println!("failed received total: {}", page.total);

    if let Some(stored) = monitoring.get_published_message(published.db_id).await? {
        println!(
            "published header round-trip: test-header={:?}",
            stored.origin.header("test-header")
        );
    }

    // (H) --watch: Ctrl+C まで回収ループを回す
    if watch {
        let handle = CollectorHandle::spawn(collector);
        println!("collector running, press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
        handle.shutdown_and_join().await;
    }

    Ok(())
}
