//! テスト用のセットアップ（一時ファイルの SQLite + FixedClock）

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;

use super::{
    connect, SqliteDataStorage, SqliteLockCoordinator, SqliteStorageInitializer, StoreSettings,
    TableNames,
};
use crate::ports::{Clock, FixedClock, JsonSerializer, SnowflakeGenerator, StorageInitializer};

pub(crate) const VERSION: &str = "v1";
pub(crate) const MAX_RETRIES: u32 = 5;

pub(crate) fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap()
}

/// A pool over a fresh database file. Keep the `TempDir` alive for the test.
pub(crate) async fn temp_pool() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("courier.db").display());
    let pool = connect(&url, 4).await.unwrap();
    (dir, pool)
}

pub(crate) struct TestStore {
    _dir: TempDir,
    pub pool: SqlitePool,
    pub clock: FixedClock,
    pub storage: Arc<SqliteDataStorage>,
    pub lock: Arc<SqliteLockCoordinator>,
}

pub(crate) async fn test_store() -> TestStore {
    let (dir, pool) = temp_pool().await;
    let tables = TableNames::with_prefix("courier");
    let clock = FixedClock::new(start_time());
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

    SqliteStorageInitializer::new(pool.clone(), tables.clone(), VERSION, true)
        .initialize()
        .await
        .unwrap();

    let storage = Arc::new(SqliteDataStorage::new(
        pool.clone(),
        &tables,
        StoreSettings {
            version: VERSION.to_string(),
            failed_retry_count: MAX_RETRIES,
        },
        shared_clock.clone(),
        Arc::new(SnowflakeGenerator::new(shared_clock.clone(), 1)),
        Arc::new(JsonSerializer),
    ));
    let lock = Arc::new(SqliteLockCoordinator::new(pool.clone(), &tables, shared_clock));

    TestStore {
        _dir: dir,
        pool,
        clock,
        storage,
        lock,
    }
}
