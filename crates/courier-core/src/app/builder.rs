//! StorageBuilder - ストレージの構築とワイヤリング
//!
//! # 設計原則
//! - 起動時検証（Fail-fast）: 設定の誤りは build() の BuildError で返す
//! - 協調者（Clock / IdGenerator / Serializer）は差し替え可能。未指定なら標準実装

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::app::options::StorageOptions;
use crate::domain::StoreError;
use crate::impls::sqlite::{
    self, SqliteDataStorage, SqliteLockCoordinator, SqliteStorageInitializer, StoreSettings,
    TableNames,
};
use crate::ports::{
    Clock, DataStorage, IdGenerator, JsonSerializer, LockCoordinator, MonitoringApi, Serializer,
    SnowflakeGenerator, StorageInitializer, SystemClock,
};

/// StorageBuilder は Storage を構築
///
/// # 使用例
/// ```ignore
/// let storage = StorageBuilder::new(StorageOptions::new("sqlite://courier.db"))
///     .with_clock(Arc::new(SystemClock))
///     .build()
///     .await?;
/// ```
pub struct StorageBuilder {
    options: StorageOptions,
    clock: Option<Arc<dyn Clock>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
    serializer: Option<Arc<dyn Serializer>>,
}

/// BuildError はストレージ構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("connection_string must not be empty")]
    MissingConnectionString,

    #[error("invalid table_name_prefix {0:?}: use ASCII letters, digits, '_' or '.'")]
    InvalidTablePrefix(String),

    #[error("failed_retry_count must be at least 1")]
    InvalidRetryCount,

    #[error("failed to open the database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("failed to initialize the schema: {0}")]
    Initialize(#[source] StoreError),
}

fn is_valid_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

impl StorageBuilder {
    pub fn new(options: StorageOptions) -> Self {
        Self {
            options,
            clock: None,
            id_generator: None,
            serializer: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(id_generator);
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// 設定だけを検証する（接続はしない）
    pub fn validate(&self) -> Result<(), BuildError> {
        let options = &self.options;
        if options.connection_string.trim().is_empty() {
            return Err(BuildError::MissingConnectionString);
        }
        if !is_valid_prefix(&options.table_name_prefix) {
            return Err(BuildError::InvalidTablePrefix(
                options.table_name_prefix.clone(),
            ));
        }
        if options.failed_retry_count == 0 {
            return Err(BuildError::InvalidRetryCount);
        }
        Ok(())
    }

    /// 検証 → 接続 → スキーマ初期化 → ワイヤリング
    pub async fn build(self) -> Result<Storage, BuildError> {
        self.validate()?;

        let options = self.options;
        let pool = sqlite::connect(&options.connection_string, options.max_connections)
            .await
            .map_err(BuildError::Connect)?;
        let tables = TableNames::with_prefix(&options.table_name_prefix);

        SqliteStorageInitializer::new(
            pool.clone(),
            tables.clone(),
            options.version.clone(),
            options.use_storage_lock,
        )
        .initialize()
        .await
        .map_err(BuildError::Initialize)?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let id_generator: Arc<dyn IdGenerator> = match self.id_generator {
            Some(id_generator) => id_generator,
            None => Arc::new(SnowflakeGenerator::with_random_worker(clock.clone())),
        };
        let serializer: Arc<dyn Serializer> = match self.serializer {
            Some(serializer) => serializer,
            None => Arc::new(JsonSerializer),
        };

        let data = Arc::new(SqliteDataStorage::new(
            pool.clone(),
            &tables,
            StoreSettings {
                version: options.version.clone(),
                failed_retry_count: options.failed_retry_count,
            },
            clock.clone(),
            id_generator,
            serializer,
        ));
        let monitoring = data.monitoring_api();
        let lock = Arc::new(SqliteLockCoordinator::new(pool.clone(), &tables, clock.clone()));

        tracing::info!(
            prefix = %options.table_name_prefix,
            version = %options.version,
            use_storage_lock = options.use_storage_lock,
            "storage ready"
        );

        Ok(Storage {
            data,
            lock,
            monitoring,
            clock,
            pool,
            options,
        })
    }
}

/// Storage は構築済みのストア一式
///
/// `pool` は outbox の同一トランザクション書き込み用
/// （`pool.begin()` → `DbTransaction::Sqlite(&mut *tx)`）。
pub struct Storage {
    pub data: Arc<dyn DataStorage>,
    pub lock: Arc<dyn LockCoordinator>,
    pub monitoring: Arc<dyn MonitoringApi>,
    pub clock: Arc<dyn Clock>,
    pub pool: SqlitePool,
    pub options: StorageOptions,
}
