//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! ストレージ本体（DataStorage / LockCoordinator / MonitoringApi）と、
//! ストアが依存する協調者（Clock / IdGenerator / Serializer / StorageInitializer）です。
//!
//! # 設計原則
//! - SQLite が source of truth（正本）
//! - 継承ではなく trait + 具体実装（impls）で差し替える
//! - 値は常にバインドパラメータ。SQL に文字列で埋め込むのはテーブル名だけ

pub mod clock;
pub mod data_storage;
pub mod id_generator;
pub mod lock;
pub mod monitoring;
pub mod serializer;
pub mod storage_initializer;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::data_storage::{
    DEFAULT_DELETE_BATCH, DEFAULT_RETRY_LOOKBACK, DataStorage, DbTransaction,
    FAILED_MESSAGE_RETENTION, RETRY_BATCH_SIZE, ScheduleHandler, ScheduleWindow,
};
pub use self::id_generator::{IdGenerator, SnowflakeGenerator};
pub use self::lock::{LockCoordinator, LockKey};
pub use self::monitoring::MonitoringApi;
pub use self::serializer::{JsonSerializer, Serializer};
pub use self::storage_initializer::StorageInitializer;
