//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **sqlite**: SqliteDataStorage / SqliteLockCoordinator / SqliteMonitoringApi /
//!   SqliteStorageInitializer（`sqlx::SqlitePool` 上）
//!
//! Clock / IdGenerator / Serializer の標準実装は ports 側に置いています。

pub mod sqlite;

// 主要な型を再エクスポート
pub use self::sqlite::{
    SqliteDataStorage, SqliteLockCoordinator, SqliteMonitoringApi, SqliteStorageInitializer,
    StoreSettings, TableNames,
};
