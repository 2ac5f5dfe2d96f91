//! StorageInitializer port - テーブル名の解決とスキーマ作成
//!
//! # 設計原則
//! - テーブル名は `<prefix>.Published` / `<prefix>.Received` / `<prefix>.Locks`
//! - initialize は冪等（create-if-absent）。何度呼んでもよい
//! - lock を使う設定なら、ロック行（publish_retry / received_retry）も seed する

use async_trait::async_trait;

use crate::domain::StoreError;

#[async_trait]
pub trait StorageInitializer: Send + Sync {
    fn published_table_name(&self) -> &str;

    fn received_table_name(&self) -> &str;

    fn lock_table_name(&self) -> &str;

    async fn initialize(&self) -> Result<(), StoreError>;
}
