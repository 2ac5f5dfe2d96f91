//! SqliteStorageInitializer - スキーマ作成
//!
//! # フロー
//! 1. 1 トランザクションを開く
//! 2. Received / Published / Locks を create-if-absent
//! 3. インデックスを create-if-absent
//! 4. lock を使う設定ならロック行を `INSERT OR IGNORE` で seed
//! 5. commit

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::sql::{quote_ident, SqlTemplates, TableNames};
use super::to_millis;
use crate::domain::StoreError;
use crate::ports::{LockKey, StorageInitializer};

pub struct SqliteStorageInitializer {
    pool: SqlitePool,
    tables: TableNames,
    version: String,
    use_storage_lock: bool,
}

impl SqliteStorageInitializer {
    pub fn new(
        pool: SqlitePool,
        tables: TableNames,
        version: impl Into<String>,
        use_storage_lock: bool,
    ) -> Self {
        Self {
            pool,
            tables,
            version: version.into(),
            use_storage_lock,
        }
    }

    fn ddl(&self) -> Vec<String> {
        let received = quote_ident(&self.tables.received);
        let published = quote_ident(&self.tables.published);
        let locks = quote_ident(&self.tables.locks);

        let mut statements = vec![
            format!(
                r#"CREATE TABLE IF NOT EXISTS {received} (
                    "Id" INTEGER NOT NULL PRIMARY KEY,
                    "Version" TEXT NULL,
                    "Name" TEXT NOT NULL,
                    "Group" TEXT NULL,
                    "Content" TEXT NULL,
                    "Retries" INTEGER NOT NULL DEFAULT 0,
                    "Added" INTEGER NOT NULL,
                    "ExpiresAt" INTEGER NULL,
                    "StatusName" TEXT NOT NULL COLLATE NOCASE
                )"#
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {published} (
                    "Id" INTEGER NOT NULL PRIMARY KEY,
                    "Version" TEXT NULL,
                    "Name" TEXT NOT NULL,
                    "Content" TEXT NULL,
                    "Retries" INTEGER NOT NULL DEFAULT 0,
                    "Added" INTEGER NOT NULL,
                    "ExpiresAt" INTEGER NULL,
                    "StatusName" TEXT NOT NULL COLLATE NOCASE
                )"#
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {locks} (
                    "Key" TEXT NOT NULL PRIMARY KEY,
                    "Instance" TEXT NOT NULL DEFAULT '',
                    "LastLockTime" INTEGER NOT NULL
                )"#
            ),
        ];

        for name in [&self.tables.received, &self.tables.published] {
            let table = quote_ident(name);
            statements.push(format!(
                r#"CREATE INDEX IF NOT EXISTS {index} ON {table} ("Version", "ExpiresAt", "StatusName")"#,
                index = quote_ident(&format!("IX_{name}_Version_ExpiresAt_StatusName")),
            ));
            statements.push(format!(
                r#"CREATE INDEX IF NOT EXISTS {index} ON {table} ("ExpiresAt", "StatusName")"#,
                index = quote_ident(&format!("IX_{name}_ExpiresAt_StatusName")),
            ));
        }

        statements
    }
}

#[async_trait]
impl StorageInitializer for SqliteStorageInitializer {
    fn published_table_name(&self) -> &str {
        &self.tables.published
    }

    fn received_table_name(&self) -> &str {
        &self.tables.received
    }

    fn lock_table_name(&self) -> &str {
        &self.tables.locks
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for statement in self.ddl() {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        if self.use_storage_lock {
            let seed = SqlTemplates::new(&self.tables).locks.seed;
            for key in LockKey::all(&self.version) {
                sqlx::query(&seed)
                    .bind(key.as_str())
                    .bind(to_millis(DateTime::<Utc>::MIN_UTC))
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;

        tracing::info!(
            published = %self.tables.published,
            received = %self.tables.received,
            locks = %self.tables.locks,
            use_storage_lock = self.use_storage_lock,
            "storage schema initialized"
        );
        Ok(())
    }
}
