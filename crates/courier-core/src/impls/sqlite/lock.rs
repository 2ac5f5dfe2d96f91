//! SqliteLockCoordinator - ロック行への条件付き UPDATE による lease
//!
//! # フロー
//! - acquire: `LastLockTime <= now - ttl` の行だけを自分の Instance で上書き
//! - release: 自分が保持している行だけを `Instance = ''` に戻す
//! - renew: 自分が保持していて lease がまだ有効な行だけ `LastLockTime += ttl`
//!
//! いずれも rows_affected で結果を判定する（0 行 = 競合 / 非保持）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::SqlitePool;

use super::sql::{LockSql, SqlTemplates, TableNames};
use super::{before, to_millis};
use crate::domain::{InstanceId, StoreError};
use crate::ports::{Clock, LockCoordinator};

pub struct SqliteLockCoordinator {
    pool: SqlitePool,
    sql: LockSql,
    clock: Arc<dyn Clock>,
}

impl SqliteLockCoordinator {
    pub fn new(pool: SqlitePool, tables: &TableNames, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            sql: SqlTemplates::new(tables).locks,
            clock,
        }
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    TimeDelta::from_std(ttl)
        .map(|delta| delta.num_milliseconds())
        .unwrap_or(i64::MAX)
}

#[async_trait]
impl LockCoordinator for SqliteLockCoordinator {
    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        instance: &InstanceId,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let result = sqlx::query(&self.sql.acquire)
            .bind(instance.as_str())
            .bind(to_millis(now))
            .bind(key)
            .bind(to_millis(before(now, ttl)))
            .execute(&self.pool)
            .await?;

        let acquired = result.rows_affected() == 1;
        tracing::debug!(key, instance = %instance, acquired, "lock acquire");
        Ok(acquired)
    }

    async fn release(&self, key: &str, instance: &InstanceId) -> Result<(), StoreError> {
        let result = sqlx::query(&self.sql.release)
            .bind(to_millis(DateTime::<Utc>::MIN_UTC))
            .bind(key)
            .bind(instance.as_str())
            .execute(&self.pool)
            .await?;

        tracing::debug!(key, instance = %instance, released = result.rows_affected() == 1, "lock release");
        Ok(())
    }

    async fn renew(
        &self,
        key: &str,
        ttl: Duration,
        instance: &InstanceId,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let result = sqlx::query(&self.sql.renew)
            .bind(ttl_millis(ttl))
            .bind(key)
            .bind(instance.as_str())
            .bind(to_millis(before(now, ttl)))
            .execute(&self.pool)
            .await?;

        let renewed = result.rows_affected() == 1;
        tracing::debug!(key, instance = %instance, renewed, "lock renew");
        Ok(renewed)
    }
}
