//! LockCoordinator port - lease ベースの分散ロック
//!
//! エンジン固有の分散ロックは使わず、ロック行への条件付き UPDATE 1 文だけで
//! 相互排他を実現します。UPDATE が 1 文で原子的なので、期限切れの行に
//! マッチできるのは同時に 1 つの呼び出しだけです。
//!
//! # 使い方
//! 1. `acquire` が true を返したインスタンスだけがパスを実行する
//! 2. false は「競合」であってエラーではない（次の周期まで待つ）
//! 3. 終わったら `release`（保持者以外の release は何もしない）

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{InstanceId, StoreError};

#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// 前回の lease が期限切れ（または未保持）なら取得して true。
    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        instance: &InstanceId,
    ) -> Result<bool, StoreError>;

    /// 保持者本人なら解放する。それ以外は何もしない。
    async fn release(&self, key: &str, instance: &InstanceId) -> Result<(), StoreError>;

    /// 保持者本人で、かつ lease がまだ有効なら `ttl` だけ延長して true。
    async fn renew(
        &self,
        key: &str,
        ttl: Duration,
        instance: &InstanceId,
    ) -> Result<bool, StoreError>;
}

/// ロック行のキー
pub struct LockKey;

impl LockKey {
    pub fn publish_retry(version: &str) -> String {
        format!("publish_retry_{version}")
    }

    pub fn received_retry(version: &str) -> String {
        format!("received_retry_{version}")
    }

    /// 初期化時に seed するキー
    pub fn all(version: &str) -> [String; 2] {
        [Self::publish_retry(version), Self::received_retry(version)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_the_version() {
        assert_eq!(LockKey::publish_retry("v2"), "publish_retry_v2");
        assert_eq!(LockKey::received_retry("v2"), "received_retry_v2");
        assert_eq!(LockKey::all("v1").len(), 2);
    }
}
