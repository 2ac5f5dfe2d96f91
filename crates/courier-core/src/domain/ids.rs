//! Domain identifiers (strongly-typed IDs).
//!
//! # MessageId
//! Published / Received テーブルの主キー。64-bit の時刻順 ID です。
//! - Published: 呼び出し側の envelope（`courier-msg-id` ヘッダ）から取得
//! - Received: `IdGenerator` が採番
//!
//! # InstanceId
//! Lock テーブルの `Instance` 列に書き込む保持者 ID。
//! ULID を使うので、調整なしで複数ノードが衝突せずに生成できます。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Identifier of a stored message (Published / Received row).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl FromStr for MessageId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lease holder identity written into the lock table.
///
/// 空文字列は「未保持」を意味するため、`InstanceId` は空にできません。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// ULID ベースの新しい保持者 ID を作成
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// 任意の名前（ホスト名など）から作成。空文字列は None。
    pub fn named(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        let name = name.trim();
        if name.is_empty() {
            None
        } else {
            Some(Self(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
