//! Errors - エラー型と分類
//!
//! ストアの呼び出し側が「何が起きたか」で分岐できるように、
//! `StoreError` は `ErrorKind` による運用分類を持ちます。
//!
//! 競合（lock の取得失敗、非所有者の release）や「期限到来なし」は
//! エラーではなく、通常の bool / 空の結果として返します。

use thiserror::Error;

/// ErrorKind は実行エラーの分類
///
/// # 分類
/// - Transient: 一時的なエラー（次の周期で再試行してよい）
/// - Permanent: 恒久的なエラー（同じ入力で再試行しても無意味）
/// - Infrastructure: インフラエラー（SQLite / 接続の障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// StoreError はストア操作のエラー
///
/// ストアは内部でリトライしません。エンジンのエラーはそのまま伝播します。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("message envelope has no valid `courier-msg-id` header")]
    MissingMessageId,

    #[error("unknown status name: {0}")]
    InvalidStatus(String),

    #[error("timestamp out of range: {0}ms")]
    InvalidTimestamp(i64),

    #[error("handler failed: {0}")]
    Handler(String),
}

impl StoreError {
    /// Create a handler failure (schedule handler / retry dispatcher).
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Database(_) => ErrorKind::Infrastructure,
            StoreError::Serialization(_)
            | StoreError::MissingMessageId
            | StoreError::InvalidStatus(_)
            | StoreError::InvalidTimestamp(_) => ErrorKind::Permanent,
            StoreError::Handler(_) => ErrorKind::Transient,
        }
    }
}
