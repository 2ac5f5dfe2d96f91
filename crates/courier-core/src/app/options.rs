//! StorageOptions - ストレージの設定
//!
//! JSON から読み込めます（未指定のキーは既定値）。
//!
//! ```json
//! {
//!   "connection_string": "sqlite://courier.db",
//!   "table_name_prefix": "courier",
//!   "version": "v1",
//!   "failed_retry_count": 50,
//!   "use_storage_lock": true
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// OptionsError は設定ファイル読み込みのエラー
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// sqlx の接続文字列（`sqlite://path.db` / `sqlite::memory:`）
    pub connection_string: String,

    /// テーブル名のプレフィックス（`<prefix>.Published` など）
    pub table_name_prefix: String,

    /// 行に書き込むバージョンタグ。異なるバージョンの行は互いに選択されない
    pub version: String,

    /// この回数に達した行はリトライ対象から外れる
    pub failed_retry_count: u32,

    /// retry pass を lease lock で包むか
    pub use_storage_lock: bool,

    pub max_connections: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            table_name_prefix: "courier".to_string(),
            version: "v1".to_string(),
            failed_retry_count: 50,
            use_storage_lock: false,
            max_connections: 5,
        }
    }
}

impl StorageOptions {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| OptionsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| OptionsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
