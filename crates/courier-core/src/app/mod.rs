//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて運用上の処理を実装します。
//!
//! # 主要コンポーネント
//! - **StorageOptions**: 設定（JSON から読み込み可能）
//! - **StorageBuilder**: 検証・接続・スキーマ初期化・ワイヤリング
//! - **CollectorLoop**: 期限切れメッセージの回収ループ
//! - **RetryPass**: lease lock で包んだリトライ処理

pub mod builder;
pub mod collector;
pub mod options;
pub mod retry_pass;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, Storage, StorageBuilder};
pub use self::collector::{CollectReport, CollectorHandle, CollectorLoop, CollectorOptions};
pub use self::options::{OptionsError, StorageOptions};
pub use self::retry_pass::{DEFAULT_LOCK_TTL, RetryDispatcher, RetryPass, RetryPassOutcome};
