//! courier-core
//!
//! Persistent outbox / inbox message store on SQLite.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, message, monitoring, errors）
//! - **ports**: 抽象化レイヤー（DataStorage, LockCoordinator, MonitoringApi, Clock, など）
//! - **impls**: 実装（SQLite）
//! - **app**: アプリケーションロジック（builder, collector, retry_pass）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
