//! Domain model (ids, status, message envelope, monitoring views, errors).
//!
//! ここにはストレージの詳細（SQL, sqlx）を持ち込みません。
//! エラー型だけは `sqlx::Error` を透過的に運びます。

pub mod errors;
pub mod ids;
pub mod message;
pub mod monitoring;
pub mod status;

pub use self::errors::{ErrorKind, StoreError};
pub use self::ids::{InstanceId, MessageId};
pub use self::message::{MediumMessage, Message, headers};
pub use self::monitoring::{
    HourlyTimeline, MessageQuery, MessageType, MessageView, PagedQueryResult, StatisticsView,
};
pub use self::status::StatusName;
