//! IdGenerator port - ID 生成の抽象化
//!
//! Received メッセージの ID はストア内部で採番します。
//! グローバルなシングルトンは使わず、構築時に `Arc<dyn IdGenerator>` を渡します。
//!
//! # 実装
//! - **SnowflakeGenerator**: 64-bit の時刻順 ID（本番用）

use std::sync::{Mutex, PoisonError};

use crate::domain::MessageId;
use crate::ports::Clock;

/// IdGenerator は単調増加する 64-bit ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから使える）
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> MessageId;
}

/// Custom epoch (2010-11-04T01:42:54.657Z), same as the classic snowflake layout.
const EPOCH_MS: i64 = 1_288_834_974_657;
const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;
const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug, Default)]
struct SnowflakeState {
    last_ms: i64,
    sequence: u16,
}

/// SnowflakeGenerator は `timestamp(41) | worker(10) | sequence(12)` の ID を生成
///
/// Clock を使うので、テストでは FixedClock で決定的なタイムスタンプを得られます。
/// 同一ミリ秒で sequence を使い切った場合や時計が戻った場合は、
/// 直前のタイムスタンプを 1ms 進めて単調性を保ちます（待たない）。
pub struct SnowflakeGenerator<C> {
    clock: C,
    worker_id: u16,
    state: Mutex<SnowflakeState>,
}

impl<C: Clock> SnowflakeGenerator<C> {
    /// worker_id は 0..=1023 に丸められます。
    pub fn new(clock: C, worker_id: u16) -> Self {
        Self {
            clock,
            worker_id: worker_id & MAX_WORKER_ID,
            state: Mutex::new(SnowflakeState::default()),
        }
    }

    /// ランダムな worker_id で作成
    pub fn with_random_worker(clock: C) -> Self {
        Self::new(clock, rand::random::<u16>())
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }
}

impl<C: Clock> IdGenerator for SnowflakeGenerator<C> {
    fn next_id(&self) -> MessageId {
        let now_ms = (self.clock.now().timestamp_millis() - EPOCH_MS).max(0);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if now_ms > state.last_ms {
            state.last_ms = now_ms;
            state.sequence = 0;
        } else if state.sequence < MAX_SEQUENCE {
            state.sequence += 1;
        } else {
            state.last_ms += 1;
            state.sequence = 0;
        }

        let id = (state.last_ms << (WORKER_BITS + SEQUENCE_BITS))
            | (i64::from(self.worker_id) << SEQUENCE_BITS)
            | i64::from(state.sequence);
        MessageId::new(id)
    }
}
