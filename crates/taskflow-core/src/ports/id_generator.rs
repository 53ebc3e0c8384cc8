//! IdGenerator port - ID 生成の抽象化
//!
//! テスト容易性のために、trait として抽象化しています。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース。同じミリ秒内でも単調増加を保証する

use std::sync::{LazyLock, Mutex, PoisonError};

use ulid::Ulid;

use crate::domain::TaskId;
use crate::ports::{Clock, SystemClock};

/// IdGenerator は時刻順に並ぶ一意な TaskId を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数スレッドから使える）
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock のミリ秒をタイムスタンプ部に、乱数をランダム部に使います。
/// 直前に払い出した ID 以下になった場合は直前の ID を +1 したものを返すので、
/// 払い出し順と ID の順序が一致します。
pub struct UlidGenerator<C> {
    clock: C,
    last: Mutex<Option<Ulid>>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let candidate = Ulid::from_parts(timestamp_ms, rand::random());

        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let next = match *last {
            Some(previous) if candidate <= previous => previous.increment().unwrap_or(candidate),
            _ => candidate,
        };
        *last = Some(next);
        next
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from_ulid(self.next_ulid())
    }
}

static DEFAULT_GENERATOR: LazyLock<UlidGenerator<SystemClock>> =
    LazyLock::new(|| UlidGenerator::new(SystemClock));

/// Process-wide generator used by `Task::wrap`.
pub fn default_generator() -> &'static dyn IdGenerator {
    &*DEFAULT_GENERATOR
}
