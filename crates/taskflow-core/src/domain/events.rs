//! Events - ステータス変更イベントと Observer
//!
//! Task は購読者のリストを自分で持ち、遷移のたびに同期的に通知します。
//! 購読者は `Subscription` を返し、`Detach` を返した購読者はその場で外されます。
//!
//! `DispatchEvent` はそれとは別に、dispatcher と `Timed` が `EventSink` へ流す実行の記録です。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::state::Status;

/// One status transition of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub task_id: TaskId,
    pub old: Status,
    pub new: Status,
}

impl StatusChanged {
    pub fn new(task_id: TaskId, old: Status, new: Status) -> Self {
        Self { task_id, old, new }
    }

    pub fn is_terminal(&self) -> bool {
        self.new.is_terminal()
    }
}

/// Observer の返答。通知後も購読を続けるかどうか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Keep,
    Detach,
}

/// Receives status changes of the tasks it is subscribed to.
///
/// Called synchronously on the thread that performed the transition, so
/// implementations should return quickly.
pub trait TaskObserver: Send + Sync {
    fn status_changed(&self, event: &StatusChanged) -> Subscription;
}

/// One step of a dispatch, published to the dispatcher's `EventSink`.
///
/// `ExecutionStarted` と `ExecutionEnded` は worker 上で順に出る。
/// `Dispatched` は投入した側で出るため、multi-thread runtime では `ExecutionStarted` より
/// 後に届くことがある。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    Dispatched {
        task_id: TaskId,
        payload_type: String,
        at: DateTime<Utc>,
    },
    ExecutionStarted {
        task_id: TaskId,
        at: DateTime<Utc>,
    },
    ExecutionEnded {
        task_id: TaskId,
        status: Status,
        elapsed_ms: u64,
        at: DateTime<Utc>,
    },
}

impl DispatchEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Dispatched { task_id, .. }
            | Self::ExecutionStarted { task_id, .. }
            | Self::ExecutionEnded { task_id, .. } => *task_id,
        }
    }
}
