//! Task - payload を包む実行単位
//!
//! # 所有とスレッド
//! - Task は `Arc<Task<T>>` として呼び出し側・worker・observer 間で共有される
//! - ステータスを書き換えるのは実行中の unit of work だけ（`set_status` は crate 内限定）
//! - 通知は内部ロックを外してから行う。observer が通知中に購読解除しても deadlock しない
//! - observer の panic は通知の中で止める。その observer は外され、遷移と残りの通知は続く

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::warn;

use super::errors::TaskError;
use super::events::{StatusChanged, Subscription, TaskObserver};
use super::ids::TaskId;
use super::payload::Payload;
use super::state::Status;
use crate::ports::{IdGenerator, default_generator};

#[derive(Debug, Default)]
struct Execution {
    status: Status,
    elapsed: Duration,
    failure_cause: Option<TaskError>,
}

/// A payload plus its execution status.
///
/// # 使用例
/// ```ignore
/// let task = Arc::new(Task::wrap(String::from("hello")));
/// let handle = dispatcher.dispatch::<String, String>(&task)?;
/// assert_eq!(handle.await?, "HELLO");
/// assert_eq!(task.status(), Status::Successful);
/// ```
pub struct Task<T> {
    id: TaskId,
    payload: T,
    execution: Mutex<Execution>,
    observers: Mutex<Vec<Arc<dyn TaskObserver>>>,
}

impl<T: Payload> Task<T> {
    /// Wrap `payload` with a fresh, time-ordered id.
    pub fn wrap(payload: T) -> Self {
        Self::with_generator(default_generator(), payload)
    }

    pub fn with_generator(ids: &dyn IdGenerator, payload: T) -> Self {
        Self::with_id(ids.generate_task_id(), payload)
    }

    pub fn with_id(id: TaskId, payload: T) -> Self {
        Self {
            id,
            payload,
            execution: Mutex::new(Execution::default()),
            observers: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Task<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn status(&self) -> Status {
        self.execution().status
    }

    /// Time spent inside the handler, zero until the task finished.
    pub fn elapsed(&self) -> Duration {
        self.execution().elapsed
    }

    pub fn failure_cause(&self) -> Option<TaskError> {
        self.execution().failure_cause.clone()
    }

    /// Subscribe `observer`. Returns `false` if it was already subscribed.
    pub fn subscribe(&self, observer: Arc<dyn TaskObserver>) -> bool {
        let mut observers = self.observers();
        if observers.iter().any(|o| same_observer(o, &observer)) {
            return false;
        }
        observers.push(observer);
        true
    }

    /// Returns `false` if `observer` was not subscribed.
    pub fn unsubscribe(&self, observer: &Arc<dyn TaskObserver>) -> bool {
        let mut observers = self.observers();
        let before = observers.len();
        observers.retain(|o| !same_observer(o, observer));
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }

    /// Move to `next` and notify every current observer before returning.
    ///
    /// 遷移できない場合はステータスを変えずに `IllegalTransition` を返す（通知もしない）。
    pub(crate) fn set_status(&self, next: Status) -> Result<Status, TaskError> {
        let previous = {
            let mut execution = self.execution();
            let current = execution.status;
            if !current.can_transition_to(next) {
                return Err(TaskError::IllegalTransition {
                    from: current,
                    to: next,
                });
            }
            execution.status = next;
            current
        };
        self.notify(StatusChanged::new(self.id, previous, next));
        Ok(previous)
    }

    pub(crate) fn set_elapsed(&self, elapsed: Duration) {
        self.execution().elapsed = elapsed;
    }

    pub(crate) fn set_failure_cause(&self, cause: TaskError) {
        self.execution().failure_cause = Some(cause);
    }

    /// External cancellation: a task that never ran ends as STOPPED.
    pub(crate) fn stop(&self) -> Result<Status, TaskError> {
        self.set_status(Status::Stopped)
    }

    fn notify(&self, event: StatusChanged) {
        // 通知中の購読・解除に備えてスナップショットに対して呼ぶ
        let snapshot: Vec<Arc<dyn TaskObserver>> = self.observers().clone();

        let detached: Vec<Arc<dyn TaskObserver>> = snapshot
            .into_iter()
            .filter(|observer| {
                match panic::catch_unwind(AssertUnwindSafe(|| observer.status_changed(&event))) {
                    Ok(reply) => reply == Subscription::Detach,
                    Err(_) => {
                        warn!(
                            task_id = %event.task_id,
                            status = %event.new,
                            "observer panicked, detaching it"
                        );
                        true
                    }
                }
            })
            .collect();

        if !detached.is_empty() {
            self.observers()
                .retain(|o| !detached.iter().any(|d| same_observer(o, d)));
        }
    }

    fn execution(&self) -> std::sync::MutexGuard<'_, Execution> {
        self.execution.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observers(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn TaskObserver>>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn same_observer(a: &Arc<dyn TaskObserver>, b: &Arc<dyn TaskObserver>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Equality is id and payload; status and observers are ignored.
impl<T: PartialEq> PartialEq for Task<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.payload == other.payload
    }
}

impl<T: fmt::Debug> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let execution = self.execution();
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("status", &execution.status)
            .field("elapsed", &execution.elapsed)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}
