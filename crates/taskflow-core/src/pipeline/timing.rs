//! Timed - handler の実行をステータス遷移・計測・ログで包む
//!
//! `apply` の流れ:
//! 1. IN_PROGRESS へ遷移
//! 2. 内側の handler を実行（panic は `ExecutionFailed` に変換）
//! 3. 経過時間と失敗原因を記録してから SUCCESSFUL / FAILED へ遷移
//!
//! 終端ステータスの通知を受けた observer は、経過時間と原因をすでに読める。
//! IN_PROGRESS への遷移の直後に `ExecutionStarted`、終端への遷移の直後に
//! `ExecutionEnded` を `EventSink` へ出す。

use std::fmt::Write as _;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{error, info};

use crate::domain::{BoxError, DispatchEvent, Payload, Status, Task, TaskError, TaskResult};
use crate::ports::{Clock, EventSink, NoopEventSink, SystemClock};
use crate::typed::TaskHandler;

/// Status-tracking wrapper installed around every dispatched handler.
pub struct Timed<T: Payload, R> {
    inner: Arc<dyn TaskHandler<T, R>>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl<T: Payload, R: Send + 'static> Timed<T, R> {
    pub fn new(inner: Arc<dyn TaskHandler<T, R>>) -> Self {
        Self {
            inner,
            events: Arc::new(NoopEventSink),
            clock: Arc::new(SystemClock),
        }
    }

    /// Publish execution events to `events`, stamped by `clock`.
    pub fn with_events(mut self, events: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Self {
        self.events = events;
        self.clock = clock;
        self
    }
}

#[async_trait]
impl<T: Payload, R: Send + 'static> TaskHandler<T, R> for Timed<T, R> {
    async fn handle(&self, payload: &mut T) -> Result<R, BoxError> {
        self.inner.handle(payload).await
    }

    async fn apply(&self, task: &Task<T>) -> Result<TaskResult<R>, TaskError> {
        info!(task_id = %task.id(), "execution started");
        task.set_status(Status::InProgress)?;
        self.events.emit(DispatchEvent::ExecutionStarted {
            task_id: task.id(),
            at: self.clock.now(),
        });

        let started = Instant::now();
        let outcome = match AssertUnwindSafe(self.inner.apply(task)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(TaskError::execution_failed(panic_message(panic).into())),
        };
        let elapsed = started.elapsed();

        task.set_elapsed(elapsed);
        let status = match &outcome {
            Ok(_) => Status::Successful,
            Err(err) => {
                error!(task_id = %task.id(), error = %err, "execution failed");
                task.set_failure_cause(err.clone());
                Status::Failed
            }
        };
        let transition = task.set_status(status);
        self.events.emit(DispatchEvent::ExecutionEnded {
            task_id: task.id(),
            status: task.status(),
            elapsed_ms: elapsed.as_millis() as u64,
            at: self.clock.now(),
        });
        transition?;

        info!(
            task_id = %task.id(),
            status = %status,
            elapsed_ms = elapsed.as_millis() as u64,
            "execution took {}",
            describe_elapsed(elapsed)
        );
        outcome
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}

/// "1 minute, 5 seconds" style rendering of a duration.
pub fn describe_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (minutes, seconds) = (total / 60, total % 60);
    let mut text = String::new();
    if minutes > 0 {
        let _ = write!(text, "{minutes} {}, ", plural(minutes, "minute"));
    }
    let _ = write!(text, "{seconds} {}", plural(seconds, "second"));
    text
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        unit.to_string()
    } else {
        format!("{unit}s")
    }
}
