//! DiagnosticContext - 実行単位ごとのログ用キー/値
//!
//! # 伝播
//! - dispatch した側の context を取り込み、worker 側で `task-id` を追加してから handler を実行する
//! - context は tokio の task-local に置く。並行に走る task 同士で混ざらない
//! - 同じ内容を `tracing` の span にも載せるので、handler 内のログにも task id が付く

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use tracing::Instrument;

use crate::domain::TaskId;

/// Key under which the running task's id is stored.
pub const TASK_ID_KEY: &str = "task-id";

tokio::task_local! {
    static CURRENT: DiagnosticContext;
}

/// Ordered key/value pairs attached to log output of one unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticContext {
    entries: BTreeMap<String, String>,
}

impl DiagnosticContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the context of the current task, if one is installed.
    pub fn current() -> Option<Self> {
        CURRENT.try_with(|context| context.clone()).ok()
    }

    pub fn current_value(key: &str) -> Option<String> {
        CURRENT
            .try_with(|context| context.get(key).map(str::to_string))
            .ok()
            .flatten()
    }

    /// Run `fut` with this context installed.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(self, f)
    }
}

impl fmt::Display for DiagnosticContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Run `fut` under the captured context plus the task id, inside a `task` span.
pub(crate) async fn discriminate<F: Future>(
    captured: Option<DiagnosticContext>,
    task_id: TaskId,
    fut: F,
) -> F::Output {
    let context = captured
        .unwrap_or_default()
        .with(TASK_ID_KEY, task_id.to_string());
    let span = tracing::info_span!("task", task_id = %task_id, context = %context);
    context.scope(fut.instrument(span)).await
}
