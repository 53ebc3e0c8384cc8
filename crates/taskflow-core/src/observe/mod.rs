//! Observe - Task のステータス変化を購読する
//!
//! `StatusListener` は終端ステータス（FAILED / STOPPED / SUCCESSFUL）を受け取った時点で
//! 自動的に購読を解除します。以降の通知は届きません。

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::{StatusChanged, Subscription, Task, TaskObserver};

/// Observer that detaches itself once the task reaches a terminal status.
///
/// # 使用例
/// ```ignore
/// let (listener, mut events) = StatusListener::channel();
/// listener.register_to(&task);
/// while let Some(event) = events.recv().await {
///     println!("{} -> {}", event.old, event.new);
/// }
/// ```
#[derive(Clone)]
pub struct StatusListener {
    observer: Arc<dyn TaskObserver>,
}

struct DetachOnTerminal<F> {
    callback: F,
}

impl<F> TaskObserver for DetachOnTerminal<F>
where
    F: Fn(&StatusChanged) + Send + Sync,
{
    fn status_changed(&self, event: &StatusChanged) -> Subscription {
        (self.callback)(event);
        if event.is_terminal() {
            Subscription::Detach
        } else {
            Subscription::Keep
        }
    }
}

impl StatusListener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&StatusChanged) + Send + Sync + 'static,
    {
        Self {
            observer: Arc::new(DetachOnTerminal { callback }),
        }
    }

    /// Listener that forwards every event into an unbounded channel.
    ///
    /// 送信側は listener が保持するので、listener をすべての task から外して drop すると
    /// 受信側は `None` を返して終わる。
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StatusChanged>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Self::new(move |event| {
            // 受信側が先に閉じていても通知元は止めない
            let _ = tx.send(*event);
        });
        (listener, rx)
    }

    /// Returns `false` if already registered to `task`.
    pub fn register_to<T>(&self, task: &Task<T>) -> bool {
        task.subscribe(Arc::clone(&self.observer))
    }

    pub fn unregister_from<T>(&self, task: &Task<T>) -> bool {
        task.unsubscribe(&self.observer)
    }

    pub fn observer(&self) -> Arc<dyn TaskObserver> {
        Arc::clone(&self.observer)
    }
}

impl fmt::Debug for StatusListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusListener").finish_non_exhaustive()
    }
}
