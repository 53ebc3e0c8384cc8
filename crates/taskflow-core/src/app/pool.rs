//! WorkerPool - tokio 上の同時実行数制限付きワーカープール
//!
//! # 設計
//! - 投入された work は即座に `spawn` され、`Semaphore` の permit を取ってから実行される
//! - `shutdown()`: 新規投入を拒否し、待機中・実行中の work はそのまま流す
//! - `shutdown_now()`: 加えて、permit 待ちの work を止め（`on_stopped`）、
//!   実行中の work には task-local の中断シグナルを送る
//!
//! 中断は協調的です。handler は `interrupted()` を `select!` して自分で失敗として扱う。

use std::fmt;
use std::future::{Future, pending};
use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

tokio::task_local! {
    static INTERRUPT: watch::Receiver<PoolState>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Running,
    ShuttingDown,
    Interrupted,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Shutdown,

    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] TryCurrentError),
}

struct PoolInner {
    runtime: Handle,
    max_workers: usize,
    permits: Arc<Semaphore>,
    state: watch::Sender<PoolState>,
    active: watch::Sender<usize>,
}

/// Shared, cloneable handle to a bounded worker pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

/// 投入された work の数を数える。spawn した future が終わる（drop される）と減る
struct ActiveGuard(Arc<PoolInner>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl WorkerPool {
    /// Pool on the current tokio runtime.
    pub fn new(max_workers: usize) -> Result<Self, PoolError> {
        Self::with_handle(Handle::try_current()?, max_workers)
    }

    pub fn with_handle(runtime: Handle, max_workers: usize) -> Result<Self, PoolError> {
        if max_workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        let (state, _) = watch::channel(PoolState::Running);
        let (active, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(PoolInner {
                runtime,
                max_workers,
                permits: Arc::new(Semaphore::new(max_workers)),
                state,
                active,
            }),
        })
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Submit `work`. If the pool is interrupted before a worker picks it up,
    /// `on_stopped` produces the output instead.
    pub fn submit<W, S, O>(&self, work: W, on_stopped: S) -> Result<JoinHandle<O>, PoolError>
    where
        W: Future<Output = O> + Send + 'static,
        S: FnOnce() -> O + Send + 'static,
        O: Send + 'static,
    {
        if self.is_shutdown() {
            return Err(PoolError::Shutdown);
        }

        self.inner.active.send_modify(|n| *n += 1);
        let guard = ActiveGuard(Arc::clone(&self.inner));
        let inner = Arc::clone(&self.inner);

        Ok(self.inner.runtime.spawn(async move {
            let _guard = guard;
            let mut state = inner.state.subscribe();
            let permit = tokio::select! {
                biased;
                _ = wait_interrupted(&mut state) => None,
                permit = Arc::clone(&inner.permits).acquire_owned() => permit.ok(),
            };
            let Some(_permit) = permit else {
                debug!("queued work stopped before it started");
                return on_stopped();
            };
            INTERRUPT.scope(state, work).await
        }))
    }

    /// Stop accepting work; queued and running work still completes.
    pub fn shutdown(&self) {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == PoolState::Running {
                *state = PoolState::ShuttingDown;
                return true;
            }
            false
        });
        if changed {
            info!(active = self.active(), "worker pool shutting down");
        }
    }

    /// Stop accepting work, stop queued work and interrupt running work.
    pub fn shutdown_now(&self) {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state != PoolState::Interrupted {
                *state = PoolState::Interrupted;
                return true;
            }
            false
        });
        if changed {
            info!(
                active = self.active(),
                queued = self.queued(),
                "worker pool interrupted"
            );
        }
    }

    pub fn state(&self) -> PoolState {
        *self.inner.state.borrow()
    }

    pub fn is_shutdown(&self) -> bool {
        self.state() != PoolState::Running
    }

    /// Submitted work that has not finished yet (queued or running).
    pub fn active(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Submitted work still waiting for a worker.
    pub fn queued(&self) -> usize {
        let running = self.inner.max_workers - self.inner.permits.available_permits();
        self.active().saturating_sub(running)
    }

    /// Resolves once the pool is shut down and all submitted work is gone.
    pub async fn terminated(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| *s != PoolState::Running).await;
        let mut active = self.inner.active.subscribe();
        let _ = active.wait_for(|n| *n == 0).await;
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.inner.max_workers)
            .field("state", &self.state())
            .field("active", &self.active())
            .finish()
    }
}

async fn wait_interrupted(state: &mut watch::Receiver<PoolState>) {
    if state
        .wait_for(|s| *s == PoolState::Interrupted)
        .await
        .is_err()
    {
        pending::<()>().await;
    }
}

/// Resolves when the pool running the current work receives `shutdown_now`.
///
/// pool の外（scope がない）では永遠に解決しない。
pub async fn interrupted() {
    match INTERRUPT.try_with(|state| state.clone()) {
        Ok(mut state) => wait_interrupted(&mut state).await,
        Err(_) => pending::<()>().await,
    }
}

/// Non-blocking check for `shutdown_now`.
pub fn is_interrupted() -> bool {
    INTERRUPT
        .try_with(|state| *state.borrow() == PoolState::Interrupted)
        .unwrap_or(false)
}
