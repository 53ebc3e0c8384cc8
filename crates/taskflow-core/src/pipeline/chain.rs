//! Decorated - hook のリストを 1 つの runner で handler の周りに適用する
//!
//! 各 hook は try/finally の 1 層に相当します。
//!
//! ```text
//! hook[0].before → hook[1].before → inner.handle
//!                                 → hook[1].after → hook[1].finally → hook[1].cleanup
//!                → hook[0].after  → hook[0].finally → hook[0].cleanup
//! ```
//!
//! - `after_handle` はその層より内側がすべて成功したときだけ呼ばれる
//! - `finally_internal` と `cleanup` は、その層の `before_handle` が呼ばれていれば必ず呼ばれる
//! - 最初のエラーが結果になり、後続の hook のエラーは WARN ログに残して捨てる

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::{BoxError, Payload};
use crate::typed::TaskHandler;

/// Cross-cutting behavior around a handler. Every hook defaults to a no-op.
#[async_trait]
pub trait HandlerHook<T: Payload>: Send + Sync {
    async fn before_handle(&self, _payload: &mut T) -> Result<(), BoxError> {
        Ok(())
    }

    async fn after_handle(&self, _payload: &mut T) -> Result<(), BoxError> {
        Ok(())
    }

    async fn finally_internal(&self, _payload: &mut T) -> Result<(), BoxError> {
        Ok(())
    }

    async fn cleanup(&self, _payload: &mut T) -> Result<(), BoxError> {
        Ok(())
    }
}

/// A handler wrapped in an ordered list of hooks (outermost first).
pub struct Decorated<T: Payload, R> {
    hooks: Vec<Arc<dyn HandlerHook<T>>>,
    inner: Arc<dyn TaskHandler<T, R>>,
}

impl<T: Payload, R: Send + 'static> Decorated<T, R> {
    pub fn new(inner: Arc<dyn TaskHandler<T, R>>) -> Self {
        Self {
            hooks: Vec::new(),
            inner,
        }
    }

    /// Add `hook` as the new outermost layer.
    pub fn wrap(mut self, hook: Arc<dyn HandlerHook<T>>) -> Self {
        self.hooks.insert(0, hook);
        self
    }

    /// Add `hook` as the new innermost layer.
    pub fn wrap_inner(mut self, hook: Arc<dyn HandlerHook<T>>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn depth(&self) -> usize {
        self.hooks.len()
    }
}

#[async_trait]
impl<T: Payload, R: Send + 'static> TaskHandler<T, R> for Decorated<T, R> {
    async fn handle(&self, payload: &mut T) -> Result<R, BoxError> {
        let mut entered = 0;
        let mut early_failure = None;
        for hook in &self.hooks {
            entered += 1;
            if let Err(err) = hook.before_handle(payload).await {
                early_failure = Some(err);
                break;
            }
        }

        let mut outcome = match early_failure {
            Some(err) => Err(err),
            None => self.inner.handle(payload).await,
        };

        for hook in self.hooks[..entered].iter().rev() {
            if outcome.is_ok()
                && let Err(err) = hook.after_handle(payload).await
            {
                outcome = Err(err);
            }
            let finished = hook.finally_internal(payload).await;
            let cleaned = hook.cleanup(payload).await;
            for err in [finished, cleaned].into_iter().filter_map(Result::err) {
                if let Err(first) = &outcome {
                    warn!(error = %err, first = %first, "hook failure suppressed");
                } else {
                    outcome = Err(err);
                }
            }
        }

        outcome
    }
}
