//! Handler trait - Task の payload を処理する Handler の定義
//!
//! # 二層構造
//! - `handle(&mut payload)`: ドメインロジック本体。任意のエラーを返してよい
//! - `apply(&task)`: アダプタ。payload の複製に対して handle を呼び、
//!   成功なら task id 付きの `TaskResult`、失敗なら `TaskError::ExecutionFailed` に変換する

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{BoxError, Payload, Task, TaskError, TaskResult};

/// Handler は payload を受け取って `R` を返す
///
/// # 使用例
/// ```ignore
/// struct Shout;
///
/// #[async_trait]
/// impl TaskHandler<String, String> for Shout {
///     async fn handle(&self, payload: &mut String) -> Result<String, BoxError> {
///         Ok(payload.to_uppercase())
///     }
/// }
/// ```
///
/// # ジェネリクスによる型安全性
/// - `TaskHandler<String, _>` は `String` の payload しか受け取れない
/// - registry は `TypeId` で引くので、コンパイル時の型と実行時の解決が一致する
#[async_trait]
pub trait TaskHandler<T: Payload, R: Send + 'static>: Send + Sync {
    async fn handle(&self, payload: &mut T) -> Result<R, BoxError>;

    async fn apply(&self, task: &Task<T>) -> Result<TaskResult<R>, TaskError> {
        let mut payload = task.payload().clone();
        match self.handle(&mut payload).await {
            Ok(value) => Ok(TaskResult::new(task.id(), value)),
            Err(cause) => Err(TaskError::execution_failed(cause)),
        }
    }
}

#[async_trait]
impl<T, R, H> TaskHandler<T, R> for Arc<H>
where
    T: Payload,
    R: Send + 'static,
    H: TaskHandler<T, R> + ?Sized,
{
    async fn handle(&self, payload: &mut T) -> Result<R, BoxError> {
        (**self).handle(payload).await
    }

    async fn apply(&self, task: &Task<T>) -> Result<TaskResult<R>, TaskError> {
        (**self).apply(task).await
    }
}

/// Synchronous closure adapted into a `TaskHandler`.
pub struct FnHandler<T, R, F> {
    f: F,
    _marker: PhantomData<fn(&mut T) -> R>,
}

/// Adapt `f` into a handler.
///
/// ```ignore
/// let upper = handler_fn(|s: &mut String| Ok(s.to_uppercase()));
/// ```
pub fn handler_fn<T, R, F>(f: F) -> FnHandler<T, R, F>
where
    F: Fn(&mut T) -> Result<R, BoxError> + Send + Sync,
{
    FnHandler {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<T, R, F> TaskHandler<T, R> for FnHandler<T, R, F>
where
    T: Payload,
    R: Send + 'static,
    F: Fn(&mut T) -> Result<R, BoxError> + Send + Sync,
{
    async fn handle(&self, payload: &mut T) -> Result<R, BoxError> {
        (self.f)(payload)
    }
}
