//! DispatcherBuilder - TaskDispatcher の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - factory が無ければ `BuildError::MissingFactory`
//! - pool を渡さなければ現在の tokio runtime 上に `max_workers` で作る。
//!   runtime が無い・ワーカー数が 0 なら `BuildError::Pool`

use std::sync::Arc;

use super::dispatcher::TaskDispatcher;
use super::pool::{PoolError, WorkerPool};
use crate::config::DispatcherConfig;
use crate::domain::TaskObserver;
use crate::observe::StatusListener;
use crate::ports::{Clock, EventSink, NoopEventSink, SystemClock};
use crate::typed::HandlerFactory;

/// BuildError は dispatcher 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("a dispatcher needs a handler factory")]
    MissingFactory,

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// DispatcherBuilder は TaskDispatcher を組み立てる
///
/// # 使用例
/// ```ignore
/// let dispatcher = TaskDispatcher::builder()
///     .factory(registry)
///     .config(&DispatcherConfig::from_env()?)
///     .listener(&listener)
///     .build()?;
/// ```
pub struct DispatcherBuilder<F> {
    factory: Option<F>,
    pool: Option<WorkerPool>,
    config: DispatcherConfig,
    observers: Vec<Arc<dyn TaskObserver>>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl<F: HandlerFactory> DispatcherBuilder<F> {
    pub fn new() -> Self {
        Self {
            factory: None,
            pool: None,
            config: DispatcherConfig::default(),
            observers: Vec::new(),
            events: Arc::new(NoopEventSink),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn factory(mut self, factory: F) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Share an existing pool instead of creating one.
    pub fn pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn config(mut self, config: &DispatcherConfig) -> Self {
        self.config = config.clone();
        self
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = max_workers;
        self
    }

    pub fn discriminated(mut self, discriminated: bool) -> Self {
        self.config.discriminated = discriminated;
        self
    }

    /// Attach `observer` to every dispatched task.
    pub fn observer(mut self, observer: Arc<dyn TaskObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn listener(self, listener: &StatusListener) -> Self {
        self.observer(listener.observer())
    }

    /// Publish `DispatchEvent`s to `events`.
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Clock used to stamp events.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<TaskDispatcher<F>, BuildError> {
        let factory = self.factory.ok_or(BuildError::MissingFactory)?;
        let pool = match self.pool {
            Some(pool) => pool,
            None => WorkerPool::new(self.config.max_workers)?,
        };
        let observers = if self.config.observers_enabled {
            self.observers
        } else {
            Vec::new()
        };
        Ok(TaskDispatcher::new(
            factory,
            pool,
            observers,
            self.events,
            self.clock,
            self.config.discriminated,
        ))
    }
}

impl<F: HandlerFactory> Default for DispatcherBuilder<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::HandlerRegistry;

    fn registry() -> HandlerRegistry {
        HandlerRegistry::builder().build().unwrap()
    }

    #[tokio::test]
    async fn test_build_success() {
        let dispatcher = DispatcherBuilder::new()
            .factory(registry())
            .max_workers(3)
            .build()
            .unwrap();
        assert_eq!(dispatcher.pool().max_workers(), 3);
        assert!(!dispatcher.is_discriminated());
    }

    #[tokio::test]
    async fn test_build_missing_factory() {
        let result = DispatcherBuilder::<HandlerRegistry>::new().build();
        assert!(matches!(result, Err(BuildError::MissingFactory)));
    }

    #[tokio::test]
    async fn test_build_zero_workers() {
        let result = DispatcherBuilder::new()
            .factory(registry())
            .max_workers(0)
            .build();
        assert!(matches!(result, Err(BuildError::Pool(PoolError::NoWorkers))));
    }

    #[test]
    fn test_build_without_runtime() {
        let result = DispatcherBuilder::new().factory(registry()).build();
        assert!(matches!(result, Err(BuildError::Pool(PoolError::NoRuntime(_)))));
    }

    #[tokio::test]
    async fn test_build_applies_config() {
        let config = DispatcherConfig {
            max_workers: 2,
            discriminated: true,
            observers_enabled: false,
        };
        let (listener, _events) = StatusListener::channel();
        let dispatcher = DispatcherBuilder::new()
            .factory(registry())
            .listener(&listener)
            .config(&config)
            .build()
            .unwrap();
        assert_eq!(dispatcher.pool().max_workers(), 2);
        assert!(dispatcher.is_discriminated());
        assert_eq!(dispatcher.observer_count(), 0);
    }
}
