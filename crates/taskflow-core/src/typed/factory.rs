//! HandlerFactory - Task に対応する handler を解決する
//!
//! `HandlerRegistry` がそのまま基本の factory になります。
//! `LayeredFactory` は別の factory が返した handler を hook で包むので、
//! 重ねるほど外側の decorator が増えます。
//!
//! ```text
//! LayeredFactory(DelayLayer)
//!   └ LayeredFactory(ExpressionLayer)
//!       └ HandlerRegistry
//! => delay.before → expression.before → handler → ... (逆順に unwind)
//! ```

use std::sync::Arc;
use std::time::Duration;

use super::handler::TaskHandler;
use super::registry::HandlerRegistry;
use crate::domain::{DispatchError, Payload, Task};
use crate::pipeline::{Decorated, DelayHook, ExpressionHook, ExpressionResolver, HandlerHook};

/// Resolves the handler for a task's payload type.
pub trait HandlerFactory: Send + Sync + 'static {
    fn get<T: Payload, R: Send + 'static>(
        &self,
        task: &Task<T>,
    ) -> Result<Arc<dyn TaskHandler<T, R>>, DispatchError>;
}

impl HandlerFactory for HandlerRegistry {
    fn get<T: Payload, R: Send + 'static>(
        &self,
        _task: &Task<T>,
    ) -> Result<Arc<dyn TaskHandler<T, R>>, DispatchError> {
        self.lookup::<T, R>()
    }
}

impl<F: HandlerFactory> HandlerFactory for Arc<F> {
    fn get<T: Payload, R: Send + 'static>(
        &self,
        task: &Task<T>,
    ) -> Result<Arc<dyn TaskHandler<T, R>>, DispatchError> {
        (**self).get(task)
    }
}

/// Produces the hook a `LayeredFactory` installs for payload type `T`.
pub trait HookLayer: Send + Sync + 'static {
    fn hook<T: Payload>(&self) -> Arc<dyn HandlerHook<T>>;
}

/// Wraps every handler resolved by `inner` with the hook from `layer`.
pub struct LayeredFactory<F, L> {
    inner: F,
    layer: L,
}

impl<F: HandlerFactory, L: HookLayer> LayeredFactory<F, L> {
    pub fn new(inner: F, layer: L) -> Self {
        Self { inner, layer }
    }

    /// Stack another layer outside this one.
    pub fn layer<L2: HookLayer>(self, outer: L2) -> LayeredFactory<Self, L2> {
        LayeredFactory::new(self, outer)
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

impl<F: HandlerFactory, L: HookLayer> HandlerFactory for LayeredFactory<F, L> {
    fn get<T: Payload, R: Send + 'static>(
        &self,
        task: &Task<T>,
    ) -> Result<Arc<dyn TaskHandler<T, R>>, DispatchError> {
        let resolved = self.inner.get::<T, R>(task)?;
        Ok(Arc::new(
            Decorated::new(resolved).wrap(self.layer.hook::<T>()),
        ))
    }
}

/// Resolves `${token}` expressions in templated payloads.
#[derive(Clone)]
pub struct ExpressionLayer {
    hook: ExpressionHook,
}

impl ExpressionLayer {
    pub fn new(resolver: ExpressionResolver) -> Self {
        Self::shared(Arc::new(resolver))
    }

    pub fn shared(resolver: Arc<ExpressionResolver>) -> Self {
        Self {
            hook: ExpressionHook::new(resolver),
        }
    }
}

impl HookLayer for ExpressionLayer {
    fn hook<T: Payload>(&self) -> Arc<dyn HandlerHook<T>> {
        Arc::new(self.hook.clone())
    }
}

/// Waits a fixed duration before each handler runs.
#[derive(Debug, Clone, Copy)]
pub struct DelayLayer {
    delay: Duration,
}

impl DelayLayer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl HookLayer for DelayLayer {
    fn hook<T: Payload>(&self) -> Arc<dyn HandlerHook<T>> {
        Arc::new(DelayHook::new(self.delay))
    }
}
