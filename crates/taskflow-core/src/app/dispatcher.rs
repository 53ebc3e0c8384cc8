//! TaskDispatcher - Task を handler に対応付け、worker pool で実行する
//!
//! # フロー
//! 1. ステータスが NOT_STARTED か確認（再 dispatch は `AlreadyDispatched`）
//! 2. HandlerFactory で handler を解決（未登録なら `NoSuitableHandlerFound`、handler は動かない）
//! 3. 事前に設定された observer を task に登録
//! 4. handler を `Timed` で包み、unit of work を組み立てる
//! 5. WorkerPool に投入して `TaskHandle` を即座に返す。投入できなければ 3 で登録した observer を外す
//! 6. `EventSink` へ `Dispatched` を出す
//!
//! discriminated モードでは、投入時点の `DiagnosticContext` を取り込み、
//! worker 側で `task-id` を加えた context と span の中で実行する。

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;
use tracing::debug;

use super::builder::DispatcherBuilder;
use super::context::{DiagnosticContext, discriminate};
use super::pool::WorkerPool;
use crate::domain::{
    DispatchError, DispatchEvent, Payload, Status, Task, TaskError, TaskId, TaskObserver,
    TaskResult,
};
use crate::pipeline::Timed;
use crate::ports::{Clock, EventSink};
use crate::typed::{HandlerFactory, TaskHandler};

/// Executor-backed dispatcher.
pub struct TaskDispatcher<F> {
    factory: F,
    pool: WorkerPool,
    observers: Vec<Arc<dyn TaskObserver>>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    discriminated: bool,
}

impl<F: HandlerFactory> TaskDispatcher<F> {
    pub fn builder() -> DispatcherBuilder<F> {
        DispatcherBuilder::new()
    }

    pub(crate) fn new(
        factory: F,
        pool: WorkerPool,
        observers: Vec<Arc<dyn TaskObserver>>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        discriminated: bool,
    ) -> Self {
        Self {
            factory,
            pool,
            observers,
            events,
            clock,
            discriminated,
        }
    }

    /// Submit `task` for execution and return immediately.
    pub fn dispatch<T: Payload, R: Send + 'static>(
        &self,
        task: &Arc<Task<T>>,
    ) -> Result<TaskHandle<R>, DispatchError> {
        let task_id = task.id();
        let status = task.status();
        if status != Status::NotStarted {
            return Err(DispatchError::AlreadyDispatched { task_id, status });
        }

        let handler = self.factory.get::<T, R>(task)?;

        let mut subscribed = Vec::new();
        for observer in &self.observers {
            if task.subscribe(Arc::clone(observer)) {
                subscribed.push(observer);
            }
        }

        let timed =
            Timed::new(handler).with_events(Arc::clone(&self.events), Arc::clone(&self.clock));
        let running = Arc::clone(task);
        let work = async move {
            timed
                .apply(&running)
                .await
                .map(TaskResult::into_value)
        };
        let stopped = Arc::clone(task);
        let on_stopped = move || {
            // 既に終端なら何もしない（通知も二重にならない）
            let _ = stopped.stop();
            Err(TaskError::Stopped { task_id })
        };

        let submitted = if self.discriminated {
            let captured = DiagnosticContext::current();
            self.pool
                .submit(discriminate(captured, task_id, work), on_stopped)
        } else {
            self.pool.submit(work, on_stopped)
        };
        let join = match submitted {
            Ok(join) => join,
            Err(err) => {
                for observer in subscribed {
                    task.unsubscribe(observer);
                }
                return Err(err.into());
            }
        };

        let payload_type = std::any::type_name::<T>();
        self.events.emit(DispatchEvent::Dispatched {
            task_id,
            payload_type: payload_type.to_string(),
            at: self.clock.now(),
        });
        debug!(
            task_id = %task_id,
            payload_type,
            discriminated = self.discriminated,
            "task dispatched"
        );
        Ok(TaskHandle { task_id, join })
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    pub fn shutdown_now(&self) {
        self.pool.shutdown_now();
    }

    pub fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }

    /// Resolves once shut down and every dispatched task has finished.
    pub async fn terminated(&self) {
        self.pool.terminated().await;
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn is_discriminated(&self) -> bool {
        self.discriminated
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

impl<F> fmt::Debug for TaskDispatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("pool", &self.pool)
            .field("observers", &self.observers.len())
            .field("discriminated", &self.discriminated)
            .finish_non_exhaustive()
    }
}

/// Pending result of a dispatched task.
#[derive(Debug)]
pub struct TaskHandle<R> {
    task_id: TaskId,
    join: JoinHandle<Result<R, TaskError>>,
}

impl<R> TaskHandle<R> {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl<R> Future for TaskHandle<R> {
    type Output = Result<R, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task_id = self.task_id;
        Pin::new(&mut self.join).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(err) => Err(TaskError::Aborted {
                task_id,
                reason: err.to_string(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::context::TASK_ID_KEY;
    use crate::app::pool::{PoolError, interrupted};
    use crate::domain::{BoxError, Document, EvaluationError, Interrupted, StatusChanged, Subscription};
    use crate::observe::StatusListener;
    use crate::pipeline::ExpressionResolver;
    use crate::ports::{Bindings, FixedClock};
    use crate::typed::{DelayLayer, ExpressionLayer, HandlerRegistry, LayeredFactory, handler_fn};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn upper_registry() -> HandlerRegistry {
        HandlerRegistry::builder()
            .register::<String, String, _>(handler_fn(|s: &mut String| -> Result<String, BoxError> {
                Ok(s.to_uppercase())
            }))
            .unwrap()
            .build()
            .unwrap()
    }

    fn dispatcher<F: HandlerFactory>(factory: F) -> TaskDispatcher<F> {
        TaskDispatcher::builder()
            .factory(factory)
            .max_workers(4)
            .build()
            .unwrap()
    }

    fn transitions(events: &mut tokio::sync::mpsc::UnboundedReceiver<StatusChanged>) -> Vec<Status> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if seen.is_empty() {
                seen.push(event.old);
            }
            seen.push(event.new);
        }
        seen
    }

    #[tokio::test]
    async fn uppercases_a_string_payload() {
        let dispatcher = dispatcher(upper_registry());
        let task = Arc::new(Task::wrap(String::from("hello")));

        let value = dispatcher.dispatch::<String, String>(&task).unwrap().await.unwrap();

        assert_eq!(value, "HELLO");
        assert_eq!(task.status(), Status::Successful);
    }

    #[tokio::test]
    async fn observers_see_the_full_status_sequence() {
        let (listener, mut events) = StatusListener::channel();
        let dispatcher = TaskDispatcher::builder()
            .factory(upper_registry())
            .listener(&listener)
            .build()
            .unwrap();
        let task = Arc::new(Task::wrap(String::from("abc")));

        dispatcher.dispatch::<String, String>(&task).unwrap().await.unwrap();

        assert_eq!(
            transitions(&mut events),
            vec![Status::NotStarted, Status::InProgress, Status::Successful]
        );
        // 終端に達した listener は外れている
        assert_eq!(task.observer_count(), 0);
    }

    #[tokio::test]
    async fn failing_handler_ends_failed() {
        let registry = HandlerRegistry::builder()
            .register::<String, String, _>(handler_fn(|_: &mut String| -> Result<String, BoxError> {
                Err("bad input".into())
            }))
            .unwrap()
            .build()
            .unwrap();
        let (listener, mut events) = StatusListener::channel();
        let dispatcher = TaskDispatcher::builder()
            .factory(registry)
            .listener(&listener)
            .build()
            .unwrap();
        let task = Arc::new(Task::wrap(String::from("abc")));

        let err = dispatcher.dispatch::<String, String>(&task).unwrap().await.unwrap_err();

        assert_eq!(err.to_string(), "execution failed with [bad input]");
        assert_eq!(
            transitions(&mut events),
            vec![Status::NotStarted, Status::InProgress, Status::Failed]
        );
        assert!(task.failure_cause().is_some());
    }

    #[tokio::test]
    async fn unregistered_payload_type_is_rejected_before_running() {
        let (listener, mut events) = StatusListener::channel();
        let dispatcher = TaskDispatcher::builder()
            .factory(upper_registry())
            .listener(&listener)
            .build()
            .unwrap();
        let task = Arc::new(Task::wrap(42_i32));

        let err = dispatcher.dispatch::<i32, String>(&task).err().unwrap();

        assert!(matches!(
            err,
            DispatchError::NoSuitableHandlerFound { payload_type: "i32" }
        ));
        assert_eq!(task.status(), Status::NotStarted);
        assert_eq!(task.observer_count(), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn a_task_is_dispatched_at_most_once() {
        let dispatcher = dispatcher(upper_registry());
        let task = Arc::new(Task::wrap(String::from("once")));
        dispatcher.dispatch::<String, String>(&task).unwrap().await.unwrap();

        let err = dispatcher.dispatch::<String, String>(&task).err().unwrap();

        assert!(matches!(
            err,
            DispatchError::AlreadyDispatched {
                status: Status::Successful,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_handler_takes_at_least_the_delay() {
        let registry = HandlerRegistry::builder()
            .register::<u8, (), _>(handler_fn(|_: &mut u8| -> Result<(), BoxError> { Ok(()) }))
            .unwrap()
            .build()
            .unwrap();
        let dispatcher = dispatcher(LayeredFactory::new(
            registry,
            DelayLayer::new(Duration::from_secs(2)),
        ));
        let task = Arc::new(Task::wrap(0_u8));

        dispatcher.dispatch::<u8, ()>(&task).unwrap().await.unwrap();

        assert_eq!(task.status(), Status::Successful);
        assert!(task.elapsed() >= Duration::from_millis(2000));
    }

    fn bindings_only(expression: &str, bindings: &Bindings) -> Result<String, EvaluationError> {
        bindings
            .get(expression)
            .cloned()
            .ok_or_else(|| EvaluationError::Unresolved(expression.to_string()))
    }

    fn echo_registry() -> HandlerRegistry {
        HandlerRegistry::builder()
            .register::<Document, String, _>(handler_fn(|d: &mut Document| -> Result<String, BoxError> {
                Ok(d.content().to_string())
            }))
            .unwrap()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn expressions_resolve_before_the_handler_runs() {
        let factory = LayeredFactory::new(
            echo_registry(),
            ExpressionLayer::new(ExpressionResolver::new(Arc::new(bindings_only))),
        );
        let dispatcher = dispatcher(factory);
        let task = Arc::new(Task::wrap(
            Document::new("Dear ${name},").with_parameter("name", "Ada"),
        ));

        let value = dispatcher.dispatch::<Document, String>(&task).unwrap().await.unwrap();

        assert_eq!(value, "Dear Ada,");
    }

    #[tokio::test]
    async fn unresolved_expression_fails_the_task() {
        let factory = LayeredFactory::new(
            echo_registry(),
            ExpressionLayer::new(ExpressionResolver::new(Arc::new(bindings_only))),
        );
        let dispatcher = dispatcher(factory);
        let task = Arc::new(Task::wrap(Document::new("${unknown}")));

        let err = dispatcher.dispatch::<Document, String>(&task).unwrap().await.unwrap_err();

        assert_eq!(
            err.cause().and_then(|c| c.downcast_ref::<EvaluationError>()),
            Some(&EvaluationError::Unresolved("unknown".to_string()))
        );
        assert_eq!(task.status(), Status::Failed);
    }

    struct ContextReader;

    #[async_trait]
    impl TaskHandler<u32, (Option<String>, Option<String>)> for ContextReader {
        async fn handle(
            &self,
            _payload: &mut u32,
        ) -> Result<(Option<String>, Option<String>), BoxError> {
            let before = DiagnosticContext::current_value(TASK_ID_KEY);
            tokio::time::sleep(Duration::from_millis(10)).await;
            let after = DiagnosticContext::current_value(TASK_ID_KEY);
            Ok((before, after))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn discriminated_tasks_see_only_their_own_id() {
        let registry = HandlerRegistry::builder()
            .register::<u32, (Option<String>, Option<String>), _>(ContextReader)
            .unwrap()
            .build()
            .unwrap();
        let dispatcher = TaskDispatcher::builder()
            .factory(registry)
            .discriminated(true)
            .build()
            .unwrap();
        let tasks: Vec<Arc<Task<u32>>> = (0..8).map(|n| Arc::new(Task::wrap(n))).collect();

        let handles: Vec<_> = DiagnosticContext::new()
            .with("request", "r-1")
            .sync_scope(|| {
                tasks
                    .iter()
                    .map(|task| dispatcher.dispatch::<u32, (Option<String>, Option<String>)>(task))
                    .collect::<Result<_, _>>()
            })
            .unwrap();

        for (task, handle) in tasks.iter().zip(handles) {
            let expected = Some(task.id().to_string());
            let (before, after) = handle.await.unwrap();
            assert_eq!(before, expected);
            assert_eq!(after, expected);
        }
        assert!(DiagnosticContext::current().is_none());
    }

    #[tokio::test]
    async fn without_discrimination_no_context_is_installed() {
        let registry = HandlerRegistry::builder()
            .register::<u32, (Option<String>, Option<String>), _>(ContextReader)
            .unwrap()
            .build()
            .unwrap();
        let dispatcher = dispatcher(registry);
        let task = Arc::new(Task::wrap(1_u32));

        let (before, after) = dispatcher
            .dispatch::<u32, (Option<String>, Option<String>)>(&task)
            .unwrap()
            .await
            .unwrap();

        assert_eq!((before, after), (None, None));
    }

    struct WaitForInterrupt;

    #[async_trait]
    impl TaskHandler<u8, ()> for WaitForInterrupt {
        async fn handle(&self, _payload: &mut u8) -> Result<(), BoxError> {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(3600)) => Ok(()),
                _ = interrupted() => Err(Box::new(Interrupted { waited: Duration::ZERO }) as BoxError),
            }
        }
    }

    #[tokio::test]
    async fn shutdown_now_interrupts_running_and_stops_queued_tasks() {
        let registry = HandlerRegistry::builder()
            .register::<u8, (), _>(WaitForInterrupt)
            .unwrap()
            .build()
            .unwrap();
        let dispatcher = TaskDispatcher::builder()
            .factory(registry)
            .max_workers(1)
            .build()
            .unwrap();
        let (listener, mut events) = StatusListener::channel();
        let running = Arc::new(Task::wrap(1_u8));
        let queued = Arc::new(Task::wrap(2_u8));
        let running_handle = dispatcher.dispatch::<u8, ()>(&running).unwrap();
        listener.register_to(&queued);
        let queued_handle = dispatcher.dispatch::<u8, ()>(&queued).unwrap();
        while running.status() != Status::InProgress {
            tokio::task::yield_now().await;
        }

        dispatcher.shutdown_now();

        let err = running_handle.await.unwrap_err();
        assert!(
            err.cause()
                .and_then(|c| c.downcast_ref::<Interrupted>())
                .is_some()
        );
        assert_eq!(running.status(), Status::Failed);

        assert!(matches!(queued_handle.await, Err(TaskError::Stopped { .. })));
        assert_eq!(queued.status(), Status::Stopped);
        assert_eq!(
            transitions(&mut events),
            vec![Status::NotStarted, Status::Stopped]
        );

        dispatcher.terminated().await;
        assert!(matches!(
            dispatcher.dispatch::<u8, ()>(&Arc::new(Task::wrap(3_u8))),
            Err(DispatchError::Pool(PoolError::Shutdown))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_interrupted_by_shutdown_now() {
        let registry = HandlerRegistry::builder()
            .register::<u8, (), _>(handler_fn(|_: &mut u8| -> Result<(), BoxError> { Ok(()) }))
            .unwrap()
            .build()
            .unwrap();
        let dispatcher = dispatcher(LayeredFactory::new(
            registry,
            DelayLayer::new(Duration::from_secs(60)),
        ));
        let task = Arc::new(Task::wrap(0_u8));
        let handle = dispatcher.dispatch::<u8, ()>(&task).unwrap();
        while task.status() != Status::InProgress {
            tokio::task::yield_now().await;
        }

        dispatcher.shutdown_now();
        let err = handle.await.unwrap_err();

        assert!(
            err.cause()
                .and_then(|c| c.downcast_ref::<Interrupted>())
                .is_some()
        );
        assert_eq!(task.status(), Status::Failed);
    }

    #[tokio::test]
    async fn graceful_shutdown_drains_dispatched_tasks() {
        let dispatcher = dispatcher(upper_registry());
        let tasks: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|s| Arc::new(Task::wrap(s.to_string())))
            .collect();
        let handles: Vec<_> = tasks
            .iter()
            .map(|task| dispatcher.dispatch::<String, String>(task).unwrap())
            .collect();

        dispatcher.shutdown();
        dispatcher.terminated().await;

        for handle in handles {
            assert!(handle.await.is_ok());
        }
        assert!(tasks.iter().all(|t| t.status() == Status::Successful));
    }

    #[tokio::test]
    async fn panicking_handler_fails_instead_of_aborting() {
        let registry = HandlerRegistry::builder()
            .register::<u8, u8, _>(handler_fn(|_: &mut u8| -> Result<u8, BoxError> {
                panic!("handler bug")
            }))
            .unwrap()
            .build()
            .unwrap();
        let dispatcher = dispatcher(registry);
        let task = Arc::new(Task::wrap(0_u8));

        let err = dispatcher.dispatch::<u8, u8>(&task).unwrap().await.unwrap_err();

        assert!(matches!(err, TaskError::ExecutionFailed { .. }));
        assert_eq!(task.status(), Status::Failed);
    }

    #[tokio::test]
    async fn dispatch_publishes_lifecycle_events() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<DispatchEvent>();
        let dispatcher = TaskDispatcher::builder()
            .factory(upper_registry())
            .events(Arc::new(tx))
            .clock(Arc::new(FixedClock::new(at)))
            .build()
            .unwrap();
        let task = Arc::new(Task::wrap(String::from("evt")));

        dispatcher.dispatch::<String, String>(&task).unwrap().await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            DispatchEvent::Dispatched {
                task_id: task.id(),
                payload_type: std::any::type_name::<String>().to_string(),
                at,
            }
        );
        assert_eq!(
            events[1],
            DispatchEvent::ExecutionStarted {
                task_id: task.id(),
                at
            }
        );
        assert!(matches!(
            events[2],
            DispatchEvent::ExecutionEnded { status: Status::Successful, .. }
        ));
        assert!(events.iter().all(|e| e.task_id() == task.id()));
    }

    #[tokio::test]
    async fn rejected_dispatch_leaves_no_observers_behind() {
        let (listener, _events) = StatusListener::channel();
        let dispatcher = TaskDispatcher::builder()
            .factory(upper_registry())
            .listener(&listener)
            .build()
            .unwrap();
        dispatcher.shutdown();
        let task = Arc::new(Task::wrap(String::from("late")));

        let err = dispatcher.dispatch::<String, String>(&task).err().unwrap();

        assert!(matches!(err, DispatchError::Pool(PoolError::Shutdown)));
        assert_eq!(task.observer_count(), 0);
        assert_eq!(task.status(), Status::NotStarted);
    }

    struct PanicsOnStart;

    impl TaskObserver for PanicsOnStart {
        fn status_changed(&self, event: &StatusChanged) -> Subscription {
            if event.new == Status::InProgress {
                panic!("observer bug");
            }
            Subscription::Keep
        }
    }

    #[tokio::test]
    async fn panicking_observer_does_not_strand_the_task() {
        let registry = HandlerRegistry::builder()
            .register::<u8, u8, _>(handler_fn(|n: &mut u8| -> Result<u8, BoxError> { Ok(*n) }))
            .unwrap()
            .build()
            .unwrap();
        let (listener, mut events) = StatusListener::channel();
        let dispatcher = TaskDispatcher::builder()
            .factory(registry)
            .observer(Arc::new(PanicsOnStart))
            .listener(&listener)
            .build()
            .unwrap();
        let task = Arc::new(Task::wrap(7_u8));

        let value = dispatcher.dispatch::<u8, u8>(&task).unwrap().await.unwrap();

        assert_eq!(value, 7);
        assert_eq!(task.status(), Status::Successful);
        assert_eq!(
            transitions(&mut events),
            vec![Status::NotStarted, Status::InProgress, Status::Successful]
        );
    }
}
