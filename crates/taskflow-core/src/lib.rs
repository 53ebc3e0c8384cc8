//! taskflow-core
//!
//! 型付きの Task を handler に対応付け、decorator で包み、worker pool で非同期に実行する。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, task, payload, outcome, events, errors）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, Evaluator, EventSink）
//! - **typed**: handler と、その解決（TaskHandler, HandlerRegistry, HandlerFactory）
//! - **pipeline**: handler を包む decorator（hook chain, expression, delay, timing）
//! - **observe**: ステータス変化の購読（StatusListener）
//! - **app**: dispatcher, worker pool, diagnostic context
//! - **impls**: ports の実装（VariableEvaluator）
//! - **config**: DispatcherConfig

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observe;
pub mod pipeline;
pub mod ports;
pub mod typed;

pub use self::app::{
    BuildError, DiagnosticContext, DispatcherBuilder, TaskDispatcher, TaskHandle, WorkerPool,
};
pub use self::config::{ConfigError, DispatcherConfig};
pub use self::domain::{
    BoxError, DispatchError, DispatchEvent, Document, EvaluationError, Payload, Status,
    StatusChanged, Subscription, Task, TaskError, TaskId, TaskObserver, TaskResult, Templated,
};
pub use self::observe::StatusListener;
pub use self::ports::{EventSink, NoopEventSink};
pub use self::typed::{HandlerFactory, HandlerRegistry, TaskHandler, handler_fn};
