//! App - アプリケーション層
//!
//! ports と typed を組み合わせて、Task の実行を組み立てます。
//!
//! # 主要コンポーネント
//! - **DispatcherBuilder**: dispatcher の構築とワイヤリング
//! - **TaskDispatcher**: handler の解決と worker pool への投入
//! - **WorkerPool**: 同時実行数の制限と shutdown / shutdown_now
//! - **DiagnosticContext**: 実行単位ごとのログ用キー/値

pub mod builder;
pub mod context;
pub mod dispatcher;
pub mod pool;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, DispatcherBuilder};
pub use self::context::{DiagnosticContext, TASK_ID_KEY};
pub use self::dispatcher::{TaskDispatcher, TaskHandle};
pub use self::pool::{PoolError, PoolState, WorkerPool, interrupted, is_interrupted};
