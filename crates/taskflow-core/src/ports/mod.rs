//! Ports - 抽象化レイヤー
//!
//! エンジンが外部に求めるインターフェースを trait として定義します。
//! 実装は `impls` に置きます。

pub mod clock;
pub mod evaluator;
pub mod event_sink;
pub mod id_generator;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::evaluator::{Bindings, Evaluator};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator, default_generator};
