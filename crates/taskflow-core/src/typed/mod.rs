//! Typed - handler と、その解決
//!
//! # 二層構造
//! - **表層（Typed）**: `TaskHandler<T, R>` - payload 型と結果型がコンパイル時に決まる
//! - **内部（型消去）**: `HandlerRegistry` が `TypeId` をキーに `dyn Any` で保持する

pub mod factory;
pub mod handler;
pub mod registry;

pub use self::factory::{DelayLayer, ExpressionLayer, HandlerFactory, HookLayer, LayeredFactory};
pub use self::handler::{FnHandler, TaskHandler, handler_fn};
pub use self::registry::{HandlerRegistry, RegistryBuilder, RegistryError};
