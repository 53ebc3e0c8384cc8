//! Pipeline - handler を包む decorator 群
//!
//! - **chain**: `HandlerHook` と、それを handler の周りに適用する `Decorated`
//! - **expression**: `${token}` の解決
//! - **delay**: 実行前の待機
//! - **timing**: ステータス遷移と経過時間の記録（dispatcher が必ず最外周に付ける）

pub mod chain;
pub mod delay;
pub mod expression;
pub mod timing;

pub use self::chain::{Decorated, HandlerHook};
pub use self::delay::DelayHook;
pub use self::expression::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_LENGTH, DEFAULT_PATTERN, ExpressionHook, ExpressionResolver};
pub use self::timing::{Timed, describe_elapsed};
