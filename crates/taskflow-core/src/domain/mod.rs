//! Domain model (ids, status, task, payload, results, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod payload;
pub mod state;
pub mod task;

pub use self::errors::{
    BoxError, DispatchError, EvaluationError, Interrupted, SharedError, TaskError,
};
pub use self::events::{DispatchEvent, StatusChanged, Subscription, TaskObserver};
pub use self::ids::TaskId;
pub use self::outcome::TaskResult;
pub use self::payload::{Document, Payload, Templated};
pub use self::state::{Status, StatusParseError};
pub use self::task::Task;
