//! Outcome model: the value a handler produced, tagged with its task.

use serde::{Deserialize, Serialize};

use super::ids::TaskId;

/// A handler's output paired with the originating task id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult<R> {
    task_id: TaskId,
    value: R,
}

impl<R> TaskResult<R> {
    pub fn new(task_id: TaskId, value: R) -> Self {
        Self { task_id, value }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn value(&self) -> &R {
        &self.value
    }

    pub fn into_value(self) -> R {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(R) -> U) -> TaskResult<U> {
        TaskResult {
            task_id: self.task_id,
            value: f(self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn map_keeps_the_task_id() {
        let id = TaskId::from_ulid(Ulid::new());
        let result = TaskResult::new(id, 21).map(|v| v * 2);

        assert_eq!(result.task_id(), id);
        assert_eq!(result.into_value(), 42);
    }
}
