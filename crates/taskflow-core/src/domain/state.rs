//! State - タスクの実行ステータス
//!
//! # 状態遷移
//! - NOT_STARTED → IN_QUEUE | IN_PROGRESS | STOPPED
//! - IN_QUEUE → IN_PROGRESS | STOPPED
//! - IN_PROGRESS → SUCCESSFUL | FAILED | STOPPED
//! - FAILED / STOPPED / SUCCESSFUL は終端（そこから先の遷移はない）
//!
//! STOPPED は外部からのキャンセルでのみ到達します。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Execution status of a task.
///
/// Serialized as SCREAMING_SNAKE_CASE (`NOT_STARTED`, `IN_PROGRESS`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    NotStarted,
    InQueue,
    InProgress,
    Stopped,
    Failed,
    Successful,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusParseError {
    #[error("no status found with code {0}")]
    UnknownCode(i32),

    #[error("no status found with id '{0}'")]
    UnknownLabel(String),
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::NotStarted,
        Status::InQueue,
        Status::InProgress,
        Status::Stopped,
        Status::Failed,
        Status::Successful,
    ];

    /// Human readable label, e.g. "In Progress".
    pub fn label(self) -> &'static str {
        match self {
            Status::NotStarted => "Not Started",
            Status::InQueue => "In Queue",
            Status::InProgress => "In Progress",
            Status::Stopped => "Stopped",
            Status::Failed => "Failed",
            Status::Successful => "Successful",
        }
    }

    /// Numeric code. Failure is negative, success is zero.
    pub fn code(self) -> i32 {
        match self {
            Status::NotStarted => 1,
            Status::InQueue => 2,
            Status::InProgress => 3,
            Status::Stopped => 4,
            Status::Failed => -1,
            Status::Successful => 0,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, StatusParseError> {
        Self::ALL
            .into_iter()
            .find(|status| status.code() == code)
            .ok_or(StatusParseError::UnknownCode(code))
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Failed | Status::Stopped | Status::Successful)
    }

    /// 前進方向の遷移だけを許可する
    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::*;
        matches!(
            (self, next),
            (NotStarted, InQueue | InProgress | Stopped)
                | (InQueue, InProgress | Stopped)
                | (InProgress, Successful | Failed | Stopped)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Label lookup is case-insensitive ("in progress", "IN PROGRESS").
impl FromStr for Status {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| StatusParseError::UnknownLabel(s.to_string()))
    }
}
