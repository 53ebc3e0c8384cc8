//! Config - dispatcher の設定
//!
//! 読み込み元は 2 つ:
//! - 環境変数（`TASKFLOW_MAX_WORKERS` など）。未設定の項目はデフォルト値
//! - JSON 文字列。欠けているフィールドはデフォルト値

use std::num::NonZeroUsize;
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_MAX_WORKERS: &str = "TASKFLOW_MAX_WORKERS";
pub const ENV_DISCRIMINATED: &str = "TASKFLOW_DISCRIMINATED";
pub const ENV_OBSERVERS_ENABLED: &str = "TASKFLOW_OBSERVERS_ENABLED";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: '{1}'")]
    InvalidValue(String, String),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Upper bound on concurrently running handlers.
    pub max_workers: usize,
    /// Run each task under a diagnostic context carrying its id.
    pub discriminated: bool,
    /// Attach the dispatcher's observers to dispatched tasks.
    pub observers_enabled: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(4),
            discriminated: false,
            observers_enabled: true,
        }
    }
}

impl DispatcherConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_MAX_WORKERS) {
            config.max_workers = value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidValue(ENV_MAX_WORKERS.to_string(), value))?;
        }
        if let Some(value) = lookup(ENV_DISCRIMINATED) {
            config.discriminated = parse_bool(ENV_DISCRIMINATED, value)?;
        }
        if let Some(value) = lookup(ENV_OBSERVERS_ENABLED) {
            config.observers_enabled = parse_bool(ENV_OBSERVERS_ENABLED, value)?;
        }
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        if config.max_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "max_workers".to_string(),
                "0".to_string(),
            ));
        }
        Ok(config)
    }
}

fn parse_bool(name: &str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue(name.to_string(), value)),
    }
}
