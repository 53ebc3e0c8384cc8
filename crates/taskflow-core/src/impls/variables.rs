//! VariableEvaluator - 名前で値を引くだけの Evaluator
//!
//! # 解決順
//! 1. 呼び出し時の束縛（payload のパラメータ）
//! 2. 固定の変数
//! 3. 組み込み: `now`（RFC 3339）, `now:<strftime 書式>`
//!
//! どれにも当たらなければ `EvaluationError::Unresolved`。

use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};

use crate::domain::EvaluationError;
use crate::ports::{Bindings, Clock, Evaluator, SystemClock};

const NOW: &str = "now";

pub struct VariableEvaluator {
    variables: Bindings,
    clock: Arc<dyn Clock>,
}

impl VariableEvaluator {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            variables: Bindings::new(),
            clock,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_variables<I, K, V>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.variables
            .extend(variables.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    fn builtin(&self, expression: &str) -> Option<Result<String, EvaluationError>> {
        if expression == NOW {
            return Some(Ok(self.clock.now().to_rfc3339()));
        }
        let format = expression.strip_prefix(NOW)?.strip_prefix(':')?;
        Some(self.format_now(expression, format))
    }

    fn format_now(&self, expression: &str, format: &str) -> Result<String, EvaluationError> {
        let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(EvaluationError::Invalid {
                expression: expression.to_string(),
                reason: format!("unsupported date format '{format}'"),
            });
        }
        Ok(self.clock.now().format_with_items(items.iter()).to_string())
    }
}

impl Default for VariableEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator for VariableEvaluator {
    fn evaluate(&self, expression: &str, bindings: &Bindings) -> Result<String, EvaluationError> {
        let name = expression.trim();
        if let Some(value) = bindings.get(name).or_else(|| self.variables.get(name)) {
            return Ok(value.clone());
        }
        self.builtin(name)
            .unwrap_or_else(|| Err(EvaluationError::Unresolved(name.to_string())))
    }
}
