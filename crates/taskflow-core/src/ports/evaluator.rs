//! Evaluator port - 式評価の抽象化
//!
//! `${token}` の中身（式）を値に変換する外部コラボレータです。
//! パターンの走査と再帰的な置換は `pipeline::expression::ExpressionResolver` が担当し、
//! Evaluator は 1 つの式を評価することだけに責任を持ちます。

use std::collections::BTreeMap;

use crate::domain::EvaluationError;

/// Named values visible to an expression.
pub type Bindings = BTreeMap<String, String>;

/// Evaluates a single token expression.
///
/// 解決できない式は `EvaluationError::Unresolved` を返すこと。
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, expression: &str, bindings: &Bindings) -> Result<String, EvaluationError>;
}

impl<F> Evaluator for F
where
    F: Fn(&str, &Bindings) -> Result<String, EvaluationError> + Send + Sync,
{
    fn evaluate(&self, expression: &str, bindings: &Bindings) -> Result<String, EvaluationError> {
        self(expression, bindings)
    }
}
