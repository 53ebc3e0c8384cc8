//! Expression - `${token}` を含むテキストを handler 実行前に解決する
//!
//! # 解決順
//! 1. payload のパラメータ値を解決する（束縛は未解決のパラメータ自身）
//! 2. 解決済みパラメータを束縛としてテキストを解決する
//!
//! トークンの値にさらにトークンが含まれていれば、その値を再帰的に展開する。
//! 展開中のトークンの連鎖を保持し、次のどれかで打ち切る:
//! - 連鎖に同じトークンが再び現れた（自己参照）: `RecursionLimit`
//! - 連鎖が `max_depth` に達した: `RecursionLimit`
//! - 結果が `max_length` バイトを超えた: `TooLong`

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::chain::HandlerHook;
use crate::domain::{BoxError, EvaluationError, Payload};
use crate::ports::{Bindings, Evaluator};

/// `${...}` with no nested braces; group 1 is the expression.
pub const DEFAULT_PATTERN: &str = r"\$\{([^{}]*)\}";

pub const DEFAULT_MAX_DEPTH: usize = 16;

/// 1 MiB
pub const DEFAULT_MAX_LENGTH: usize = 1 << 20;

/// Scans text for token expressions and substitutes their evaluated values.
pub struct ExpressionResolver {
    evaluator: Arc<dyn Evaluator>,
    pattern: Regex,
    max_depth: usize,
    max_length: usize,
}

impl ExpressionResolver {
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            evaluator,
            pattern: DEFAULT_REGEX.clone(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_length: DEFAULT_MAX_LENGTH,
        }
    }

    /// Use a custom token pattern. Capture group 1 must hold the expression.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, EvaluationError> {
        let invalid = |reason: String| EvaluationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        };
        let regex = Regex::new(pattern).map_err(|e| invalid(e.to_string()))?;
        if regex.captures_len() < 2 {
            return Err(invalid("pattern needs a capture group".to_string()));
        }
        self.pattern = regex;
        Ok(self)
    }

    /// How many tokens may be expanded inside one another.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Upper bound, in bytes, on any resolved text.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Resolve `text` with no bindings.
    pub fn resolve(&self, text: &str) -> Result<String, EvaluationError> {
        self.resolve_with(text, &Bindings::new())
    }

    pub fn resolve_with(&self, text: &str, bindings: &Bindings) -> Result<String, EvaluationError> {
        self.expand(text, bindings, &mut Vec::new())
    }

    /// Resolve every parameter value, using the raw parameters as bindings.
    pub fn resolve_parameters(&self, parameters: &Bindings) -> Result<Bindings, EvaluationError> {
        parameters
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.resolve_with(value, parameters)?)))
            .collect()
    }

    /// `chain` holds the tokens currently being expanded, outermost first.
    fn expand(
        &self,
        text: &str,
        bindings: &Bindings,
        chain: &mut Vec<String>,
    ) -> Result<String, EvaluationError> {
        let mut resolved = String::with_capacity(text.len());
        let mut copied = 0;
        for caps in self.pattern.captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let expression = caps.get(1).map_or("", |m| m.as_str());
            resolved.push_str(&text[copied..whole.start()]);
            copied = whole.end();

            let value = self.evaluator.evaluate(expression, bindings)?;
            if self.pattern.is_match(&value) {
                if chain.len() + 1 >= self.max_depth || chain.iter().any(|t| t == expression) {
                    return Err(EvaluationError::RecursionLimit {
                        limit: self.max_depth,
                        text: value,
                    });
                }
                chain.push(expression.to_string());
                let nested = self.expand(&value, bindings, chain);
                chain.pop();
                resolved.push_str(&nested?);
            } else {
                resolved.push_str(&value);
            }
            self.check_length(&resolved)?;
        }
        resolved.push_str(&text[copied..]);
        self.check_length(&resolved)?;
        Ok(resolved)
    }

    fn check_length(&self, text: &str) -> Result<(), EvaluationError> {
        if text.len() > self.max_length {
            return Err(EvaluationError::TooLong {
                limit: self.max_length,
            });
        }
        Ok(())
    }
}

static DEFAULT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_PATTERN).expect("default token pattern compiles"));

/// Rewrites templated payloads in place before the handler runs.
///
/// テンプレートを持たない payload（`Payload::template_mut` が `None`）は素通しする。
#[derive(Clone)]
pub struct ExpressionHook {
    resolver: Arc<ExpressionResolver>,
}

impl ExpressionHook {
    pub fn new(resolver: Arc<ExpressionResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl<T: Payload> HandlerHook<T> for ExpressionHook {
    async fn before_handle(&self, payload: &mut T) -> Result<(), BoxError> {
        let Some(template) = payload.template_mut() else {
            return Ok(());
        };

        let bindings = match template.parameters() {
            Some(parameters) => self.resolver.resolve_parameters(parameters)?,
            None => Bindings::new(),
        };
        let resolved = self.resolver.resolve_with(template.text(), &bindings)?;
        debug!(bindings = bindings.len(), "expressions resolved");
        template.set_text(resolved);
        Ok(())
    }
}
