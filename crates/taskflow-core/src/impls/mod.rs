//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **VariableEvaluator**: 束縛・固定変数・`now` を引く `Evaluator`

pub mod variables;

pub use self::variables::VariableEvaluator;
