//! Payload - Task が運ぶデータ
//!
//! handler の解決は payload の具体型（`TypeId`）で行います。
//! 共通の trait を実装していても、具体型が違えば別の handler に届きます。
//!
//! decorator が必要とする能力（テンプレート文字列など）は
//! `Payload` の capability メソッドで問い合わせます。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Data that can be wrapped in a `Task`.
///
/// # Trait Bounds
/// - `Clone`: handler はタスクが持つ payload の複製に対して実行される
/// - `Send + Sync + 'static`: worker スレッドへ渡すため
pub trait Payload: Clone + Send + Sync + 'static {
    /// Exposes templated text to the expression decorator.
    fn template_mut(&mut self) -> Option<&mut dyn Templated> {
        None
    }
}

/// Text that may contain `${token}` expressions, optionally with named parameters.
pub trait Templated {
    fn text(&self) -> &str;

    fn set_text(&mut self, text: String);

    fn parameters(&self) -> Option<&BTreeMap<String, String>> {
        None
    }
}

macro_rules! plain_payload {
    ($($ty:ty),* $(,)?) => {
        $(impl Payload for $ty {})*
    };
}

plain_payload!(
    String,
    &'static str,
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    Vec<u8>,
);

/// Templated text payload.
///
/// パラメータが空なら素のテキスト、あれば `${name}` の束縛として使われる。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    content: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    parameters: BTreeMap<String, String>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_parameters<I, K, V>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.merge_parameters(parameters);
        self
    }

    /// Later values overwrite earlier ones.
    pub fn merge_parameters<I, K, V>(&mut self, parameters: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.parameters
            .extend(parameters.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn into_content(self) -> String {
        self.content
    }

    pub fn is_parameterized(&self) -> bool {
        !self.parameters.is_empty()
    }
}

impl Templated for Document {
    fn text(&self) -> &str {
        &self.content
    }

    fn set_text(&mut self, text: String) {
        self.content = text;
    }

    fn parameters(&self) -> Option<&BTreeMap<String, String>> {
        self.is_parameterized().then_some(&self.parameters)
    }
}

impl Payload for Document {
    fn template_mut(&mut self) -> Option<&mut dyn Templated> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_payloads_are_not_templated() {
        let mut text = String::from("${name}");
        assert!(text.template_mut().is_none());
    }

    #[test]
    fn document_exposes_parameters_only_when_present() {
        let plain = Document::new("hello");
        assert!(plain.parameters().is_none());

        let parameterized = Document::new("hello ${name}").with_parameter("name", "world");
        assert_eq!(
            parameterized.parameters().and_then(|p| p.get("name")).map(String::as_str),
            Some("world")
        );
    }

    #[test]
    fn merge_overwrites_existing_parameters() {
        let mut doc = Document::new("x").with_parameters([("a", "1"), ("b", "2")]);
        doc.merge_parameters([("b", "3")]);

        let params = doc.parameters().unwrap();
        assert_eq!(params.get("a").map(String::as_str), Some("1"));
        assert_eq!(params.get("b").map(String::as_str), Some("3"));
    }

    #[test]
    fn document_template_rewrites_content() {
        let mut doc = Document::new("before");
        doc.template_mut().unwrap().set_text("after".to_string());
        assert_eq!(doc.content(), "after");
    }
}
