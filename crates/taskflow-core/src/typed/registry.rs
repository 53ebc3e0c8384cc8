//! HandlerRegistry - payload 型から Handler を引く固定の対応表
//!
//! # 設計
//! - 初期化時に `RegistryBuilder` で組み立てる（mutable）
//! - 実行時は読み取り専用（immutable）。ロックなしで複数スレッドから引ける
//! - キーは payload の `TypeId`。完全一致のみで、上位型へのフォールバックはしない
//! - 値は `Arc<dyn TaskHandler<T, R>>` を `dyn Any` に型消去して保持し、引くときに downcast する

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use super::handler::TaskHandler;
use crate::domain::{DispatchError, Payload};

/// RegistryError は HandlerRegistry の構築エラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for payload type '{0}' is already registered")]
    AlreadyRegistered(&'static str),

    #[error("missing handlers for payload types: {0:?}")]
    MissingPayloadTypes(Vec<&'static str>),
}

struct Registration {
    payload_type: &'static str,
    result_type: &'static str,
    handler: Arc<dyn Any + Send + Sync>,
}

/// Immutable payload-type → handler table.
pub struct HandlerRegistry {
    handlers: HashMap<TypeId, Registration>,
}

impl HandlerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Handler registered for exactly `T`, producing `R`.
    pub fn lookup<T: Payload, R: Send + 'static>(
        &self,
    ) -> Result<Arc<dyn TaskHandler<T, R>>, DispatchError> {
        let registration = self.handlers.get(&TypeId::of::<T>()).ok_or(
            DispatchError::NoSuitableHandlerFound {
                payload_type: type_name::<T>(),
            },
        )?;

        registration
            .handler
            .downcast_ref::<Arc<dyn TaskHandler<T, R>>>()
            .cloned()
            .ok_or(DispatchError::ResultTypeMismatch {
                payload_type: registration.payload_type,
                result_type: type_name::<R>(),
            })
    }

    pub fn contains<T: Payload>(&self) -> bool {
        self.handlers.contains_key(&TypeId::of::<T>())
    }

    /// Result type name of the handler registered for `T`.
    pub fn result_type_of<T: Payload>(&self) -> Option<&'static str> {
        self.handlers
            .get(&TypeId::of::<T>())
            .map(|registration| registration.result_type)
    }

    /// Registered payload type names, sorted.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self
            .handlers
            .values()
            .map(|registration| registration.payload_type)
            .collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// RegistryBuilder は Handler を登録して HandlerRegistry を作る
///
/// # 使用例
/// ```ignore
/// let registry = HandlerRegistry::builder()
///     .register::<String, String, _>(handler_fn(|s: &mut String| Ok(s.to_uppercase())))?
///     .expect::<Document>()
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - `expect::<T>()` で handler が必要な payload 型を宣言
/// - `build()` 時に「期待集合 ⊆ 登録済み集合」をチェック
#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<TypeId, Registration>,
    expected: Vec<(TypeId, &'static str)>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, R, H>(self, handler: H) -> Result<Self, RegistryError>
    where
        T: Payload,
        R: Send + 'static,
        H: TaskHandler<T, R> + 'static,
    {
        self.register_shared::<T, R>(Arc::new(handler))
    }

    pub fn register_shared<T, R>(
        mut self,
        handler: Arc<dyn TaskHandler<T, R>>,
    ) -> Result<Self, RegistryError>
    where
        T: Payload,
        R: Send + 'static,
    {
        let key = TypeId::of::<T>();
        if self.handlers.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(type_name::<T>()));
        }
        self.handlers.insert(
            key,
            Registration {
                payload_type: type_name::<T>(),
                result_type: type_name::<R>(),
                handler: Arc::new(handler),
            },
        );
        Ok(self)
    }

    /// Require a handler for `T` at build time.
    pub fn expect<T: Payload>(mut self) -> Self {
        self.expected.push((TypeId::of::<T>(), type_name::<T>()));
        self
    }

    pub fn build(self) -> Result<HandlerRegistry, RegistryError> {
        let missing: Vec<&'static str> = self
            .expected
            .iter()
            .filter(|(key, _)| !self.handlers.contains_key(key))
            .map(|(_, name)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(RegistryError::MissingPayloadTypes(missing));
        }
        Ok(HandlerRegistry {
            handlers: self.handlers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BoxError, Document, Task};
    use crate::typed::handler::handler_fn;

    fn upper() -> impl TaskHandler<String, String> {
        handler_fn(|s: &mut String| Ok(s.to_uppercase()))
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = HandlerRegistry::builder()
            .register::<String, String, _>(upper())
            .unwrap()
            .build()
            .unwrap();

        let handler = registry.lookup::<String, String>().unwrap();
        let result = handler.apply(&Task::wrap(String::from("hello"))).await.unwrap();
        assert_eq!(result.into_value(), "HELLO");
    }

    #[test]
    fn test_double_registration() {
        let result = HandlerRegistry::builder()
            .register::<String, String, _>(upper())
            .unwrap()
            .register::<String, String, _>(upper());
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }

    #[test]
    fn test_missing_payload_type() {
        let registry = HandlerRegistry::builder().build().unwrap();
        let err = registry.lookup::<i32, String>().err().unwrap();
        assert!(matches!(
            err,
            DispatchError::NoSuitableHandlerFound { payload_type: "i32" }
        ));
    }

    #[test]
    fn test_result_type_mismatch() {
        let registry = HandlerRegistry::builder()
            .register::<String, String, _>(upper())
            .unwrap()
            .build()
            .unwrap();
        let err = registry.lookup::<String, usize>().err().unwrap();
        assert!(matches!(
            err,
            DispatchError::ResultTypeMismatch { result_type: "usize", .. }
        ));
    }

    #[test]
    fn test_exact_type_only() {
        // Document と String はどちらもテキストを持つが、別の型として扱われる
        let registry = HandlerRegistry::builder()
            .register::<String, String, _>(upper())
            .unwrap()
            .build()
            .unwrap();
        assert!(registry.contains::<String>());
        assert!(!registry.contains::<Document>());
        assert!(!registry.contains::<&'static str>());
    }

    #[test]
    fn test_registered_types() {
        let registry = HandlerRegistry::builder()
            .register::<String, String, _>(upper())
            .unwrap()
            .register::<u64, u64, _>(handler_fn(|n: &mut u64| -> Result<u64, BoxError> {
                Ok(*n + 1)
            }))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.registered_types(), vec![type_name::<String>(), "u64"]);
        assert_eq!(registry.result_type_of::<u64>(), Some("u64"));
    }

    #[test]
    fn test_build_missing_expected_types() {
        let result = HandlerRegistry::builder()
            .register::<String, String, _>(upper())
            .unwrap()
            .expect::<String>()
            .expect::<Document>()
            .build();
        assert!(matches!(
            result,
            Err(RegistryError::MissingPayloadTypes(missing))
                if missing == vec![type_name::<Document>()]
        ));
    }
}
