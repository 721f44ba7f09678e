// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::catalogue::{self, CUSTOM_PREFIX};
use super::function::ConditionFunction;
use super::provider::{PropertyProvider, StaticProvider};
use super::value::Value;
use crate::eval::context::EvaluationContext;
use crate::eval::error::{EvalError, ValidationError};

type ProviderMap = HashMap<String, Arc<dyn PropertyProvider>>;
type FunctionMap = HashMap<String, Arc<dyn ConditionFunction>>;

/// Name-keyed table of property providers and condition functions.
///
/// Cloning shares the underlying tables, so the host can keep a handle and
/// register providers after the engine is built. Locks are never held across
/// a provider call.
#[derive(Clone)]
pub struct PropertyRegistry {
    providers: Arc<RwLock<ProviderMap>>,
    functions: Arc<RwLock<FunctionMap>>,
}

impl PropertyRegistry {
    pub fn new() -> Self {
        Self {
            providers: Arc::new(RwLock::new(HashMap::new())),
            functions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a provider under a built-in, well-known or `custom_` name
    pub fn register_provider(
        &self,
        name: &str,
        provider: Arc<dyn PropertyProvider>,
    ) -> Result<(), ValidationError> {
        if !catalogue::is_valid_property_name(name) {
            return Err(ValidationError::InvalidPropertyName(name.to_string()));
        }

        match catalogue::reserved_spec(name) {
            Some(spec) if spec.kind != provider.kind() => {
                return Err(ValidationError::PropertyKindMismatch {
                    name: name.to_string(),
                    expected: spec.kind,
                    actual: provider.kind(),
                });
            }
            Some(_) => {}
            None if !name.starts_with(CUSTOM_PREFIX) => {
                return Err(ValidationError::UnrecognisedProperty(name.to_string()));
            }
            None => {}
        }

        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if providers.contains_key(name) {
            log::warn!("Re-registering property provider for '{}'", name);
        }
        providers.insert(name.to_string(), provider);
        Ok(())
    }

    /// Register a fixed value under a reserved or `custom_` name
    pub fn register_static(&self, name: &str, value: Value) -> Result<(), ValidationError> {
        let provider = StaticProvider::new(value)
            .ok_or_else(|| ValidationError::AbsentValue(name.to_string()))?;
        self.register_provider(name, Arc::new(provider))
    }

    /// Register a value supplied by the host app.
    ///
    /// Built-in names are refused. Well-known names keep their name and must
    /// match the catalogue kind; any other name is stored as `custom_<key>`.
    pub fn register_client_property(&self, key: &str, value: Value) -> Result<(), ValidationError> {
        if catalogue::BUILT_IN.contains_key(key) {
            return Err(ValidationError::ReservedProperty(key.to_string()));
        }

        let name = if catalogue::WELL_KNOWN.contains_key(key) {
            key.to_string()
        } else {
            format!("{}{}", CUSTOM_PREFIX, key)
        };
        self.register_static(&name, value)
    }

    pub fn register_function(&self, name: &str, function: Arc<dyn ConditionFunction>) {
        let mut functions = self
            .functions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if functions.contains_key(name) {
            log::warn!("Re-registering condition function '{}'", name);
        }
        functions.insert(name.to_string(), function);
    }

    /// Look up a provider; custom properties resolve with or without the prefix
    pub fn provider(&self, name: &str) -> Option<Arc<dyn PropertyProvider>> {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        providers
            .get(name)
            .or_else(|| providers.get(&format!("{}{}", CUSTOM_PREFIX, name)))
            .cloned()
    }

    pub fn function(&self, name: &str) -> Option<Arc<dyn ConditionFunction>> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered property names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Check every required built-in property has a provider
    pub fn validate(&self) -> Result<(), ValidationError> {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut missing: Vec<&str> = catalogue::BUILT_IN
            .iter()
            .filter(|(name, spec)| spec.required && !providers.contains_key(**name))
            .map(|(name, _)| *name)
            .collect();
        missing.sort();

        match missing.first() {
            Some(name) => Err(ValidationError::MissingRequiredProperty(name.to_string())),
            None => Ok(()),
        }
    }

    /// Resolve a property within an evaluation context.
    ///
    /// Values are cached in the context so each property is resolved at most
    /// once per check. The deadline itself is enforced by the evaluator.
    pub async fn resolve(&self, name: &str, ctx: &EvaluationContext) -> Result<Value, EvalError> {
        if let Some(value) = ctx.cached(name) {
            return Ok(value);
        }

        let provider = self
            .provider(name)
            .ok_or_else(|| EvalError::resolution(name, "no provider registered"))?;

        let value = provider
            .value(ctx.token())
            .await
            .map_err(|e| EvalError::resolution(name, e.to_string()))?;

        match value.kind() {
            None => Err(EvalError::resolution(name, "provider returned no value")),
            Some(kind) if kind != provider.kind() => Err(EvalError::resolution(
                name,
                format!("provider returned {} but declares {}", kind, provider.kind()),
            )),
            Some(_) => {
                log::debug!("[{}] resolved {} = {}", ctx.id(), name, value);
                ctx.store(name, value.clone());
                Ok(value)
            }
        }
    }
}

impl Default for PropertyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::context::DeadlineToken;
    use crate::eval::error::ProviderError;
    use crate::eval::property::PropertyKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// A provider counting how often it is asked
    struct CountingProvider {
        calls: AtomicUsize,
        value: Value,
    }

    impl CountingProvider {
        fn new(value: Value) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                value,
            }
        }
    }

    #[async_trait]
    impl PropertyProvider for CountingProvider {
        fn kind(&self) -> PropertyKind {
            self.value.kind().unwrap_or(PropertyKind::String)
        }

        async fn value(&self, _token: &DeadlineToken) -> Result<Value, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.clone())
        }
    }

    fn ctx() -> EvaluationContext {
        EvaluationContext::new(Duration::from_secs(1))
    }

    #[test]
    fn test_register_and_get_provider() {
        let registry = PropertyRegistry::new();
        registry
            .register_static("interface_orientation", Value::from("portrait"))
            .unwrap();

        assert!(registry.provider("interface_orientation").is_some());
        assert!(registry.provider("battery_level").is_none());
    }

    #[test]
    fn test_register_rejects_wrong_kind_for_built_in() {
        let registry = PropertyRegistry::new();
        let err = registry
            .register_static("battery_level", Value::from("full"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::PropertyKindMismatch { .. }));
    }

    #[test]
    fn test_register_rejects_unprefixed_unknown_name() {
        let registry = PropertyRegistry::new();
        let err = registry
            .register_static("plan_tier", Value::from("gold"))
            .unwrap_err();
        assert_eq!(err, ValidationError::UnrecognisedProperty("plan_tier".into()));

        registry
            .register_static("custom_plan_tier", Value::from("gold"))
            .unwrap();
    }

    #[test]
    fn test_register_rejects_invalid_name() {
        let registry = PropertyRegistry::new();
        assert!(matches!(
            registry.register_static("custom_bad-name", Value::Bool(true)),
            Err(ValidationError::InvalidPropertyName(_))
        ));
    }

    #[test]
    fn test_register_overwrites_existing() {
        let registry = PropertyRegistry::new();
        registry.register_static("platform", Value::from("ios")).unwrap();
        registry
            .register_static("platform", Value::from("android"))
            .unwrap();
        assert_eq!(registry.names(), vec!["platform".to_string()]);
    }

    #[test]
    fn test_client_property_prefixing() {
        let registry = PropertyRegistry::new();
        registry
            .register_client_property("plan_tier", Value::from("gold"))
            .unwrap();
        registry
            .register_client_property("user_signed_in", Value::Bool(true))
            .unwrap();

        assert_eq!(
            registry.names(),
            vec!["custom_plan_tier".to_string(), "user_signed_in".to_string()]
        );
        // Custom properties are reachable without the prefix
        assert!(registry.provider("plan_tier").is_some());
    }

    #[test]
    fn test_client_property_cannot_shadow_built_in() {
        let registry = PropertyRegistry::new();
        assert_eq!(
            registry.register_client_property("platform", Value::from("ios")),
            Err(ValidationError::ReservedProperty("platform".into()))
        );
        assert!(matches!(
            registry.register_client_property("user_signed_in", Value::from("yes")),
            Err(ValidationError::PropertyKindMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_requires_built_ins() {
        let registry = PropertyRegistry::new();
        assert_eq!(
            registry.validate(),
            Err(ValidationError::MissingRequiredProperty("app_version".into()))
        );

        registry.register_static("app_version", Value::from("1.0")).unwrap();
        registry.register_static("os_version", Value::from("17.2")).unwrap();
        registry.register_static("platform", Value::from("ios")).unwrap();
        assert!(registry.validate().is_ok());
    }

    #[tokio::test]
    async fn test_resolve_caches_per_context() {
        let registry = PropertyRegistry::new();
        let provider = Arc::new(CountingProvider::new(Value::Number(0.8)));
        registry
            .register_provider("battery_level", provider.clone())
            .unwrap();

        let first = ctx();
        registry.resolve("battery_level", &first).await.unwrap();
        registry.resolve("battery_level", &first).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        // A fresh context never sees the previous check's values
        let second = ctx();
        registry.resolve("battery_level", &second).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resolve_unknown_property() {
        let registry = PropertyRegistry::new();
        let err = registry.resolve("battery_level", &ctx()).await.unwrap_err();
        assert!(matches!(err, EvalError::PropertyResolution { .. }));
    }

    #[tokio::test]
    async fn test_resolve_absent_fails() {
        struct AbsentProvider;

        #[async_trait]
        impl PropertyProvider for AbsentProvider {
            fn kind(&self) -> PropertyKind {
                PropertyKind::String
            }

            async fn value(&self, _token: &DeadlineToken) -> Result<Value, ProviderError> {
                Ok(Value::Absent)
            }
        }

        let registry = PropertyRegistry::new();
        registry
            .register_provider("network_connection_type", Arc::new(AbsentProvider))
            .unwrap();
        let err = registry
            .resolve("network_connection_type", &ctx())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EvalError::resolution("network_connection_type", "provider returned no value")
        );
    }

    #[test]
    fn test_registry_is_clone() {
        let registry = PropertyRegistry::new();
        let cloned = registry.clone();
        cloned.register_static("platform", Value::from("ios")).unwrap();
        assert!(registry.provider("platform").is_some());
    }
}
