use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::value::{PropertyKind, Value};
use crate::eval::context::DeadlineToken;
use crate::eval::error::ProviderError;

/// Trait for collaborators that resolve one property's current value.
///
/// # Contract
/// - `kind()` is fixed for the lifetime of the provider
/// - `value()` may perform I/O; it receives the evaluation's deadline token and
///   should give up once the token expires or is cancelled. The evaluator
///   abandons the future at the deadline regardless.
/// - Returning [`Value::Absent`] signals "could not resolve" and fails the
///   evaluation.
#[async_trait]
pub trait PropertyProvider: Send + Sync {
    /// Returns the declared kind of the property
    fn kind(&self) -> PropertyKind;

    /// Resolve the current value
    async fn value(&self, token: &DeadlineToken) -> Result<Value, ProviderError>;
}

/// A provider returning a fixed value
pub struct StaticProvider {
    value: Value,
    kind: PropertyKind,
}

impl StaticProvider {
    /// Returns `None` for [`Value::Absent`], which has no kind
    pub fn new(value: Value) -> Option<Self> {
        let kind = value.kind()?;
        Some(Self { value, kind })
    }
}

#[async_trait]
impl PropertyProvider for StaticProvider {
    fn kind(&self) -> PropertyKind {
        self.kind
    }

    async fn value(&self, _token: &DeadlineToken) -> Result<Value, ProviderError> {
        Ok(self.value.clone())
    }
}

/// A provider backed by a synchronous closure
pub struct FnProvider<F> {
    kind: PropertyKind,
    read: F,
}

impl<F> FnProvider<F>
where
    F: Fn() -> Result<Value, ProviderError> + Send + Sync,
{
    pub fn new(kind: PropertyKind, read: F) -> Self {
        Self { kind, read }
    }
}

#[async_trait]
impl<F> PropertyProvider for FnProvider<F>
where
    F: Fn() -> Result<Value, ProviderError> + Send + Sync,
{
    fn kind(&self) -> PropertyKind {
        self.kind
    }

    async fn value(&self, _token: &DeadlineToken) -> Result<Value, ProviderError> {
        (self.read)()
    }
}

/// Wraps an expensive provider and reuses its last value for `ttl`.
///
/// Failures and absent values are not cached.
pub struct CachedProvider<P> {
    inner: P,
    ttl: Duration,
    last: Mutex<Option<(Instant, Value)>>,
}

impl<P: PropertyProvider> CachedProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<P: PropertyProvider> PropertyProvider for CachedProvider<P> {
    fn kind(&self) -> PropertyKind {
        self.inner.kind()
    }

    async fn value(&self, token: &DeadlineToken) -> Result<Value, ProviderError> {
        // Holding the lock across the inner call collapses concurrent refreshes
        let mut last = self.last.lock().await;
        if let Some((at, value)) = last.as_ref() {
            if at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }

        let value = self.inner.value(token).await?;
        if value != Value::Absent {
            *last = Some((Instant::now(), value.clone()));
        }
        Ok(value)
    }
}
