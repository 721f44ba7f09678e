// SPDX-License-Identifier: MIT

//! The engine: the host-facing context object
//!
//! One [`Engine`] is built at app startup and shared by cloning. It owns the
//! named condition table, the trigger snapshot, the throttle ledger and the
//! dispatcher, and exposes the host surface: API key and source setup, event
//! publishing, named condition checks and direct action performs.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::api_key::ApiKey;
use super::config::{ConfigDocument, ConfigFetcher, ConfigLoader, ConfigSource, TriggerDefinition};
use super::dispatch::{ActionDispatcher, ActionExecutor, DispatchReport};
use super::events::{
    Event, EventBus, EventCountFunction, EventCountWithLimitFunction, EventStore,
    MemoryEventStore, TriggerSink,
};
use super::named::NamedConditionTable;
use super::trigger::{
    Acquire, CompiledAction, MemoryThrottleStore, ThrottleLedger, ThrottleState, ThrottleStore,
    TriggerSnapshot, TriggerTable,
};
use crate::eval::condition::{evaluate, evaluate_condition, Condition};
use crate::eval::context::EvaluationContext;
use crate::eval::error::{ConfigError, EngineError, ValidationError};
use crate::eval::property::{PropertyRegistry, Value};

pub const DEFAULT_EVALUATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine tunables
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Deadline for every condition evaluation
    pub evaluation_timeout: Duration,
    /// When set, configuration documents for other apps are rejected
    pub app_id: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            evaluation_timeout: DEFAULT_EVALUATION_TIMEOUT,
            app_id: None,
        }
    }
}

/// Builder for [`Engine`]
#[derive(Default)]
pub struct EngineBuilder {
    options: EngineOptions,
    registry: Option<PropertyRegistry>,
    executor: Option<Arc<dyn ActionExecutor>>,
    throttle_store: Option<Arc<dyn ThrottleStore>>,
    event_store: Option<Arc<dyn EventStore>>,
    fetcher: Option<Arc<dyn ConfigFetcher>>,
    handle: Option<Handle>,
    reports: Option<mpsc::Sender<DispatchReport>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.options.evaluation_timeout = timeout;
        self
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.options.app_id = Some(app_id.into());
        self
    }

    /// Share an existing registry. Defaults to an empty one.
    pub fn registry(mut self, registry: PropertyRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Defaults to [`MemoryThrottleStore`]
    pub fn throttle_store(mut self, store: Arc<dyn ThrottleStore>) -> Self {
        self.throttle_store = Some(store);
        self
    }

    /// Defaults to [`MemoryEventStore`]
    pub fn event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    /// Transport for `https://` configuration sources
    pub fn fetcher(mut self, fetcher: Arc<dyn ConfigFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Runtime for spawned work. Defaults to the current runtime.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Receive a [`DispatchReport`] for every executor call
    pub fn reports(mut self, tx: mpsc::Sender<DispatchReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let executor = self.executor.ok_or(EngineError::MissingExecutor)?;
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| EngineError::NoRuntime(e.to_string()))?,
        };

        let registry = self.registry.unwrap_or_default();
        let event_store = self
            .event_store
            .unwrap_or_else(|| Arc::new(MemoryEventStore::new()));
        let throttle_store = self
            .throttle_store
            .unwrap_or_else(|| Arc::new(MemoryThrottleStore::new()));

        registry.register_function(
            EventCountFunction::NAME,
            Arc::new(EventCountFunction::new(event_store.clone())),
        );
        registry.register_function(
            EventCountWithLimitFunction::NAME,
            Arc::new(EventCountWithLimitFunction::new(event_store.clone())),
        );

        let inner = EngineInner {
            options: self.options,
            registry,
            named: NamedConditionTable::new(),
            triggers: TriggerTable::new(),
            ledger: ThrottleLedger::load(throttle_store),
            apply_lock: Mutex::new(()),
            bus: EventBus::new(event_store),
            dispatcher: ActionDispatcher::new(executor, handle.clone(), self.reports),
            fetcher: self.fetcher,
            api_key: RwLock::new(None),
            source: RwLock::new(None),
            started: AtomicBool::new(false),
            handle,
        };
        Ok(Engine {
            inner: Arc::new(inner),
        })
    }
}

struct EngineInner {
    options: EngineOptions,
    registry: PropertyRegistry,
    named: NamedConditionTable,
    triggers: TriggerTable,
    ledger: ThrottleLedger,
    // Serialises applies so overrides and triggers always come from one document
    apply_lock: Mutex<()>,
    bus: EventBus,
    dispatcher: ActionDispatcher,
    fetcher: Option<Arc<dyn ConfigFetcher>>,
    api_key: RwLock<Option<ApiKey>>,
    source: RwLock<Option<ConfigSource>>,
    started: AtomicBool,
    handle: Handle,
}

/// Condition evaluation and trigger dispatch engine.
///
/// Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn registry(&self) -> &PropertyRegistry {
        &self.inner.registry
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Register a host-supplied property value (see
    /// [`PropertyRegistry::register_client_property`])
    pub fn register_client_property(&self, key: &str, value: Value) -> Result<(), EngineError> {
        Ok(self.inner.registry.register_client_property(key, value)?)
    }

    /// Validate and store the API key. Only the format is checked here.
    pub fn set_api_key(&self, key: &str) -> Result<(), EngineError> {
        let key = ApiKey::parse(key)?;
        log::debug!("API key set: {:?}", key);
        *self
            .inner
            .api_key
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(key);
        Ok(())
    }

    /// Set the configuration location, `https://` or `file://`
    pub fn set_config_url(&self, url: &str) -> Result<(), EngineError> {
        let source = ConfigSource::parse(url)?;
        log::info!("Configuration source set to {}", source);
        *self
            .inner
            .source
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(source);
        Ok(())
    }

    /// Validate setup and load the first configuration.
    ///
    /// Fails if a required property has no provider, the API key or source is
    /// missing, or the configuration is rejected.
    pub async fn start(&self) -> Result<(), EngineError> {
        if self.is_started() {
            log::warn!("Engine already started");
            return Ok(());
        }

        self.inner.registry.validate()?;
        if self
            .inner
            .api_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
        {
            return Err(ValidationError::MissingApiKey.into());
        }

        self.reload_configuration().await?;
        self.inner.started.store(true, Ordering::Release);
        log::info!("Engine started");
        Ok(())
    }

    /// Re-read the configured source and apply it.
    ///
    /// Returns the names of rejected condition overrides. On error the
    /// previous configuration stays active.
    pub async fn reload_configuration(&self) -> Result<Vec<String>, EngineError> {
        let source = self
            .inner
            .source
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ConfigError::MissingSource)?;

        let doc = ConfigLoader::new()
            .load(&source, self.inner.fetcher.as_deref())
            .await
            .map_err(|e| {
                log::error!("Failed to load configuration from {}: {}", source, e);
                e
            })?;
        self.apply_configuration(doc)
    }

    /// Validate and install a parsed document.
    ///
    /// The trigger snapshot and the override map are only replaced once the
    /// whole document has been accepted.
    pub fn apply_configuration(&self, doc: ConfigDocument) -> Result<Vec<String>, EngineError> {
        let snapshot = doc
            .validate(self.inner.options.app_id.as_deref())
            .and_then(|()| TriggerSnapshot::build(&doc))
            .map_err(|e| {
                log::error!("Configuration rejected, keeping previous: {}", e);
                e
            })?;

        let count = snapshot.trigger_count();
        let rejected = {
            let _applying = self
                .inner
                .apply_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let rejected = self.inner.named.apply_remote_overrides(&doc.named_conditions);
            self.inner.triggers.swap(snapshot);
            rejected
        };
        log::info!(
            "Configuration applied: {} trigger(s), {} action(s)",
            count,
            doc.actions.len()
        );
        Ok(rejected)
    }

    fn ensure_started(&self) -> Result<(), EngineError> {
        if self.is_started() {
            Ok(())
        } else {
            Err(EngineError::NotStarted)
        }
    }

    /// Publish an event. Matching triggers run in the background.
    pub fn send_event(&self, name: &str) -> Result<(), EngineError> {
        self.send_event_with_metadata(name, HashMap::new())
    }

    pub fn send_event_with_metadata(
        &self,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), EngineError> {
        self.ensure_started()?;
        let event = Event::new(name).with_metadata(metadata);
        self.inner.bus.publish(event, self)?;
        Ok(())
    }

    /// Check a named condition, registering `default` under `name` first.
    ///
    /// A remote override for `name` takes precedence over `default`. When the
    /// condition holds, triggers watching it fire in the background.
    pub async fn check_named_condition(&self, name: &str, default: &str) -> Result<bool, EngineError> {
        self.ensure_started()?;
        self.inner.named.register(name, default)?;
        if self.inner.named.has_override(name) {
            log::debug!("Condition '{}' uses its remote override", name);
        }
        let condition = self.inner.named.resolve(name)?;

        let matched = self.evaluate_parsed(&condition).await?;
        if matched {
            let snapshot = self.inner.triggers.snapshot();
            self.fire_condition_triggers(&snapshot, name);
        }
        Ok(matched)
    }

    /// Callback form of [`check_named_condition`](Self::check_named_condition).
    ///
    /// The handler runs on a runtime worker and always receives `false` when
    /// there is an error.
    pub fn check_named_condition_with_handler<F>(
        &self,
        name: &str,
        default: &str,
        handler: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(bool, Option<EngineError>) + Send + 'static,
    {
        let engine = self.clone();
        let name = name.to_string();
        let default = default.to_string();
        self.inner.handle.spawn(async move {
            match engine.check_named_condition(&name, &default).await {
                Ok(matched) => handler(matched, None),
                Err(e) => {
                    log::warn!("Check of condition '{}' failed: {}", name, e);
                    handler(false, Some(e))
                }
            }
        })
    }

    /// Parse and evaluate an ad-hoc expression with the engine's deadline
    pub async fn evaluate(&self, source: &str) -> Result<bool, EngineError> {
        let condition = Condition::parse(source)?;
        self.evaluate_parsed(&condition).await
    }

    async fn evaluate_parsed(&self, condition: &Condition) -> Result<bool, EngineError> {
        let ctx = EvaluationContext::new(self.inner.options.evaluation_timeout);
        Ok(evaluate_condition(condition, &self.inner.registry, &ctx).await?)
    }

    /// Evaluate every condition watched by a trigger and fire the triggers
    /// of those that hold. Returns the names of the conditions that held.
    ///
    /// Failing conditions are logged and count as not matched.
    pub async fn evaluate_condition_triggers(&self) -> Result<Vec<String>, EngineError> {
        self.ensure_started()?;
        let snapshot = self.inner.triggers.snapshot();
        let names = snapshot.watched_conditions();

        let checks = names.iter().map(|name| async move {
            let result = match self.inner.named.resolve(name) {
                Ok(condition) => self.evaluate_parsed(&condition).await,
                Err(e) => Err(e),
            };
            (name, result)
        });

        let mut held = Vec::new();
        for (name, result) in join_all(checks).await {
            match result {
                Ok(true) => {
                    self.fire_condition_triggers(&snapshot, name);
                    held.push(name.clone());
                }
                Ok(false) => {}
                Err(e) => log::error!("Condition '{}' failed during sweep: {}", name, e),
            }
        }
        Ok(held)
    }

    /// Perform an action directly, bypassing triggers and throttles.
    ///
    /// Returns `Ok(false)` when the action's gating condition is false.
    pub async fn perform_named_action(&self, name: &str) -> Result<bool, EngineError> {
        self.ensure_started()?;
        let snapshot = self.inner.triggers.snapshot();
        let action = ActionDispatcher::lookup(&snapshot, name)?;

        if let Some(gate) = &action.gate {
            if !self.evaluate_parsed(gate).await? {
                log::info!("Action '{}' not performed: condition '{}' is false", name, gate);
                return Ok(false);
            }
        }
        self.inner.dispatcher.execute_now(&action).await?;
        Ok(true)
    }

    /// Clear a trigger's throttle history, starting a new epoch
    pub fn reset_throttle(&self, trigger_id: &str) {
        self.inner.ledger.reset(trigger_id);
    }

    pub fn reset_all_throttles(&self) {
        self.inner.ledger.reset_all();
    }

    pub fn throttle_state(&self, trigger_id: &str) -> Option<ThrottleState> {
        self.inner.ledger.state(trigger_id)
    }

    fn fire_condition_triggers(&self, snapshot: &Arc<TriggerSnapshot>, name: &str) {
        for trigger in snapshot.triggers_for_condition(name) {
            self.spawn_trigger(snapshot.clone(), trigger.clone());
        }
    }

    fn spawn_trigger(&self, snapshot: Arc<TriggerSnapshot>, trigger: Arc<TriggerDefinition>) {
        let engine = self.clone();
        self.inner.handle.spawn(async move {
            engine.run_trigger(&snapshot, &trigger).await;
        });
    }

    // Gate first, then throttle, so a false gate leaves the epoch unconsumed
    async fn run_trigger(&self, snapshot: &TriggerSnapshot, trigger: &TriggerDefinition) {
        let action = match ActionDispatcher::lookup(snapshot, &trigger.action) {
            Ok(action) => action,
            Err(e) => {
                log::error!("Trigger '{}': {}", trigger.id, e);
                return;
            }
        };

        if !self.gate_passes(&action, &trigger.id).await {
            return;
        }

        let Some(acquired) = self.acquire(trigger).await else {
            return;
        };
        match acquired {
            Acquire::Granted { epoch } => {
                let dispatched =
                    self.inner
                        .dispatcher
                        .dispatch(snapshot, &trigger.action, &trigger.id, epoch);
                if let Err(e) = dispatched {
                    log::error!("Trigger '{}': {}", trigger.id, e);
                }
            }
            Acquire::Throttled => {
                log::debug!("Trigger '{}' throttled ({:?})", trigger.id, trigger.throttle);
            }
        }
    }

    // Persistent grants write the throttle store, so they run off the async workers
    async fn acquire(&self, trigger: &TriggerDefinition) -> Option<Acquire> {
        if !trigger.throttle.is_persistent() {
            return Some(
                self.inner
                    .ledger
                    .try_acquire(&trigger.id, trigger.throttle, Utc::now()),
            );
        }

        let engine = self.clone();
        let trigger_id = trigger.id.clone();
        let policy = trigger.throttle;
        let acquired = self
            .inner
            .handle
            .spawn_blocking(move || {
                engine
                    .inner
                    .ledger
                    .try_acquire(&trigger_id, policy, Utc::now())
            })
            .await;
        match acquired {
            Ok(acquired) => Some(acquired),
            Err(e) => {
                log::error!("Trigger '{}': throttle check failed: {}", trigger.id, e);
                None
            }
        }
    }

    async fn gate_passes(&self, action: &CompiledAction, trigger_id: &str) -> bool {
        let Some(gate) = &action.gate else {
            return true;
        };
        let ctx = EvaluationContext::new(self.inner.options.evaluation_timeout);
        match evaluate(gate.expression(), &self.inner.registry, &ctx).await {
            Ok(passed) => {
                if !passed {
                    log::debug!(
                        "Trigger '{}': action '{}' gated by '{}'",
                        trigger_id,
                        action.id,
                        gate
                    );
                }
                passed
            }
            Err(e) => {
                log::error!(
                    "Trigger '{}': gate for action '{}' failed: {}",
                    trigger_id,
                    action.id,
                    e
                );
                false
            }
        }
    }
}

impl TriggerSink for Engine {
    fn on_event(&self, event: &Event) {
        let snapshot = self.inner.triggers.snapshot();
        let matches = snapshot.triggers_for_event(&event.name);
        log::debug!("Event '{}' matched {} trigger(s)", event.name, matches.len());
        for trigger in matches {
            self.spawn_trigger(snapshot.clone(), trigger.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::config::ConfigLoader;
    use crate::beacon::dispatch::ActionRequest;
    use crate::eval::error::ExecutorError;
    use async_trait::async_trait;

    struct NoopExecutor;

    #[async_trait]
    impl ActionExecutor for NoopExecutor {
        async fn execute(&self, _request: &ActionRequest) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    fn engine() -> Engine {
        Engine::builder()
            .executor(Arc::new(NoopExecutor))
            .app_id("io.example.app")
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_executor() {
        let result = Engine::builder().build();
        assert!(matches!(result, Err(EngineError::MissingExecutor)));
    }

    #[test]
    fn test_build_outside_runtime_needs_handle() {
        let result = Engine::builder().executor(Arc::new(NoopExecutor)).build();
        assert!(matches!(result, Err(EngineError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_builder_registers_event_functions() {
        let engine = engine();
        assert!(engine.registry().function("event_count").is_some());
        assert!(engine.registry().function("event_count_with_limit").is_some());
        assert_eq!(engine.options().evaluation_timeout, DEFAULT_EVALUATION_TIMEOUT);
    }

    #[tokio::test]
    async fn test_calls_before_start_fail() {
        let engine = engine();
        assert!(matches!(engine.send_event("a"), Err(EngineError::NotStarted)));
        assert!(matches!(
            engine.check_named_condition("c", "true").await,
            Err(EngineError::NotStarted)
        ));
        assert!(matches!(
            engine.perform_named_action("a").await,
            Err(EngineError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_start_requires_required_properties_and_key() {
        let engine = engine();
        assert!(matches!(
            engine.start().await,
            Err(EngineError::Validation(ValidationError::MissingRequiredProperty(_)))
        ));

        for name in ["platform", "os_version", "app_version"] {
            engine.registry().register_static(name, "x".into()).unwrap();
        }
        assert!(matches!(
            engine.start().await,
            Err(EngineError::Validation(ValidationError::MissingApiKey))
        ));

        engine.set_api_key("BK1-a-b-c").unwrap();
        assert!(matches!(
            engine.start().await,
            Err(EngineError::Config(ConfigError::MissingSource))
        ));
        assert!(!engine.is_started());
    }

    #[tokio::test]
    async fn test_set_api_key_and_url_validation() {
        let engine = engine();
        assert!(engine.set_api_key("not-a-key").is_err());
        assert!(engine.set_config_url("ftp://example.com/c.json").is_err());
        assert!(engine.set_config_url("https://example.com/c.json").is_ok());
    }

    #[tokio::test]
    async fn test_apply_configuration_app_id_mismatch() {
        let engine = engine();
        let doc = ConfigLoader::parse_yaml("config_version: v1\napp_id: io.other.app\n").unwrap();
        assert!(matches!(
            engine.apply_configuration(doc),
            Err(EngineError::Config(ConfigError::Rejected(_)))
        ));
    }

    #[tokio::test]
    async fn test_unbounded_evaluation_timeout() {
        let engine = Engine::builder()
            .executor(Arc::new(NoopExecutor))
            .evaluation_timeout(Duration::MAX)
            .build()
            .unwrap();
        assert!(engine.evaluate("true").await.unwrap());
        assert!(!engine.evaluate("1 > 2").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_applies_never_mix_documents() {
        let engine = engine();
        let doc = |mode: &str, action: &str| {
            ConfigLoader::parse_yaml(&format!(
                "config_version: v1
named_conditions:
  mode: \"{mode}\"
actions:
  {action}:
    kind: banner
triggers:
  - id: on_{action}
    match: {{ kind: event, target: go }}
    action: {action}
"
            ))
            .unwrap()
        };
        let first = doc("1 == 1", "first");
        let second = doc("2 == 2", "second");

        for _ in 0..20 {
            let appliers: Vec<_> = (0..8)
                .map(|i| {
                    let engine = engine.clone();
                    let doc = if i % 2 == 0 { first.clone() } else { second.clone() };
                    std::thread::spawn(move || {
                        for _ in 0..25 {
                            engine.apply_configuration(doc.clone()).unwrap();
                        }
                    })
                })
                .collect();
            for applier in appliers {
                applier.join().unwrap();
            }

            let mode = engine.inner.named.resolve("mode").unwrap();
            let snapshot = engine.inner.triggers.snapshot();
            match mode.source() {
                "1 == 1" => assert!(snapshot.action("first").is_some()),
                "2 == 2" => assert!(snapshot.action("second").is_some()),
                other => panic!("unexpected override {}", other),
            }
            assert_eq!(snapshot.trigger_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_ad_hoc_evaluate() {
        let engine = engine();
        engine
            .registry()
            .register_static("battery_level", Value::Number(0.8))
            .unwrap();
        assert!(engine.evaluate("battery_level > 0.5").await.unwrap());
        assert!(matches!(
            engine.evaluate("battery_level >").await,
            Err(EngineError::Parse(_))
        ));
    }
}
