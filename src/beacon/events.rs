// SPDX-License-Identifier: MIT

//! Event bus and event history
//!
//! Published events are validated, recorded in an [`EventStore`] and then
//! handed to a [`TriggerSink`] for matching. Recorded history backs the
//! `event_count` condition functions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use crate::eval::error::{EvalError, ValidationError};
use crate::eval::property::{expect_arity, number_arg, string_arg, ConditionFunction, Value};

pub const BUILT_IN_EVENT_PREFIX: &str = "beacon.events.built_in.";
pub const WELL_KNOWN_EVENT_PREFIX: &str = "beacon.events.well_known.";

/// Events the engine or its platform layer emits itself
pub const BUILT_IN_EVENTS: &[&str] = &[
    "beacon.events.built_in.app_start",
    "beacon.events.built_in.app_entered_foreground",
    "beacon.events.built_in.app_entered_background",
    "beacon.events.built_in.session_start",
];

/// Events with a shared meaning that apps send themselves
pub const WELL_KNOWN_EVENTS: &[&str] = &[
    "beacon.events.well_known.signed_in",
    "beacon.events.well_known.signed_out",
    "beacon.events.well_known.purchase_completed",
    "beacon.events.well_known.onboarding_completed",
    "beacon.events.well_known.user_updated_profile_photo",
];

/// Validate an event name before it is published
pub fn validate_event_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyEventName);
    }
    if name.starts_with(BUILT_IN_EVENT_PREFIX) && !BUILT_IN_EVENTS.contains(&name) {
        return Err(ValidationError::UnknownReservedEvent(name.to_string()));
    }
    if name.starts_with(WELL_KNOWN_EVENT_PREFIX) && !WELL_KNOWN_EVENTS.contains(&name) {
        return Err(ValidationError::UnknownReservedEvent(name.to_string()));
    }
    Ok(())
}

/// A named occurrence reported by the host app
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// History of published events
pub trait EventStore: Send + Sync {
    fn record(&self, event: &Event);

    /// Number of events recorded under `name`
    fn count(&self, name: &str) -> u64;

    /// Most recent occurrence of `name`
    fn latest(&self, name: &str) -> Option<DateTime<Utc>>;
}

#[derive(Debug, Default, Clone)]
struct EventStats {
    count: u64,
    latest: Option<DateTime<Utc>>,
}

/// Per-name counters held in memory
#[derive(Default)]
pub struct MemoryEventStore {
    stats: Mutex<HashMap<String, EventStats>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn record(&self, event: &Event) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = stats.entry(event.name.clone()).or_default();
        entry.count += 1;
        entry.latest = Some(entry.latest.map_or(event.timestamp, |t| t.max(event.timestamp)));
    }

    fn count(&self, name: &str) -> u64 {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, |s| s.count)
    }

    fn latest(&self, name: &str) -> Option<DateTime<Utc>> {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .and_then(|s| s.latest)
    }
}

/// `event_count('name')`: number of times `name` was published
pub struct EventCountFunction {
    store: Arc<dyn EventStore>,
}

impl EventCountFunction {
    pub const NAME: &'static str = "event_count";

    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }
}

impl ConditionFunction for EventCountFunction {
    fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        expect_arity(Self::NAME, args, 1)?;
        let name = string_arg(Self::NAME, args, 0)?;
        Ok(Value::Number(self.store.count(name) as f64))
    }
}

/// `event_count_with_limit('name', limit)`: the count, capped at `limit`
pub struct EventCountWithLimitFunction {
    store: Arc<dyn EventStore>,
}

impl EventCountWithLimitFunction {
    pub const NAME: &'static str = "event_count_with_limit";

    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }
}

impl ConditionFunction for EventCountWithLimitFunction {
    fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        expect_arity(Self::NAME, args, 2)?;
        let name = string_arg(Self::NAME, args, 0)?;
        let limit = number_arg(Self::NAME, args, 1)?;
        if limit < 0.0 || limit.fract() != 0.0 {
            return Err(EvalError::invalid_arguments(
                Self::NAME,
                "limit must be a non-negative integer",
            ));
        }
        let count = self.store.count(name) as f64;
        Ok(Value::Number(count.min(limit)))
    }
}

/// Receives published events for trigger matching.
///
/// Called synchronously from [`EventBus::publish`], so implementations must
/// not block; per-trigger work should be spawned.
pub trait TriggerSink: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Validates, records and forwards events
pub struct EventBus {
    store: Arc<dyn EventStore>,
}

impl EventBus {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Publish an event. Matching happens before this returns, so events
    /// published in sequence by one caller are matched in that order.
    pub fn publish(&self, event: Event, sink: &dyn TriggerSink) -> Result<(), ValidationError> {
        validate_event_name(&event.name)?;
        self.store.record(&event);
        log::debug!("Event '{}' published ({})", event.name, event.id);
        sink.on_event(&event);
        Ok(())
    }
}
