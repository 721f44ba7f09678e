// SPDX-License-Identifier: MIT

//! Indexed trigger snapshot, rebuilt on every accepted configuration

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::beacon::config::{ActionDefinition, ConfigDocument, TriggerDefinition, TriggerMatch};
use crate::eval::condition::Condition;
use crate::eval::error::ConfigError;

/// An action with its gating condition already parsed
#[derive(Debug, Clone)]
pub struct CompiledAction {
    pub id: String,
    pub definition: ActionDefinition,
    pub gate: Option<Arc<Condition>>,
}

/// Immutable view of the trigger list, indexed by what each trigger matches
#[derive(Debug, Default)]
pub struct TriggerSnapshot {
    by_event: HashMap<String, Vec<Arc<TriggerDefinition>>>,
    by_condition: HashMap<String, Vec<Arc<TriggerDefinition>>>,
    actions: HashMap<String, Arc<CompiledAction>>,
}

impl TriggerSnapshot {
    /// Index a validated document. Fails if an action's gating condition does
    /// not parse.
    pub fn build(doc: &ConfigDocument) -> Result<Self, ConfigError> {
        let mut actions = HashMap::with_capacity(doc.actions.len());
        for (id, definition) in &doc.actions {
            let gate = match &definition.condition {
                Some(source) => Some(Arc::new(Condition::parse(source).map_err(|e| {
                    ConfigError::rejected(format!("action '{}' condition: {}", id, e))
                })?)),
                None => None,
            };
            actions.insert(
                id.clone(),
                Arc::new(CompiledAction {
                    id: id.clone(),
                    definition: definition.clone(),
                    gate,
                }),
            );
        }

        let mut by_event: HashMap<String, Vec<Arc<TriggerDefinition>>> = HashMap::new();
        let mut by_condition: HashMap<String, Vec<Arc<TriggerDefinition>>> = HashMap::new();
        for trigger in &doc.triggers {
            let trigger = Arc::new(trigger.clone());
            let index = match &trigger.matcher {
                TriggerMatch::Event(name) => by_event.entry(name.clone()),
                TriggerMatch::Condition(name) => by_condition.entry(name.clone()),
            };
            index.or_default().push(trigger);
        }

        Ok(Self {
            by_event,
            by_condition,
            actions,
        })
    }

    pub fn triggers_for_event(&self, name: &str) -> &[Arc<TriggerDefinition>] {
        self.by_event.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn triggers_for_condition(&self, name: &str) -> &[Arc<TriggerDefinition>] {
        self.by_condition.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Names of all conditions that at least one trigger watches, sorted
    pub fn watched_conditions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_condition.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn action(&self, id: &str) -> Option<Arc<CompiledAction>> {
        self.actions.get(id).cloned()
    }

    pub fn trigger_count(&self) -> usize {
        self.by_event.values().map(Vec::len).sum::<usize>()
            + self.by_condition.values().map(Vec::len).sum::<usize>()
    }
}

/// Holds the active snapshot. Readers keep the `Arc` they took, so a swap
/// never disturbs in-flight matching.
pub struct TriggerTable {
    current: RwLock<Arc<TriggerSnapshot>>,
}

impl TriggerTable {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(TriggerSnapshot::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<TriggerSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install `next`, returning the snapshot it replaced
    pub fn swap(&self, next: TriggerSnapshot) -> Arc<TriggerSnapshot> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, Arc::new(next))
    }
}

impl Default for TriggerTable {
    fn default() -> Self {
        Self::new()
    }
}
