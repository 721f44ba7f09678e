// SPDX-License-Identifier: MIT

//! Named condition table
//!
//! Each name maps to a default expression registered by the app and an
//! optional remote override from configuration. Lookups consult overrides
//! first. Overrides never touch the registered defaults.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::eval::condition::Condition;
use crate::eval::error::{EngineError, ParseError, ValidationError};

struct NamedCondition {
    default_source: String,
    default: Result<Arc<Condition>, ParseError>,
}

type OverrideMap = HashMap<String, Arc<Condition>>;

/// Default conditions plus the current override snapshot
pub struct NamedConditionTable {
    defaults: RwLock<HashMap<String, NamedCondition>>,
    overrides: RwLock<Arc<OverrideMap>>,
}

impl NamedConditionTable {
    pub fn new() -> Self {
        Self {
            defaults: RwLock::new(HashMap::new()),
            overrides: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Register a default expression under `name`.
    ///
    /// Registering the same name again with the same default is a no-op. A
    /// malformed default is stored as-is and surfaces as a parse error when
    /// resolved, unless an override is in force.
    pub fn register(&self, name: &str, default: &str) -> Result<(), ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        let mut defaults = self.defaults.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = defaults.get(name) {
            if existing.default_source == default {
                return Ok(());
            }
            return Err(ValidationError::DuplicateName {
                name: name.to_string(),
                existing: existing.default_source.clone(),
                attempted: default.to_string(),
            });
        }

        let parsed = Condition::parse(default).map(Arc::new);
        if let Err(e) = &parsed {
            log::warn!("Default for condition '{}' does not parse: {}", name, e);
        }
        defaults.insert(
            name.to_string(),
            NamedCondition {
                default_source: default.to_string(),
                default: parsed,
            },
        );
        Ok(())
    }

    /// Replace the override map with the well-formed entries of `overrides`.
    ///
    /// Returns the names whose expressions failed to parse; for those the
    /// default stays in force.
    pub fn apply_remote_overrides(&self, overrides: &HashMap<String, String>) -> Vec<String> {
        let mut accepted = HashMap::with_capacity(overrides.len());
        let mut rejected = Vec::new();

        for (name, source) in overrides {
            match Condition::parse(source) {
                Ok(condition) => {
                    accepted.insert(name.clone(), Arc::new(condition));
                }
                Err(e) => {
                    log::warn!("Ignoring malformed override for '{}': {}", name, e);
                    rejected.push(name.clone());
                }
            }
        }

        rejected.sort();
        log::info!(
            "Applied {} condition override(s), rejected {}",
            accepted.len(),
            rejected.len()
        );
        *self.overrides.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(accepted);
        rejected
    }

    /// The override if one is in force, else the registered default
    pub fn resolve(&self, name: &str) -> Result<Arc<Condition>, EngineError> {
        let overrides = self
            .overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(condition) = overrides.get(name) {
            return Ok(condition.clone());
        }

        let defaults = self.defaults.read().unwrap_or_else(PoisonError::into_inner);
        match defaults.get(name) {
            Some(named) => named.default.clone().map_err(EngineError::from),
            None => Err(ValidationError::UnknownCondition(name.to_string()).into()),
        }
    }

    /// Whether a remote override is in force for `name`
    pub fn has_override(&self, name: &str) -> bool {
        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

impl Default for NamedConditionTable {
    fn default() -> Self {
        Self::new()
    }
}
