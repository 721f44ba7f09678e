// SPDX-License-Identifier: MIT

//! Schema types for the remote configuration document
//!
//! A document carries remote overrides for named conditions, the action
//! table and the trigger list. It is deserialised from JSON or YAML and
//! structurally validated before anything in it takes effect.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::beacon::trigger::ThrottlePolicy;
use crate::eval::error::ConfigError;

/// The only document version this engine accepts
pub const CONFIG_VERSION: &str = "v1";

/// Top-level configuration document
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ConfigDocument {
    pub config_version: String,
    /// Must match the engine's app id when both are set
    #[serde(default)]
    pub app_id: Option<String>,
    /// Remote overrides, name -> condition expression
    #[serde(default)]
    pub named_conditions: HashMap<String, String>,
    #[serde(default)]
    pub actions: HashMap<String, ActionDefinition>,
    #[serde(default)]
    pub triggers: Vec<TriggerDefinition>,
}

/// An action the executor knows how to perform
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ActionDefinition {
    /// Executor-facing action type, e.g. "banner"
    pub kind: String,
    /// Gating condition evaluated before the action is dispatched
    #[serde(default)]
    pub condition: Option<String>,
    /// Opaque parameters passed through to the executor
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Binds an event or a named condition to an action
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TriggerDefinition {
    pub id: String,
    #[serde(rename = "match")]
    pub matcher: TriggerMatch,
    pub action: String,
    #[serde(default)]
    pub throttle: ThrottlePolicy,
}

/// What a trigger listens for
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum TriggerMatch {
    /// An event name, matched exactly
    Event(String),
    /// A named condition that must evaluate to true
    Condition(String),
}

impl TriggerMatch {
    pub fn target(&self) -> &str {
        match self {
            TriggerMatch::Event(name) | TriggerMatch::Condition(name) => name,
        }
    }
}

impl ConfigDocument {
    /// Structural checks. Condition expressions are not parsed here; malformed
    /// overrides are rejected individually when applied.
    pub fn validate(&self, expected_app_id: Option<&str>) -> Result<(), ConfigError> {
        if self.config_version != CONFIG_VERSION {
            return Err(ConfigError::rejected(format!(
                "unsupported config_version '{}', expected '{}'",
                self.config_version, CONFIG_VERSION
            )));
        }

        if let (Some(expected), Some(actual)) = (expected_app_id, self.app_id.as_deref()) {
            if expected != actual {
                return Err(ConfigError::rejected(format!(
                    "document is for app '{}', engine is '{}'",
                    actual, expected
                )));
            }
        }

        for (id, action) in &self.actions {
            if id.is_empty() {
                return Err(ConfigError::rejected("action id must not be empty"));
            }
            if action.kind.is_empty() {
                return Err(ConfigError::rejected(format!(
                    "action '{}' has an empty kind",
                    id
                )));
            }
        }

        let mut seen = HashSet::new();
        for trigger in &self.triggers {
            if trigger.id.is_empty() {
                return Err(ConfigError::rejected("trigger id must not be empty"));
            }
            if !seen.insert(trigger.id.as_str()) {
                return Err(ConfigError::rejected(format!(
                    "duplicate trigger id '{}'",
                    trigger.id
                )));
            }
            if trigger.matcher.target().is_empty() {
                return Err(ConfigError::rejected(format!(
                    "trigger '{}' has an empty match target",
                    trigger.id
                )));
            }
            if !self.actions.contains_key(&trigger.action) {
                return Err(ConfigError::rejected(format!(
                    "trigger '{}' references undeclared action '{}'",
                    trigger.id, trigger.action
                )));
            }
            if let ThrottlePolicy::OncePerInterval { interval_secs: 0 } = trigger.throttle {
                return Err(ConfigError::rejected(format!(
                    "trigger '{}' has a zero throttle interval",
                    trigger.id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> ConfigDocument {
        let mut actions = HashMap::new();
        actions.insert(
            "banner".to_string(),
            ActionDefinition {
                kind: "banner".to_string(),
                condition: None,
                params: serde_json::json!({"body": "Hi"}),
            },
        );
        ConfigDocument {
            config_version: CONFIG_VERSION.to_string(),
            app_id: Some("io.example.app".to_string()),
            named_conditions: HashMap::new(),
            actions,
            triggers: vec![TriggerDefinition {
                id: "t1".to_string(),
                matcher: TriggerMatch::Event("app_start".to_string()),
                action: "banner".to_string(),
                throttle: ThrottlePolicy::Unlimited,
            }],
        }
    }

    fn rejection(doc: &ConfigDocument, app_id: Option<&str>) -> String {
        match doc.validate(app_id) {
            Err(ConfigError::Rejected(reason)) => reason,
            other => panic!("Expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_document() {
        assert!(document().validate(Some("io.example.app")).is_ok());
        assert!(document().validate(None).is_ok());
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut doc = document();
        doc.config_version = "v2".to_string();
        assert!(rejection(&doc, None).contains("config_version"));
    }

    #[test]
    fn test_app_id_mismatch_rejected() {
        assert!(rejection(&document(), Some("io.other.app")).contains("io.other.app"));
    }

    #[test]
    fn test_duplicate_trigger_rejected() {
        let mut doc = document();
        let dup = doc.triggers[0].clone();
        doc.triggers.push(dup);
        assert!(rejection(&doc, None).contains("duplicate"));
    }

    #[test]
    fn test_undeclared_action_rejected() {
        let mut doc = document();
        doc.triggers[0].action = "missing".to_string();
        assert!(rejection(&doc, None).contains("missing"));
    }

    #[test]
    fn test_empty_target_rejected() {
        let mut doc = document();
        doc.triggers[0].matcher = TriggerMatch::Condition(String::new());
        assert!(rejection(&doc, None).contains("empty match target"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut doc = document();
        doc.triggers[0].throttle = ThrottlePolicy::OncePerInterval { interval_secs: 0 };
        assert!(rejection(&doc, None).contains("interval"));
    }

    #[test]
    fn test_trigger_match_serialization() {
        let json = serde_json::to_value(TriggerMatch::Condition("is_landscape".into())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "condition", "target": "is_landscape"})
        );
    }
}
