// SPDX-License-Identifier: MIT

//! Property values and kinds

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The value of a property or of an evaluated sub-expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
    String(String),
    Duration(Duration),
    /// The provider could not produce a value. Fails the evaluation.
    Absent,
}

/// The declared type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Bool,
    Number,
    String,
    Duration,
}

impl Value {
    /// Kind of a present value; `None` for [`Value::Absent`]
    pub fn kind(&self) -> Option<PropertyKind> {
        match self {
            Value::Bool(_) => Some(PropertyKind::Bool),
            Value::Number(_) => Some(PropertyKind::Number),
            Value::String(_) => Some(PropertyKind::String),
            Value::Duration(_) => Some(PropertyKind::Duration),
            Value::Absent => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Duration(_) => "duration",
            Value::Absent => "absent",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view in seconds; durations and numbers compare in the same unit
    pub fn as_seconds(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Duration(d) => Some(d.as_secs_f64()),
            _ => None,
        }
    }

    /// Parse a loosely typed command-line value: `true`/`false`, a number,
    /// or otherwise a string (surrounding quotes are stripped).
    pub fn parse_loose(input: &str) -> Self {
        let input = input.trim();
        match input {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        if let Ok(n) = input.parse::<f64>() {
            return Value::Number(n);
        }
        let unquoted = input
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .or_else(|| input.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
            .unwrap_or(input);
        Value::String(unquoted.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "'{}'", s),
            Value::Duration(d) => write!(f, "{:?}", d),
            Value::Absent => write!(f, "absent"),
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKind::Bool => write!(f, "bool"),
            PropertyKind::Number => write!(f, "number"),
            PropertyKind::String => write!(f, "string"),
            PropertyKind::Duration => write!(f, "duration"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Duration> for Value {
    fn from(d: Duration) -> Self {
        Value::Duration(d)
    }
}
