// SPDX-License-Identifier: MIT

//! Typed error handling for beacon-rs
//!
//! Every failure the engine can produce is one of the enums below. They are
//! aggregated into [`EngineError`], which is what the host-facing API returns.
//! None of them is fatal to the process: each is scoped to a single
//! evaluation, registration, dispatch or configuration reload.

use std::time::Duration;
use thiserror::Error;

use super::property::PropertyKind;

/// Top-level error type for beacon-rs
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed condition expression
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Evaluation failed (property resolution, timeout, type mismatch)
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// Caller supplied an invalid name, key or registration
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A configuration document was rejected; the previous one stays active
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The external action executor reported a failure
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// The engine has not been started yet
    #[error("Engine not started: call start() before sending events or checking conditions")]
    NotStarted,

    /// No action executor was supplied to the builder
    #[error("No action executor registered")]
    MissingExecutor,

    /// The engine was built outside a tokio runtime and no handle was given
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

/// A condition string that could not be parsed.
///
/// Parsing is pure, so the same input always yields the same error.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Parse error at position {position} near '{token}': {message}")]
pub struct ParseError {
    /// What went wrong
    pub message: String,
    /// Text of the offending token (empty at end of input)
    pub token: String,
    /// Byte offset of the offending token in the source string
    pub position: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, token: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            token: token.into(),
            position,
        }
    }
}

/// Errors raised while evaluating a parsed condition
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    /// A provider failed, returned an absent value, or is not registered
    #[error("Property '{name}' could not be resolved: {reason}")]
    PropertyResolution { name: String, reason: String },

    /// The evaluation deadline elapsed before all properties resolved
    #[error("Condition evaluation timed out after {0:?}")]
    Timeout(Duration),

    /// The evaluation was cancelled through its deadline token
    #[error("Condition evaluation cancelled")]
    Cancelled,

    /// Incompatible operand types
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Call to a function that is not registered
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    /// A registered function was called with the wrong arguments
    #[error("Invalid arguments for '{function}': {reason}")]
    InvalidArguments { function: String, reason: String },
}

impl EvalError {
    /// Create a property resolution error
    pub fn resolution(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PropertyResolution {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch(message.into())
    }

    /// Create an invalid arguments error
    pub fn invalid_arguments(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            function: function.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by a property provider
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<&str> for ProviderError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProviderError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Invalid input at a registration or API boundary
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// Named conditions require a non-empty name
    #[error("Condition name must not be empty")]
    EmptyName,

    /// The same name was registered twice with different defaults
    #[error("Condition '{name}' already registered with a different default ('{existing}' vs '{attempted}'); reused names cannot be overridden independently")]
    DuplicateName {
        name: String,
        existing: String,
        attempted: String,
    },

    /// No default and no remote override exist for this name
    #[error("Unknown named condition: {0}")]
    UnknownCondition(String),

    /// Property names are ASCII alphanumerics and underscores
    #[error("Invalid property name: '{0}'")]
    InvalidPropertyName(String),

    /// Provider kind does not match the catalogue
    #[error("Property '{name}' registered with kind {actual}, expected {expected}")]
    PropertyKindMismatch {
        name: String,
        expected: PropertyKind,
        actual: PropertyKind,
    },

    /// Static properties need a present value
    #[error("Property '{0}' cannot be registered with an absent value")]
    AbsentValue(String),

    /// Client properties cannot shadow built-in properties
    #[error("Property '{0}' is a reserved built-in property")]
    ReservedProperty(String),

    /// Provider names must be built in, well known or custom-prefixed
    #[error("Property '{0}' is not built in, well known, or custom_ prefixed")]
    UnrecognisedProperty(String),

    /// A required built-in property has no provider
    #[error("Missing required property: {0}")]
    MissingRequiredProperty(String),

    /// Events require a non-empty name
    #[error("Event name must not be empty")]
    EmptyEventName,

    /// Reserved-prefix event that is not in the catalogue
    #[error("Unknown reserved event: {0}")]
    UnknownReservedEvent(String),

    /// API key failed local format validation
    #[error("Invalid API key: {0}")]
    InvalidApiKey(String),

    /// start() requires an API key
    #[error("API key not set")]
    MissingApiKey,

    /// Config URL has an unsupported scheme or is malformed
    #[error("Invalid config URL '{url}': {reason}")]
    InvalidConfigUrl { url: String, reason: String },

    /// The action id is not declared in the active configuration
    #[error("Unknown action: {0}")]
    UnknownAction(String),
}

/// Configuration could not be loaded or was structurally invalid.
///
/// All variants are ConfigurationRejected-class: the engine keeps running the
/// last accepted configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document failed structural validation
    #[error("Configuration rejected: {0}")]
    Rejected(String),

    /// No configuration source was set before start()/reload
    #[error("No configuration source set")]
    MissingSource,

    /// Remote fetch failed or no fetcher was registered for the scheme
    #[error("Failed to fetch configuration: {0}")]
    Fetch(String),

    /// I/O errors reading a local configuration file
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    /// Create a rejection error
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// Failure reported by the external action executor
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutorError {
    /// The executor does not know how to perform this kind of action
    #[error("Executor does not support action kind '{0}'")]
    Unsupported(String),

    /// The executor attempted the action and failed
    #[error("Action failed: {0}")]
    Failed(String),
}

/// Errors from a throttle state store
#[derive(Debug, Error)]
pub enum ThrottleStoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
