// SPDX-License-Identifier: MIT

//! Trigger dispatch for server-controlled in-app messaging
//!
//! Configuration declares actions and the triggers that fire them; the
//! [`Engine`] matches published events and holding named conditions against
//! those triggers and hands qualifying actions to the host's executor.

pub mod api_key;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod named;
pub mod trigger;

pub use dispatch::{ActionExecutor, ActionRequest, DispatchReport};
pub use engine::{Engine, EngineBuilder, EngineOptions, DEFAULT_EVALUATION_TIMEOUT};
