// SPDX-License-Identifier: MIT

//! Condition language and property resolution
//!
//! Everything needed to turn a condition string into a boolean:
//! - `condition` - parser and asynchronous evaluator
//! - `property` - typed registry of property providers and functions
//! - `context` - per-evaluation deadline, cancellation and cache
//! - `error` - the crate-wide error taxonomy

pub mod condition;
pub mod context;
pub mod error;
pub mod property;
