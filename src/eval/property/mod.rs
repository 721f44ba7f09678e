// SPDX-License-Identifier: MIT

//! Property registry
//!
//! Properties are named, typed values that conditions refer to, such as
//! `interface_orientation` or `battery_level`. Each is backed by a
//! [`PropertyProvider`], which may resolve asynchronously.

pub mod catalogue;
mod function;
mod provider;
mod registry;
mod value;

pub use catalogue::{PropertySpec, CUSTOM_PREFIX};
pub use function::{expect_arity, number_arg, string_arg, ConditionFunction};
pub use provider::{CachedProvider, FnProvider, PropertyProvider, StaticProvider};
pub use registry::PropertyRegistry;
pub use value::{PropertyKind, Value};
