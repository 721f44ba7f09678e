// SPDX-License-Identifier: MIT

//! Remote configuration: document schema, sources and loading

mod loader;
mod source;
mod types;

pub use loader::ConfigLoader;
pub use source::{ConfigFetcher, ConfigSource};
pub use types::{ActionDefinition, ConfigDocument, TriggerDefinition, TriggerMatch, CONFIG_VERSION};
