// SPDX-License-Identifier: MIT

//! Catalogue of built-in and well-known property names and their kinds

use once_cell::sync::Lazy;
use std::collections::HashMap;

use super::value::PropertyKind;

/// Prefix applied to client-defined properties that are not well known
pub const CUSTOM_PREFIX: &str = "custom_";

/// Catalogue entry for a reserved property name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySpec {
    pub kind: PropertyKind,
    /// Required properties must have a provider before the engine starts
    pub required: bool,
}

const fn spec(kind: PropertyKind, required: bool) -> PropertySpec {
    PropertySpec { kind, required }
}

/// Properties supplied by the platform layer. Clients cannot register these
/// through [`register_client_property`](super::PropertyRegistry::register_client_property).
pub static BUILT_IN: Lazy<HashMap<&'static str, PropertySpec>> = Lazy::new(|| {
    HashMap::from([
        ("platform", spec(PropertyKind::String, true)),
        ("os_version", spec(PropertyKind::String, true)),
        ("app_version", spec(PropertyKind::String, true)),
        ("sdk_version", spec(PropertyKind::String, false)),
        ("device_model", spec(PropertyKind::String, false)),
        ("interface_orientation", spec(PropertyKind::String, false)),
        ("locale_language_code", spec(PropertyKind::String, false)),
        ("battery_level", spec(PropertyKind::Number, false)),
        ("battery_state", spec(PropertyKind::String, false)),
        ("low_power_mode", spec(PropertyKind::Bool, false)),
        ("network_connection_type", spec(PropertyKind::String, false)),
        ("app_install_age", spec(PropertyKind::Duration, false)),
    ])
});

/// Properties with an agreed meaning that the host app may supply
pub static WELL_KNOWN: Lazy<HashMap<&'static str, PropertySpec>> = Lazy::new(|| {
    HashMap::from([
        ("user_signed_in", spec(PropertyKind::Bool, false)),
        ("user_interface_style", spec(PropertyKind::String, false)),
    ])
});

/// Look up a reserved name in either table
pub fn reserved_spec(name: &str) -> Option<PropertySpec> {
    BUILT_IN
        .get(name)
        .or_else(|| WELL_KNOWN.get(name))
        .copied()
}

/// Property names are non-empty ASCII alphanumerics and underscores, and
/// not the bare custom prefix.
pub fn is_valid_property_name(name: &str) -> bool {
    if name.is_empty() || name == CUSTOM_PREFIX {
        return false;
    }
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
