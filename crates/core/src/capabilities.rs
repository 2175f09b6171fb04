use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name under which module access is reported when it is disabled.
pub const MODULE_ACCESS: &str = "require";

/// Name under which raw byte access is reported when it is disabled.
pub const RAW_BYTES_ACCESS: &str = "Buffer";

/// Gated features available to sandboxes built under the current node config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySet {
    pub module_access: bool,
    pub raw_bytes_access: bool,
}

impl CapabilitySet {
    /// Derives the capability set from a full config snapshot.
    ///
    /// Module access requires a module path longer than one element; raw
    /// byte access is always granted.
    pub fn from_config(config: &serde_json::Map<String, Value>) -> Self {
        let module_access = module_path_value(config)
            .and_then(value_length)
            .is_some_and(|len| len > 1);

        Self {
            module_access,
            raw_bytes_access: true,
        }
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self {
            module_access: false,
            raw_bytes_access: true,
        }
    }
}

pub(crate) const MODULE_PATH_KEY: &str = "modulePath";
pub(crate) const LEGACY_MODULE_PATH_KEY: &str = "ELIO_MODULE_PATH";

pub(crate) fn module_path_value(config: &serde_json::Map<String, Value>) -> Option<&Value> {
    config
        .get(MODULE_PATH_KEY)
        .or_else(|| config.get(LEGACY_MODULE_PATH_KEY))
}

fn value_length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}
