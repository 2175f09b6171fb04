//! Sandbox binding sets.
//!
//! A [`BindingSet`] is everything a deployed ref can see while its source
//! runs: the module placeholder it exports through, an output stream, timer
//! primitives, the gated capabilities and whatever globals expansion hooks
//! have added. A fresh binding set is assembled for every deploy by
//! [`SandboxBuilder`](crate::builder::SandboxBuilder).

mod bytes;
mod gated;
mod modules;
mod output;
mod timers;

pub use bytes::RawBytes;
pub use gated::Gated;
pub use modules::ModuleLoader;
pub use output::OutputStream;
pub use timers::{TimerId, Timers};

use crate::capabilities::{CapabilitySet, MODULE_ACCESS, RAW_BYTES_ACCESS};
use crate::engine::Invocable;
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of one built sandbox, used to tag its output and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SandboxId(Uuid);

impl SandboxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SandboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value a sandbox exported through its module placeholder.
#[derive(Clone, Default)]
pub enum Export {
    #[default]
    Undefined,
    Value(Value),
    Function(Arc<dyn Invocable>),
}

impl Export {
    pub fn function(handle: impl Invocable + 'static) -> Self {
        Export::Function(Arc::new(handle))
    }

    pub fn is_invocable(&self) -> bool {
        matches!(self, Export::Function(_))
    }

    pub fn into_invocable(self) -> Option<Arc<dyn Invocable>> {
        match self {
            Export::Function(handle) => Some(handle),
            Export::Undefined | Export::Value(_) => None,
        }
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Export::Undefined => f.write_str("Undefined"),
            Export::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Export::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Placeholder the executed source exports through.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub exports: Export,
}

/// Bindings exposed to source running in one sandbox.
#[derive(Debug)]
pub struct BindingSet {
    pub id: SandboxId,
    pub module: Module,
    pub output: OutputStream,
    pub timers: Timers,
    pub modules: Gated<ModuleLoader>,
    pub raw_bytes: Gated<RawBytes>,
    pub globals: Map<String, Value>,
}

impl BindingSet {
    /// Builds bindings gated by `capabilities`.
    ///
    /// `module_roots` are only consulted when module access is enabled.
    pub fn new(capabilities: CapabilitySet, module_roots: Vec<PathBuf>) -> Self {
        let id = SandboxId::new();

        let modules = if capabilities.module_access {
            Gated::Enabled(ModuleLoader::with_roots(module_roots))
        } else {
            Gated::Disabled(MODULE_ACCESS)
        };

        let raw_bytes = if capabilities.raw_bytes_access {
            Gated::Enabled(RawBytes)
        } else {
            Gated::Disabled(RAW_BYTES_ACCESS)
        };

        Self {
            id,
            module: Module::default(),
            output: OutputStream::new(id),
            timers: Timers::new(),
            modules,
            raw_bytes,
            globals: Map::new(),
        }
    }

    /// Bindings for a scratch sandbox, where module loading is always
    /// available.
    pub fn scratch(module_roots: Vec<PathBuf>) -> Self {
        let capabilities = CapabilitySet {
            module_access: true,
            raw_bytes_access: true,
        };
        Self::new(capabilities, module_roots)
    }

    /// Names of the capabilities that are stubbed out in this sandbox.
    pub fn disabled_capabilities(&self) -> Vec<&'static str> {
        [self.modules.disabled_name(), self.raw_bytes.disabled_name()]
            .into_iter()
            .flatten()
            .collect()
    }
}
