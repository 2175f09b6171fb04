//! Core of the slotd worker daemon.
//!
//! An orchestrator pushes source ("refs") into a slotd process, invokes them
//! by digest and eventually drains the process. This crate holds everything
//! behind that protocol: the ref registry, the sandbox builder with its
//! capability gates and expansion hooks, the inflight tracker and the
//! shutdown coordinator, all reached through one [`DaemonState`].
//!
//! Running source is delegated to an [`ExecutionEngine`].

pub mod builder;
pub mod capabilities;
pub mod config;
pub mod digest;
pub mod engine;
pub mod error;
pub mod expansion;
pub mod inflight;
pub mod registry;
pub mod sandbox;
pub mod shutdown;
pub mod state;

pub use builder::SandboxBuilder;
pub use capabilities::CapabilitySet;
pub use config::{ConfigSnapshot, ConfigStore};
pub use digest::Digest;
pub use engine::{ExecutionEngine, Invocable, NativeEngine, expander_fn, invocable_fn};
pub use error::{Error, ErrorCode, ExecutionError, Result};
pub use expansion::ExpansionPipeline;
pub use inflight::{InflightGuard, InflightTracker};
pub use registry::RefRegistry;
pub use sandbox::{BindingSet, Export, Gated, ModuleLoader, OutputStream, RawBytes, SandboxId, Timers};
pub use shutdown::{DrainOutcome, ShutdownCoordinator};
pub use state::DaemonState;
