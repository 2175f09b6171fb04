//! The slotd daemon.
//!
//! Wires [`slotd_core::DaemonState`] to a line-delimited JSON channel: the
//! [`Dispatcher`] turns each inbound packet into a spawned handler task and
//! an ACK, [`channel::serve`] owns the framing and the single writer, and
//! [`ProcessEngine`] runs ref source through an external interpreter.

pub mod channel;
pub mod dispatcher;
pub mod panic;
pub mod process;
pub mod settings;

pub use dispatcher::Dispatcher;
pub use process::ProcessEngine;
pub use settings::{Settings, SettingsError, SettingsFile, SettingsOverrides};
