//! Wire types exchanged between slotd and its orchestrator.
//!
//! The channel carries one JSON message per line. Inbound packets are
//! classified with [`Packet::classify`] and decoded into a [`Request`];
//! every packet that reaches a handler is answered with exactly one
//! [`AckEnvelope`] carrying the packet's `id`.

mod message;
mod packet;

pub use message::{AckEnvelope, OutboundMessage, Status, UncaughtException};
pub use packet::{BufferSource, BufferTag, Packet, PacketType, Request, SourceText};

use serde::{Deserialize, Serialize};
use slotd_core::CapabilitySet;

/// Maximum length of one channel line.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Self-descriptor returned by `GET_INFO`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub lang: String,
    pub host: String,
}

impl NodeInfo {
    pub fn current() -> Self {
        Self {
            lang: "rust".to_string(),
            host: "slotd".to_string(),
        }
    }
}

/// Response to `PING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub pong: bool,
}

impl Default for Pong {
    fn default() -> Self {
        Self { pong: true }
    }
}

/// Response to `SET_CONFIG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityReport {
    pub capabilities: CapabilitySet,
}

/// Response to `GRACEFUL_SHUTDOWN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub drained: bool,
}
