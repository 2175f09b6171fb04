use serde::{Deserialize, Serialize};
use serde_json::Value;
use slotd_core::Digest;
use std::fmt;

/// The packet types a slotd process answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    RefDeploy,
    RefInvoke,
    RefUndeploy,
    ExpandSandbox,
    SetConfig,
    GetInfo,
    GracefulShutdown,
    Ping,
}

impl PacketType {
    pub const ALL: [PacketType; 8] = [
        PacketType::RefDeploy,
        PacketType::RefInvoke,
        PacketType::RefUndeploy,
        PacketType::ExpandSandbox,
        PacketType::SetConfig,
        PacketType::GetInfo,
        PacketType::GracefulShutdown,
        PacketType::Ping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PacketType::RefDeploy => "REFDeploy",
            PacketType::RefInvoke => "REFInvoke",
            PacketType::RefUndeploy => "REFUndeploy",
            PacketType::ExpandSandbox => "EXPAND_SANDBOX",
            PacketType::SetConfig => "SET_CONFIG",
            PacketType::GetInfo => "GET_INFO",
            PacketType::GracefulShutdown => "GRACEFUL_SHUTDOWN",
            PacketType::Ping => "PING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound packet whose type is known.
///
/// Classification only looks at `type` and `id`; the remaining fields are
/// decoded by [`Packet::request`], so a packet with a known type but bad
/// fields still reaches a handler and gets answered with an error.
#[derive(Debug, Clone)]
pub struct Packet {
    pub id: Value,
    pub kind: PacketType,
    raw: Value,
}

impl Packet {
    /// Returns `None` for anything that should be dropped without an answer:
    /// non-objects, a missing or empty `type`, or an unknown type.
    pub fn classify(raw: Value) -> Option<Self> {
        let fields = raw.as_object()?;
        let kind = fields
            .get("type")
            .and_then(Value::as_str)
            .and_then(PacketType::parse)?;
        let id = fields.get("id").cloned().unwrap_or(Value::Null);

        Some(Self { id, kind, raw })
    }

    /// Decodes and classifies one line of channel input.
    pub fn parse_line(line: &str) -> Option<Self> {
        serde_json::from_str(line).ok().and_then(Self::classify)
    }

    pub fn request(&self) -> Result<Request, serde_json::Error> {
        Request::deserialize(&self.raw)
    }
}

/// A decoded inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "REFDeploy")]
    Deploy { digest: Digest, source: SourceText },

    #[serde(rename = "REFInvoke")]
    Invoke {
        digest: Digest,
        #[serde(default)]
        context: Option<Value>,
    },

    #[serde(rename = "REFUndeploy")]
    Undeploy { digest: Digest },

    #[serde(rename = "EXPAND_SANDBOX")]
    ExpandSandbox { source: SourceText },

    #[serde(rename = "SET_CONFIG")]
    SetConfig {
        #[serde(default)]
        config: Value,
    },

    #[serde(rename = "GET_INFO")]
    GetInfo {},

    #[serde(rename = "GRACEFUL_SHUTDOWN")]
    GracefulShutdown {
        /// Drain deadline in milliseconds.
        #[serde(default)]
        ttl: Option<u64>,
    },

    #[serde(rename = "PING")]
    Ping {},
}

/// Source text, sent either as a string or as a serialized byte buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceText {
    Text(String),
    Buffer(BufferSource),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferSource {
    #[serde(rename = "type")]
    pub kind: BufferTag,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferTag {
    Buffer,
}

impl SourceText {
    /// The source as UTF-8, replacing invalid sequences.
    pub fn into_string(self) -> String {
        match self {
            SourceText::Text(text) => text,
            SourceText::Buffer(buffer) => String::from_utf8_lossy(&buffer.data).into_owned(),
        }
    }
}

impl From<&str> for SourceText {
    fn from(text: &str) -> Self {
        SourceText::Text(text.to_string())
    }
}
