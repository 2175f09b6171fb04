use serde::{Deserialize, Serialize};
use serde_json::Value;
use slotd_core::{Error, ErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Error,
}

/// Answer to one inbound packet, correlated by its `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckEnvelope {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub id: Value,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl AckEnvelope {
    pub fn ok(id: Value, response: Value) -> Self {
        Self {
            id,
            status: Status::Ok,
            response: Some(response),
            error: None,
            error_code: None,
        }
    }

    pub fn error(id: Value, message: impl Into<String>, code: Option<ErrorCode>) -> Self {
        Self {
            id,
            status: Status::Error,
            response: None,
            error: Some(message.into()),
            error_code: code,
        }
    }

    pub fn from_error(id: Value, err: &Error) -> Self {
        Self::error(id, err.to_string(), err.code())
    }
}

/// Reports a failure that escaped every request handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncaughtException {
    pub error: String,
    pub status: Status,
}

impl UncaughtException {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status: Status::Error,
        }
    }
}

/// Everything slotd writes to its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "ACK")]
    Ack(AckEnvelope),

    #[serde(rename = "uncaughtException")]
    UncaughtException(UncaughtException),
}

impl From<AckEnvelope> for OutboundMessage {
    fn from(ack: AckEnvelope) -> Self {
        OutboundMessage::Ack(ack)
    }
}

impl From<UncaughtException> for OutboundMessage {
    fn from(report: UncaughtException) -> Self {
        OutboundMessage::UncaughtException(report)
    }
}
