//! Packet dispatch.
//!
//! Every classified packet is handled on its own task, so packets are
//! dispatched in arrival order but may complete in any order. Each handled
//! packet produces exactly one ACK, even when its handler panics.

use crate::panic::payload_message;
use futures::FutureExt;
use serde_json::{Value, json};
use slotd_core::{DaemonState, Error, Result};
use slotd_protocol::{
    AckEnvelope, CapabilityReport, NodeInfo, OutboundMessage, Packet, PacketType, Pong, Request,
    ShutdownReport,
};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<DaemonState>,
    outbound: Option<UnboundedSender<OutboundMessage>>,
    default_ttl: Option<Duration>,
}

impl Dispatcher {
    /// Creates a dispatcher answering through `outbound`. Without an
    /// outbound channel, packets are still handled but never acknowledged.
    pub fn new(state: Arc<DaemonState>, outbound: Option<UnboundedSender<OutboundMessage>>) -> Self {
        Self {
            state,
            outbound,
            default_ttl: None,
        }
    }

    /// Drain deadline for `GRACEFUL_SHUTDOWN` packets that carry no `ttl`.
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn state(&self) -> &Arc<DaemonState> {
        &self.state
    }

    /// Spawns the handler for `raw`.
    ///
    /// Returns `None` when the packet is dropped without an answer.
    pub fn dispatch(&self, raw: Value) -> Option<JoinHandle<()>> {
        let Some(packet) = Packet::classify(raw) else {
            debug!("dropping packet without a known type");
            return None;
        };

        let state = Arc::clone(&self.state);
        let outbound = self.outbound.clone();
        let default_ttl = self.default_ttl;

        Some(tokio::spawn(async move {
            let result = AssertUnwindSafe(handle(&state, &packet, default_ttl))
                .catch_unwind()
                .await;

            let terminate =
                packet.kind == PacketType::GracefulShutdown && matches!(result, Ok(Ok(_)));
            let ack = match result {
                Ok(Ok(response)) => AckEnvelope::ok(packet.id, response),
                Ok(Err(err)) => {
                    debug!(id = %packet.id, kind = %packet.kind, error = %err, "request failed");
                    AckEnvelope::from_error(packet.id, &err)
                }
                Err(panic) => {
                    let message = payload_message(panic.as_ref());
                    warn!(id = %packet.id, kind = %packet.kind, %message, "handler panicked");
                    AckEnvelope::error(packet.id, message, None)
                }
            };
            send(outbound.as_ref(), ack.into());

            // The ACK is already queued; the writer flushes it before exit.
            if terminate {
                state.shutdown.terminate();
            }
        }))
    }
}

async fn handle(
    state: &DaemonState,
    packet: &Packet,
    default_ttl: Option<Duration>,
) -> Result<Value> {
    let request = packet
        .request()
        .map_err(|err| Error::InvalidRequest(err.to_string()))?;
    debug!(id = %packet.id, kind = %packet.kind, "handling packet");

    match request {
        Request::Deploy { digest, source } => {
            let digest = state.deploy(digest, &source.into_string()).await?;
            Ok(json!(digest))
        }
        Request::Invoke { digest, context } => state.invoke(&digest, context).await,
        Request::Undeploy { digest } => Ok(json!(state.undeploy(digest).await)),
        Request::ExpandSandbox { source } => {
            let registered = state.expand_sandbox(&source.into_string()).await?;
            Ok(Value::Bool(registered))
        }
        Request::SetConfig { config } => {
            let capabilities = state.set_config(config).await;
            Ok(json!(CapabilityReport { capabilities }))
        }
        Request::GetInfo {} => Ok(json!(NodeInfo::current())),
        Request::GracefulShutdown { ttl } => {
            let deadline = ttl.map(Duration::from_millis).or(default_ttl);
            let outcome = state.graceful_shutdown(deadline).await;
            Ok(json!(ShutdownReport {
                drained: outcome.drained
            }))
        }
        Request::Ping {} => Ok(json!(Pong::default())),
    }
}

fn send(outbound: Option<&UnboundedSender<OutboundMessage>>, message: OutboundMessage) {
    match outbound {
        Some(tx) => {
            if tx.send(message).is_err() {
                debug!("outbound channel closed; dropping message");
            }
        }
        None => debug!("no outbound channel; dropping message"),
    }
}
