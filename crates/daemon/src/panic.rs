//! Reporting of panics to the orchestrator.

use slotd_protocol::{OutboundMessage, UncaughtException};
use std::any::Any;
use tokio::sync::mpsc::UnboundedSender;

/// Installs a process-wide panic hook that forwards every panic as an
/// `uncaughtException` message, then runs the previous hook.
///
/// A panic does not stop the daemon: panicking tasks are torn down by the
/// runtime and the dispatcher still answers the packet that caused it.
pub fn install_reporter(outbound: UnboundedSender<OutboundMessage>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let message = payload_message(info.payload());
        let report = match info.location() {
            Some(location) => format!("{message} at {location}"),
            None => message,
        };
        tracing::error!(error = %report, "uncaught panic");
        let _ = outbound.send(UncaughtException::new(report).into());
        previous(info);
    }));
}

/// Extracts the message of a panic payload.
pub fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
