use super::SandboxId;
use std::fmt::Display;

/// Output stream handed to sandboxed source.
///
/// Lines are emitted as tracing events under the `slotd::sandbox` target so
/// that they end up wherever the daemon's logs go.
#[derive(Debug, Clone)]
pub struct OutputStream {
    sandbox: SandboxId,
}

impl OutputStream {
    pub(crate) fn new(sandbox: SandboxId) -> Self {
        Self { sandbox }
    }

    pub fn write(&self, line: impl Display) {
        tracing::info!(target: "slotd::sandbox", sandbox = %self.sandbox, "{line}");
    }

    pub fn error(&self, line: impl Display) {
        tracing::warn!(target: "slotd::sandbox", sandbox = %self.sandbox, "{line}");
    }
}
