use crate::error::ExecutionError;

/// Raw byte buffer helpers exposed to sandboxes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBytes;

impl RawBytes {
    /// Allocates a zero-filled buffer.
    pub fn alloc(&self, len: usize) -> Vec<u8> {
        vec![0; len]
    }

    pub fn from_text(&self, text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    pub fn to_text(&self, bytes: &[u8]) -> Result<String, ExecutionError> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ExecutionError::new(format!("buffer is not valid UTF-8: {e}")))
    }
}
