//! Frame encoding for the WebSocket transport.
//!
//! One logical JSON message per text frame. The server emits pretty-printed
//! JSON; the protocol tolerates compact input from clients.

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while encoding a frame.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Render a frame for transmission, pretty-printed.
pub fn encode_frame(frame: &Value) -> Result<String, CodecError> {
    serde_json::to_string_pretty(frame).map_err(CodecError::from)
}
