//! Error types for the transport session
//!
//! None of these ever reach a caller of the public session operations; they are
//! produced internally, logged and absorbed.

use thiserror::Error;

/// Failures of the underlying duplex connection
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// Reading or writing the socket failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be delimited (e.g. line too long)
    #[error("framing error: {0}")]
    Framing(String),

    /// The peer went away while a frame was being written
    #[error("connection closed")]
    Closed,
}

/// Failures while encoding or decoding wire messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON or does not have the envelope shape
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope parsed, but its payload does not match the event type
    #[error("unexpected payload for '{kind}': {reason}")]
    UnexpectedPayload { kind: String, reason: String },
}
