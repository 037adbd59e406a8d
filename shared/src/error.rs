//! Error types for the wire protocol

use thiserror::Error;

/// Errors that can occur while encoding or decoding frames
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// Frame could not be parsed as an envelope
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Envelope content did not match the command's payload schema
    #[error("Invalid payload for '{command}': {reason}")]
    InvalidPayload {
        /// Command token the payload was sent under
        command: String,
        /// Decoder message
        reason: String,
    },

    /// Value could not be serialized
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// Delivery state outside the closed enumeration
    #[error("Unknown delivery state: {0}")]
    UnknownDeliveryState(u8),
}

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
