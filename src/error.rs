//! Error types for hydra.

use std::io;

use thiserror::Error;

use crate::protocol::TType;

/// Decode-time failures.
///
/// Every variant leaves the stream without usable framing, so the connection
/// answers with an exception envelope and then closes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Envelope version tag missing, mismatched, or rejected in strict mode.
    #[error("bad protocol version: {version:#010x}")]
    BadVersion { version: i32 },

    /// A length field decoded as negative.
    #[error("negative {field} length: {len}")]
    NegativeLength { field: &'static str, len: i32 },

    /// A length field exceeds the configured bound.
    #[error("{field} length {len} exceeds maximum {max}")]
    OversizedField {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// Envelope carries an unknown message type.
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    /// Unknown or unusable wire type tag.
    #[error("invalid type tag: {0}")]
    InvalidType(u8),

    /// The scalar skipper cannot walk composite values.
    #[error("cannot skip composite type {0:?} without a value walker")]
    CompositeSkip(TType),

    /// Nested values go deeper than allowed.
    #[error("value nesting exceeds depth {max}")]
    DepthExceeded { max: usize },

    /// Input ended before a complete value.
    #[error("truncated message")]
    Truncated,
}

/// Main error type for all hydra operations.
#[derive(Debug, Error)]
pub enum HydraError {
    /// I/O error on the listener, poller or a socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed input.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Listener handed to the reactor is unusable.
    #[error("invalid listener: {0}")]
    InvalidListener(String),
}

/// Result type alias using HydraError.
pub type Result<T> = std::result::Result<T, HydraError>;
