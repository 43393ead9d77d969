//! Error types for vproxy-rs

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vproxy-rs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Input bytes are truncated or carry a malformed field.
    ///
    /// The message names the field that could not be read, so it can be
    /// logged as-is when the packet is dropped.
    #[error("{0}")]
    Decode(String),

    /// Malformed DNS content
    #[error("invalid dns packet: {0}")]
    InvalidDns(String),

    /// Field values that cannot be encoded into a valid packet
    #[error("cannot encode packet: {0}")]
    Encode(String),

    /// Access outside a byte view
    #[error("index out of bounds: offset={offset}, width={width}, len={len}")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },

    /// Operation is not supported on this packet type
    #[error("operation not supported: {0}")]
    NotImplemented(String),
}

impl Error {
    /// Create a decode error with a custom message
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Error::Decode(msg.into())
    }

    /// Create a DNS error with a custom message
    pub fn invalid_dns<S: Into<String>>(msg: S) -> Self {
        Error::InvalidDns(msg.into())
    }

    /// Create an encode error with a custom message
    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Error::Encode(msg.into())
    }

    /// Create an unsupported-operation error
    pub fn not_implemented<S: Into<String>>(msg: S) -> Self {
        Error::NotImplemented(msg.into())
    }

    /// Whether the error was caused by untrusted input rather than a caller bug
    pub fn is_input_error(&self) -> bool {
        matches!(self, Error::Decode(_) | Error::InvalidDns(_))
    }
}
