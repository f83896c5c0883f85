//! # Error Types
//!
//! Error handling for the lamp control protocol.
//!
//! Every failure surfaces as a [`ProtocolError`] variant so callers can branch
//! on the exact kind instead of a collapsed "no answer" outcome.
//!
//! ## Error Categories
//! - **Transport**: socket I/O failures, closed connections, timeouts
//! - **Framing**: malformed frames (short, bad prefix, bad suffix, oversized)
//! - **Authentication**: AES-GCM tag mismatch and handshake HMAC mismatch
//! - **Protocol**: unexpected command codes, malformed payloads, handshake ordering
//! - **Configuration**: invalid keys, arguments and config files
//!
//! Framing and authentication failures are deliberately separate variants:
//! a bad tag is a security event, a truncated frame is usually a transport glitch.
//!
//! ## Example Usage
//! ```rust
//! use neurolamp_protocol::error::{FramingError, ProtocolError};
//!
//! let err = ProtocolError::from(FramingError::BadPrefix(0xdead_beef));
//! assert!(err.is_framing());
//! assert!(!err.is_authentication());
//! ```

use crate::protocol::handshake::HandshakeStep;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NOT_CONNECTED: &str = "Session is not connected";
    pub const ERR_TIMEOUT: &str = "Operation timed out";

    /// Cryptographic errors
    pub const ERR_ENCRYPTION_FAILED: &str = "Encryption failed";
    pub const ERR_AUTHENTICATION_FAILED: &str = "AES-GCM authentication tag mismatch";

    /// Handshake-specific errors
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
    pub const ERR_RESPONSE_TOO_SHORT: &str = "Session key response payload shorter than 52 bytes";
    pub const ERR_HMAC_MISMATCH: &str = "Device failed to prove possession of the local key";
    pub const ERR_FINISH_MISMATCH: &str = "Client failed to prove possession of the local key";

    /// Payload errors
    pub const ERR_STATUS_NOT_UTF8: &str = "Status payload is not valid UTF-8";
}

/// Malformed-frame conditions, detected before any decryption is attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Frame too short: need {expected} bytes, got {actual}")]
    ShortFrame { expected: usize, actual: usize },

    #[error("Invalid frame prefix: {0:#010x}")]
    BadPrefix(u32),

    #[error("Invalid frame suffix: {0:02x?}")]
    BadSuffix([u8; 4]),

    #[error("Frame length field too large: {0} bytes")]
    OversizedFrame(usize),
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Session is not connected")]
    NotConnected,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Frame authentication failed")]
    AuthenticationFailed,

    #[error("Handshake authentication failed: {0}")]
    HandshakeAuthFailed(&'static str),

    #[error("Unexpected command: expected {expected}, got {actual}")]
    UnexpectedCommand { expected: u32, actual: u32 },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Handshake failed during {step}: {source}")]
    HandshakeFailed {
        step: HandshakeStep,
        #[source]
        source: Box<ProtocolError>,
    },

    #[error("Handshake step {attempted} called out of order")]
    HandshakeOutOfOrder { attempted: HandshakeStep },

    #[error("Invalid key length: {0} bytes (expected 16 or 32)")]
    InvalidKeyLength(usize),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// True for malformed-frame errors (prefix, suffix, length)
    pub fn is_framing(&self) -> bool {
        match self {
            ProtocolError::Framing(_) => true,
            ProtocolError::HandshakeFailed { source, .. } => source.is_framing(),
            _ => false,
        }
    }

    /// True for security-relevant authentication failures (GCM tag or handshake HMAC)
    pub fn is_authentication(&self) -> bool {
        match self {
            ProtocolError::AuthenticationFailed | ProtocolError::HandshakeAuthFailed(_) => true,
            ProtocolError::HandshakeFailed { source, .. } => source.is_authentication(),
            _ => false,
        }
    }

    pub(crate) fn in_step(self, step: HandshakeStep) -> Self {
        match self {
            already @ ProtocolError::HandshakeFailed { .. } => already,
            other => ProtocolError::HandshakeFailed {
                step,
                source: Box::new(other),
            },
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_failure_keeps_inner_kind() {
        let err = ProtocolError::HandshakeAuthFailed(constants::ERR_HMAC_MISMATCH)
            .in_step(HandshakeStep::VerifyResponse);

        assert!(err.is_authentication());
        assert!(!err.is_framing());
        match err {
            ProtocolError::HandshakeFailed { step, source } => {
                assert_eq!(step, HandshakeStep::VerifyResponse);
                assert!(matches!(*source, ProtocolError::HandshakeAuthFailed(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn wrapping_twice_keeps_first_step() {
        let err = ProtocolError::Timeout
            .in_step(HandshakeStep::Start)
            .in_step(HandshakeStep::Finish);
        assert!(matches!(
            err,
            ProtocolError::HandshakeFailed {
                step: HandshakeStep::Start,
                ..
            }
        ));
    }
}
