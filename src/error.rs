//! Network level errors.
//!
//! Provides the error type for framing and decoding protocol messages
//! exchanged between trading peers.
//!
use std::error::Error;

/// Network-related errors that can occur while encoding or decoding messages.
///
/// Encapsulates errors from:
/// - CBOR serialization
/// - Frame size limits
#[derive(Debug)]
pub enum NetError {
    /// Frame declared a payload bigger than the allowed maximum.
    MessageTooLarge {
        /// Declared length of the payload.
        length: u32,
        /// Maximum accepted length.
        max: u32,
    },
    /// Frame length prefix doesn't match the payload.
    TruncatedFrame,
    /// CBOR serialization or deserialization error.
    Cbor(serde_cbor::Error),
}

impl std::fmt::Display for NetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for NetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NetError::Cbor(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_cbor::Error> for NetError {
    fn from(value: serde_cbor::Error) -> Self {
        Self::Cbor(value)
    }
}
