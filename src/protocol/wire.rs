//! Length-prefixed CBOR framing of [TradeMessage]s.
//!
//! Each frame is a 4 byte big-endian payload length followed by the CBOR encoded message.

use crate::error::NetError;

use super::messages::TradeMessage;

/// Maximum accepted payload size of one frame.
pub const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

/// Encodes a message into one frame.
pub fn encode(message: &TradeMessage) -> Result<Vec<u8>, NetError> {
    let payload = serde_cbor::to_vec(message)?;
    let length = payload.len() as u32;
    if length > MAX_MESSAGE_SIZE {
        return Err(NetError::MessageTooLarge {
            length,
            max: MAX_MESSAGE_SIZE,
        });
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes exactly one frame.
pub fn decode(frame: &[u8]) -> Result<TradeMessage, NetError> {
    if frame.len() < 4 {
        return Err(NetError::TruncatedFrame);
    }
    let (prefix, payload) = frame.split_at(4);
    let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    if length > MAX_MESSAGE_SIZE {
        return Err(NetError::MessageTooLarge {
            length,
            max: MAX_MESSAGE_SIZE,
        });
    }
    if payload.len() != length as usize {
        return Err(NetError::TruncatedFrame);
    }
    Ok(serde_cbor::from_slice(payload)?)
}
