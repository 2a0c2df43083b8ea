//! JSON text-frame codec for socket events.
//!
//! Both directions share the same envelope (`{"event", "data"}`), so the
//! client uses [`encode_client`] / [`decode_server`] and the backend uses the
//! mirrored pair [`decode_client`] / [`encode_server`].

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::events::{ClientEvent, ServerEvent};

/// Maximum accepted text frame length in bytes (64 KB).
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The frame exceeds [`MAX_FRAME_LEN`].
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

/// Encodes a client event as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError`] if the event cannot be serialized or is too large.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    encode(event)
}

/// Decodes a JSON text frame pushed by the backend.
///
/// # Errors
///
/// Returns [`CodecError`] for oversized, malformed, or unknown frames.
pub fn decode_server(frame: &str) -> Result<ServerEvent, CodecError> {
    decode(frame)
}

/// Encodes a server event as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError`] if the event cannot be serialized or is too large.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    encode(event)
}

/// Decodes a JSON text frame emitted by a client.
///
/// # Errors
///
/// Returns [`CodecError`] for oversized, malformed, or unknown frames.
pub fn decode_client(frame: &str) -> Result<ClientEvent, CodecError> {
    decode(frame)
}

fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    let frame = serde_json::to_string(value)?;
    check_len(frame.len())?;
    Ok(frame)
}

fn decode<T: DeserializeOwned>(frame: &str) -> Result<T, CodecError> {
    check_len(frame.len())?;
    Ok(serde_json::from_str(frame)?)
}

fn check_len(size: usize) -> Result<(), CodecError> {
    if size > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            size,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(())
}
