//! gRPC message framing: `[1-byte compression flag][4-byte big-endian
//! length][message]`. A unary direction carries exactly one frame, and the
//! proxy only handles uncompressed frames; anything else fails the call.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Length of the frame prefix.
pub const FRAME_HEADER_LEN: usize = 5;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("body of {0} bytes is shorter than the 5-byte frame prefix")]
    Truncated(usize),
    #[error("compressed frame (flag {0:#04x}) is not supported")]
    Compressed(u8),
    #[error("frame declares {declared} bytes but {actual} follow the prefix")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Strips the frame prefix off a fully-buffered unary body and returns the
/// message bytes.
pub fn decode_frame(body: Bytes) -> Result<Bytes, FramingError> {
    if body.len() < FRAME_HEADER_LEN {
        return Err(FramingError::Truncated(body.len()));
    }
    if body[0] != 0 {
        return Err(FramingError::Compressed(body[0]));
    }
    let declared = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    let message = body.slice(FRAME_HEADER_LEN..);
    if message.len() != declared {
        return Err(FramingError::LengthMismatch {
            declared,
            actual: message.len(),
        });
    }
    Ok(message)
}

/// Prepends a freshly computed frame prefix to a message.
pub fn encode_frame(message: &[u8]) -> Bytes {
    let mut framed = BytesMut::with_capacity(FRAME_HEADER_LEN + message.len());
    framed.put_u8(0);
    framed.put_u32(u32::try_from(message.len()).expect("message exceeds u32 frame length"));
    framed.put_slice(message);
    framed.freeze()
}
