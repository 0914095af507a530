//! Wire layout of a frame header
//!
//! ```text
//! +--------+--------+--------+--------+---------------------+
//! |  type  |   payload length (u24 BE)|  payload ...        |
//! +--------+--------+--------+--------+---------------------+
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::FrameType;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 4;

/// Largest payload the 24-bit length field can describe
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

const LENGTH_BYTES: usize = 3;

/// Type and payload length of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub payload_length: u32,
}

impl FrameHeader {
    pub fn new(frame_type: FrameType, payload_length: u32) -> Self {
        Self {
            frame_type,
            payload_length,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(self.frame_type.as_u8());
        dst.put_uint(u64::from(self.payload_length), LENGTH_BYTES);
    }

    /// Take a header off the front of `src`.
    ///
    /// `Ok(None)` while fewer than [`HEADER_SIZE`] bytes are buffered. An
    /// unknown type byte is an error and leaves `src` untouched.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let frame_type =
            FrameType::from_u8(src[0]).ok_or(ProtocolError::UnknownFrameType(src[0]))?;
        src.advance(1);
        let payload_length = src.get_uint(LENGTH_BYTES) as u32;

        Ok(Some(Self::new(frame_type, payload_length)))
    }
}
