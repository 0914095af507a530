//! Tokio codec for framed tunnel messages

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, MAX_PAYLOAD_SIZE};
use crate::message::{Frame, FrameType, TunnelHeader};

/// Codec for encoding/decoding tunnel frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_length as usize;

        if src.len() < payload_len {
            src.reserve(payload_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();

        let frame = match header.frame_type {
            FrameType::Header => {
                let header: TunnelHeader = bincode::deserialize(&payload)?;
                Frame::Header(header)
            }
            FrameType::Data => Frame::Data(payload),
            FrameType::EndOfStream => {
                if !payload.is_empty() {
                    return Err(ProtocolError::UnexpectedPayload(payload.len()));
                }
                Frame::EndOfStream
            }
        };

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame_type = frame.frame_type();
        let payload = match frame {
            Frame::Header(header) => Bytes::from(bincode::serialize(&header)?),
            Frame::Data(data) => data,
            Frame::EndOfStream => Bytes::new(),
        };

        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        FrameHeader::new(frame_type, payload.len() as u32).encode(dst);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}
