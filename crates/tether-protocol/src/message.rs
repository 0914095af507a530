//! Frame types for the tether protocol
//!
//! # Session Flow
//!
//! 1. The initiating side sends `Header` exactly once, before anything else
//! 2. Both sides send `Data` frames independently of each other
//! 3. Each side finishes its own direction with one `EndOfStream`
//!
//! The two directions are separate simplex streams. An `EndOfStream` from
//! one side says nothing about the other side's direction.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Frame type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Session handshake
    Header = 0x01,
    /// Opaque payload chunk
    Data = 0x02,
    /// Sender has no more data for this direction
    EndOfStream = 0x03,
}

impl FrameType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Header),
            0x02 => Some(Self::Data),
            0x03 => Some(Self::EndOfStream),
            _ => None,
        }
    }
}

/// Authentication credential presented by the initiating side.
///
/// The `Debug` output never contains the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential(String);

impl Credential {
    /// Wrap a token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the raw token
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the credential carries no token at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Credential(<empty>)")
        } else {
            f.write_str("Credential(<redacted>)")
        }
    }
}

/// Handshake identifying the remote service a session is bridged to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelHeader {
    /// Caller's credential
    pub credential: Credential,
    /// Name of the remote service (e.g. "buildkitd")
    pub service_name: String,
    /// Port of the remote service
    pub service_port: u16,
}

impl TunnelHeader {
    /// Create a new handshake header
    pub fn new(credential: Credential, service_name: impl Into<String>, service_port: u16) -> Self {
        Self {
            credential,
            service_name: service_name.into(),
            service_port,
        }
    }
}

/// One protocol message exchanged over a tunnel session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Session handshake, first frame from the initiating side
    Header(TunnelHeader),
    /// Payload chunk
    Data(Bytes),
    /// No more data in the sender's direction
    EndOfStream,
}

impl Frame {
    /// Get the frame type for this frame
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Header(_) => FrameType::Header,
            Frame::Data(_) => FrameType::Data,
            Frame::EndOfStream => FrameType::EndOfStream,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Header(h) => write!(f, "Header({}:{})", h.service_name, h.service_port),
            Frame::Data(data) => write!(f, "Data({} bytes)", data.len()),
            Frame::EndOfStream => f.write_str("EndOfStream"),
        }
    }
}
