//! Receive-side ordering checks for one direction of a session
//!
//! A misbehaving peer must never be able to crash the receiver. The guard
//! classifies each incoming frame so the caller can log and skip frames
//! that break the session ordering rules instead of acting on them.

use std::fmt;

use bytes::Bytes;

use crate::message::{Frame, TunnelHeader};

/// Ordering rule broken by a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// A non-header frame arrived before the handshake
    MissingHeader,
    /// A second header, or a header on a direction that never expects one
    UnexpectedHeader,
    /// A frame arrived after the peer's EndOfStream
    AfterEndOfStream,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingHeader => f.write_str("expected Header as first frame"),
            Violation::UnexpectedHeader => f.write_str("unexpected Header frame"),
            Violation::AfterEndOfStream => f.write_str("frame received after EndOfStream"),
        }
    }
}

/// Classified inbound frame
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// The session handshake
    Header(TunnelHeader),
    /// Payload to deliver
    Data(Bytes),
    /// Peer finished its direction
    End,
    /// Frame that must be ignored
    Violation(Violation),
}

/// Tracks handshake and end-of-stream state for the frames a peer sends us
#[derive(Debug, Clone)]
pub struct InboundGuard {
    expect_header: bool,
    header_seen: bool,
    ended: bool,
}

impl InboundGuard {
    /// Guard for the accepting side, which must see a `Header` first
    pub fn expecting_header() -> Self {
        Self {
            expect_header: true,
            header_seen: false,
            ended: false,
        }
    }

    /// Guard for the initiating side, which never receives a `Header`
    pub fn without_header() -> Self {
        Self {
            expect_header: false,
            header_seen: false,
            ended: false,
        }
    }

    /// Whether the peer has already sent its EndOfStream
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Classify the next frame from the peer
    pub fn accept(&mut self, frame: Frame) -> Inbound {
        if self.ended {
            return Inbound::Violation(Violation::AfterEndOfStream);
        }

        match frame {
            Frame::Header(header) => {
                if self.expect_header && !self.header_seen {
                    self.header_seen = true;
                    Inbound::Header(header)
                } else {
                    Inbound::Violation(Violation::UnexpectedHeader)
                }
            }
            _ if self.expect_header && !self.header_seen => {
                Inbound::Violation(Violation::MissingHeader)
            }
            Frame::Data(data) => Inbound::Data(data),
            Frame::EndOfStream => {
                self.ended = true;
                Inbound::End
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Credential;

    fn header() -> Frame {
        Frame::Header(TunnelHeader::new(Credential::new("t"), "svc", 80))
    }

    #[test]
    fn test_initiator_side_flow() {
        let mut guard = InboundGuard::without_header();
        assert_eq!(
            guard.accept(Frame::Data(Bytes::from_static(b"x"))),
            Inbound::Data(Bytes::from_static(b"x"))
        );
        assert_eq!(guard.accept(Frame::EndOfStream), Inbound::End);
        assert!(guard.is_ended());
    }

    #[test]
    fn test_data_after_end_is_violation() {
        let mut guard = InboundGuard::without_header();
        assert_eq!(guard.accept(Frame::EndOfStream), Inbound::End);
        assert_eq!(
            guard.accept(Frame::Data(Bytes::from_static(b"late"))),
            Inbound::Violation(Violation::AfterEndOfStream)
        );
        assert_eq!(
            guard.accept(Frame::EndOfStream),
            Inbound::Violation(Violation::AfterEndOfStream)
        );
    }

    #[test]
    fn test_header_on_initiator_side_is_violation() {
        let mut guard = InboundGuard::without_header();
        assert_eq!(
            guard.accept(header()),
            Inbound::Violation(Violation::UnexpectedHeader)
        );
        // Violations do not change state
        assert_eq!(guard.accept(Frame::EndOfStream), Inbound::End);
    }

    #[test]
    fn test_accepting_side_requires_header_first() {
        let mut guard = InboundGuard::expecting_header();
        assert_eq!(
            guard.accept(Frame::Data(Bytes::from_static(b"early"))),
            Inbound::Violation(Violation::MissingHeader)
        );
        assert!(matches!(guard.accept(header()), Inbound::Header(_)));
        assert_eq!(
            guard.accept(header()),
            Inbound::Violation(Violation::UnexpectedHeader)
        );
        assert_eq!(
            guard.accept(Frame::Data(Bytes::from_static(b"ok"))),
            Inbound::Data(Bytes::from_static(b"ok"))
        );
    }
}
