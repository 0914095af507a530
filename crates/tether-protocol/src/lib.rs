//! tether-protocol: Wire protocol for tether stream tunnels
//!
//! A tunnel session carries two independent simplex byte streams over one
//! duplex frame transport. The initiating side opens with a `Header` frame
//! naming the remote service, then both sides exchange `Data` frames and
//! finish their direction with a single `EndOfStream`.

pub mod codec;
pub mod error;
pub mod frame;
pub mod guard;
pub mod message;
pub mod session;

pub use codec::FrameCodec;
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use guard::{Inbound, InboundGuard, Violation};
pub use message::{Credential, Frame, FrameType, TunnelHeader};
pub use session::{SessionId, SessionIdAllocator};
