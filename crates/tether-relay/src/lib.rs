//! tether-relay: Relay engine for stream tunnels
//!
//! The client side runs a [`TunnelManager`] that listens on local ports and
//! opens one remote session per accepted connection. The [`Controller`]
//! terminates those sessions, validates the handshake and bridges each one
//! to the requested service. Both sides share the same bidirectional relay;
//! the controller half-closes the service when the client finishes sending.

pub mod controller;
pub mod manager;
pub mod registry;
pub mod relay;
pub mod session;
pub mod transport;

pub use controller::Controller;
pub use manager::TunnelManager;
pub use registry::{SessionHandle, SessionRegistry, SessionState};
pub use relay::{InboundEnd, OutboundEnd};
pub use session::{relay_bidirectional, PeerEnd, RelaySummary, Session};
pub use transport::{framed_session, MemoryFactory, TcpSessionFactory};
