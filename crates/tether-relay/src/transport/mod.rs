//! Remote session transports
//!
//! `framed` carries frames over one TCP connection per session to a
//! controller. `memory` connects both ends inside one process.

pub mod framed;
pub mod memory;

pub use framed::{framed_session, TcpSessionFactory};
pub use memory::{memory_pair, memory_pair_with, MemoryAccept, MemoryFactory};
