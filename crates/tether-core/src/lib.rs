//! tether-core: Shared abstractions and configuration for tether
//!
//! This crate provides the error taxonomy, configuration structures and
//! the traits at the remote-session seam used by the relay and the CLI.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{ConfigError, SessionError, TunnelError};
pub use types::{Direction, ServiceTarget};
