//! Core trait definitions

mod auth;
mod session;

pub use auth::{AllowAll, CredentialValidator, StaticTokens};
pub use session::{FrameSink, FrameSource, RemoteSession, SessionFactory};
