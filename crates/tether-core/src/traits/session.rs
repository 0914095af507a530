//! Remote session traits
//!
//! A remote session is split into a send half and a receive half so each
//! relay direction owns exactly one of them. Neither half is shared.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use tether_protocol::{Credential, Frame};

/// Sending half of a remote session
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame. Returns `SessionError::Cancelled` once the session's
    /// cancellation token has fired.
    async fn send(&mut self, frame: Frame) -> Result<(), SessionError>;
}

/// Receiving half of a remote session
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` when the peer ended the session and
    /// `SessionError::Cancelled` once the session's token has fired.
    async fn recv(&mut self) -> Result<Option<Frame>, SessionError>;
}

/// An established remote session
pub struct RemoteSession {
    /// Used only by the local->remote direction
    pub sink: Box<dyn FrameSink>,
    /// Used only by the remote->local direction
    pub source: Box<dyn FrameSource>,
}

impl RemoteSession {
    pub fn new(sink: Box<dyn FrameSink>, source: Box<dyn FrameSource>) -> Self {
        Self { sink, source }
    }

    /// Split into the two role halves
    pub fn into_parts(self) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
        (self.sink, self.source)
    }
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession").finish_non_exhaustive()
    }
}

/// Opens remote sessions towards the controller
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    /// Open a new session.
    ///
    /// The returned halves must observe `cancel`: once it fires, any pending
    /// or later `send`/`recv` returns `SessionError::Cancelled` promptly.
    async fn open(
        &self,
        credential: &Credential,
        cancel: CancellationToken,
    ) -> Result<RemoteSession, SessionError>;
}
