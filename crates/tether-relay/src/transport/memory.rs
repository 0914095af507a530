//! In-process remote sessions backed by channels

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tether_core::traits::{FrameSink, FrameSource, RemoteSession, SessionFactory};
use tether_core::SessionError;
use tether_protocol::{Credential, Frame};

/// Sending half of an in-process session
pub struct MemorySink {
    tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
}

/// Receiving half of an in-process session
pub struct MemorySource {
    rx: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            result = self.tx.send(frame) => result.map_err(|_| SessionError::Closed),
        }
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Frame>, SessionError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            frame = self.rx.recv() => Ok(frame),
        }
    }
}

/// Two connected sessions that cannot be cancelled
pub fn memory_pair(capacity: usize) -> (RemoteSession, RemoteSession) {
    memory_pair_with(capacity, CancellationToken::new(), CancellationToken::new())
}

/// Two connected sessions, each observing its own cancellation token
pub fn memory_pair_with(
    capacity: usize,
    near_cancel: CancellationToken,
    far_cancel: CancellationToken,
) -> (RemoteSession, RemoteSession) {
    let (near_tx, far_rx) = mpsc::channel(capacity);
    let (far_tx, near_rx) = mpsc::channel(capacity);

    let near = RemoteSession::new(
        Box::new(MemorySink {
            tx: near_tx,
            cancel: near_cancel.clone(),
        }),
        Box::new(MemorySource {
            rx: near_rx,
            cancel: near_cancel,
        }),
    );
    let far = RemoteSession::new(
        Box::new(MemorySink {
            tx: far_tx,
            cancel: far_cancel.clone(),
        }),
        Box::new(MemorySource {
            rx: far_rx,
            cancel: far_cancel,
        }),
    );
    (near, far)
}

/// Far end of a session opened through a [`MemoryFactory`]
pub struct MemoryAccept {
    pub session: RemoteSession,
    /// Token the far end observes
    pub cancel: CancellationToken,
}

/// Session factory whose far ends are delivered to an in-process acceptor
pub struct MemoryFactory {
    acceptor: mpsc::Sender<MemoryAccept>,
    capacity: usize,
}

impl MemoryFactory {
    /// Create a factory and the receiver the far ends arrive on
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MemoryAccept>) {
        let (acceptor, accepted) = mpsc::channel(16);
        (Self { acceptor, capacity }, accepted)
    }
}

#[async_trait]
impl SessionFactory for MemoryFactory {
    async fn open(
        &self,
        _credential: &Credential,
        cancel: CancellationToken,
    ) -> Result<RemoteSession, SessionError> {
        let far_cancel = CancellationToken::new();
        let (near, far) = memory_pair_with(self.capacity, cancel, far_cancel.clone());
        let accept = MemoryAccept {
            session: far,
            cancel: far_cancel,
        };
        self.acceptor
            .send(accept)
            .await
            .map_err(|_| SessionError::Connect("in-process acceptor is gone".to_string()))?;
        Ok(near)
    }
}
