//! Controller side of the tunnel
//!
//! Accepts tunnel sessions, waits for the `Header` frame, validates its
//! credential and dials the named service. From then on the service
//! connection plays the role of the local stream and the same bidirectional
//! relay runs as on the client side, except that a client EndOfStream
//! half-closes the service instead of ending the session.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use tether_core::config::{ControllerConfig, RelayConfig};
use tether_core::traits::{CredentialValidator, FrameSource, RemoteSession};
use tether_core::{ServiceTarget, SessionError, TunnelError};
use tether_protocol::{Inbound, InboundGuard};

use crate::registry::{SessionHandle, SessionRegistry, SessionState};
use crate::session::{relay_bidirectional, PeerEnd, RelaySummary};
use crate::transport::{framed_session, MemoryAccept};

struct ControllerInner<V> {
    config: ControllerConfig,
    validator: V,
    buffer_size: usize,
    registry: Arc<SessionRegistry>,
}

/// Terminates tunnel sessions and bridges them to cluster services
pub struct Controller<V> {
    inner: Arc<ControllerInner<V>>,
    cancel: CancellationToken,
}

impl<V> Clone for Controller<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel: self.cancel.clone(),
        }
    }
}

impl<V> Controller<V>
where
    V: CredentialValidator + 'static,
{
    /// Create a new controller. Cancelling `cancel` stops accepting.
    pub fn new(
        config: ControllerConfig,
        validator: V,
        relay: RelayConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                config,
                validator,
                buffer_size: relay.buffer_size,
                registry: Arc::new(SessionRegistry::new()),
            }),
            cancel,
        }
    }

    /// Live sessions on this controller
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    /// Bind the configured address and serve until cancelled
    pub async fn run(&self, ready: Option<oneshot::Sender<SocketAddr>>) -> Result<(), TunnelError> {
        let addr = self.inner.config.bind_address.clone();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TunnelError::Bind { addr, source })?;
        self.serve(listener, ready).await
    }

    /// Accept framed tunnel sessions on an already bound listener
    pub async fn serve(
        &self,
        listener: TcpListener,
        ready: Option<oneshot::Sender<SocketAddr>>,
    ) -> Result<(), TunnelError> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Controller listening on {}", local_addr);

        if let Some(ready) = ready {
            let _ = ready.send(local_addr);
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Controller shutting down");
                    return Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.spawn_tcp(socket, peer_addr),
                        Err(source) => {
                            tracing::error!("Failed to accept on {}: {}", local_addr, source);
                            return Err(TunnelError::Accept { addr: local_addr, source });
                        }
                    }
                }
            }
        }
    }

    /// Serve sessions opened through an in-process `MemoryFactory`
    pub async fn serve_memory(&self, mut sessions: mpsc::Receiver<MemoryAccept>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                accepted = sessions.recv() => match accepted {
                    Some(accept) => self.spawn_session(accept.session, accept.cancel, "in-process".to_string()),
                    None => return,
                },
            }
        }
    }

    fn spawn_tcp(&self, socket: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }
        let cancel = CancellationToken::new();
        let remote = framed_session(socket, cancel.clone());
        self.spawn_session(remote, cancel, peer_addr.to_string());
    }

    fn spawn_session(&self, remote: RemoteSession, cancel: CancellationToken, peer: String) {
        let inner = Arc::clone(&self.inner);
        let handle = inner.registry.open(peer, None);
        tracing::trace!("{} new tunnel session from {}", handle.id, handle.peer);

        tokio::spawn(async move {
            match accept_session(&inner, &handle, remote, cancel).await {
                Ok(summary) => {
                    tracing::trace!(
                        "{} session from {} done: {:?}",
                        handle.id,
                        handle.peer,
                        summary
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "{} rejected tunnel session from {}: {}",
                        handle.id,
                        handle.peer,
                        e
                    );
                }
            }
            inner.registry.close(handle.id);
        });
    }
}

async fn accept_session<V>(
    inner: &ControllerInner<V>,
    handle: &SessionHandle,
    remote: RemoteSession,
    cancel: CancellationToken,
) -> Result<RelaySummary, SessionError>
where
    V: CredentialValidator,
{
    let id = handle.id;
    let timeout = inner.config.handshake_timeout;
    handle.set_state(SessionState::Handshaking);

    let (sink, mut source) = remote.into_parts();

    let first = tokio::time::timeout(timeout, source.recv())
        .await
        .map_err(|_| SessionError::Rejected("timed out waiting for header".to_string()))??;

    let header = match first.map(|frame| InboundGuard::expecting_header().accept(frame)) {
        Some(Inbound::Header(header)) => header,
        Some(Inbound::Violation(violation)) => return Err(SessionError::Violation(violation)),
        Some(other) => {
            return Err(SessionError::Rejected(format!("unexpected first frame {:?}", other)))
        }
        None => return Err(SessionError::Closed),
    };

    let target = ServiceTarget::new(header.service_name, header.service_port);
    handle.set_target(target.clone());

    inner
        .validator
        .validate(&header.credential, &target)
        .map_err(SessionError::Rejected)?;

    let host = inner
        .config
        .resolve_host(&target.name)
        .ok_or_else(|| SessionError::Rejected(format!("unknown service {}", target.name)))?;

    let stream = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), target.port)))
        .await
        .map_err(|_| SessionError::Connect(format!("timed out dialing {}", target)))?
        .map_err(|e| {
            SessionError::Connect(format!("{} via {}:{}: {}", target, host, target.port, e))
        })?;

    tracing::debug!("{} bridged to {} ({}:{})", id, target, host, target.port);

    Ok(relay_bidirectional(
        handle,
        stream,
        RemoteSession::new(sink, source),
        cancel,
        inner.buffer_size,
        PeerEnd::HalfClose,
    )
    .await)
}
