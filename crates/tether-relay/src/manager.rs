//! Local listener that forwards each accepted connection through a tunnel
//!
//! Binds a local port and spawns an independent [`Session`] per accepted
//! connection. A broken session never stops the listener; only bind and
//! accept failures are reported to the caller.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use tether_core::config::RelayConfig;
use tether_core::traits::SessionFactory;
use tether_core::{ServiceTarget, TunnelError};
use tether_protocol::Credential;

use crate::registry::SessionRegistry;
use crate::session::Session;

/// Forwards local ports to remote services
pub struct TunnelManager<F> {
    factory: Arc<F>,
    credential: Credential,
    relay: RelayConfig,
    registry: Arc<SessionRegistry>,
    cancel: CancellationToken,
}

impl<F> Clone for TunnelManager<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            credential: self.credential.clone(),
            relay: self.relay.clone(),
            registry: Arc::clone(&self.registry),
            cancel: self.cancel.clone(),
        }
    }
}

impl<F> TunnelManager<F>
where
    F: SessionFactory,
{
    /// Create a new manager. Cancelling `cancel` stops every accept loop.
    pub fn new(
        factory: F,
        credential: Credential,
        relay: RelayConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory: Arc::new(factory),
            credential,
            relay,
            registry: Arc::new(SessionRegistry::new()),
            cancel,
        }
    }

    /// Live sessions across all forwards of this manager
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Bind `local_host:local_port` and forward every connection to
    /// `service_name:remote_port`.
    ///
    /// `ready` receives the bound address before the first accept. Runs
    /// until the manager is cancelled (`Ok`) or the listener fails (`Err`).
    pub async fn run(
        &self,
        local_host: &str,
        local_port: u16,
        service_name: &str,
        remote_port: u16,
        ready: Option<oneshot::Sender<SocketAddr>>,
    ) -> Result<(), TunnelError> {
        let addr = format!("{}:{}", local_host, local_port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TunnelError::Bind { addr, source })?;

        self.serve(listener, ServiceTarget::new(service_name, remote_port), ready)
            .await
    }

    /// Accept loop over an already bound listener
    pub async fn serve(
        &self,
        listener: TcpListener,
        target: ServiceTarget,
        ready: Option<oneshot::Sender<SocketAddr>>,
    ) -> Result<(), TunnelError> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Forwarding {} to {}", local_addr, target);

        if let Some(ready) = ready {
            let _ = ready.send(local_addr);
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Stopped forwarding {} to {}", local_addr, target);
                    return Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.spawn_session(socket, peer_addr, &target),
                        Err(source) => {
                            tracing::error!("Failed to accept on {}: {}", local_addr, source);
                            return Err(TunnelError::Accept { addr: local_addr, source });
                        }
                    }
                }
            }
        }
    }

    fn spawn_session(&self, socket: TcpStream, peer_addr: SocketAddr, target: &ServiceTarget) {
        let handle = self
            .registry
            .open(peer_addr.to_string(), Some(target.clone()));
        tracing::trace!("{} new connection from {} for {}", handle.id, peer_addr, target);

        let session = Session::new(
            Arc::clone(&handle),
            socket,
            target.clone(),
            self.credential.clone(),
            self.relay.buffer_size,
        );
        let factory = Arc::clone(&self.factory);
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            let _ = session.run(factory.as_ref()).await;
            registry.close(handle.id);
            tracing::trace!("{} finished connection from {}", handle.id, peer_addr);
        });
    }
}
