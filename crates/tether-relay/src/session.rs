//! One forwarded connection
//!
//! A session moves through `Connecting` -> `Handshaking` -> `Relaying` ->
//! `Closed`. The local stream is owned by the session until teardown, which
//! happens exactly once after both relay directions have returned.
//!
//! Shutdown is two-phase. When remote->local finishes it fires `done`, which
//! makes local->remote stop waiting on its reader. When local->remote
//! finishes it cancels the remote session, which unblocks a remote->local
//! receive that would otherwise wait on a peer that vanished.
//!
//! With [`PeerEnd::HalfClose`] a peer EndOfStream does not fire `done`.
//! Instead the local write half is shut down and local->remote keeps going
//! until the local side reaches EOF.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use tether_core::traits::{FrameSink, RemoteSession, SessionFactory};
use tether_core::{ServiceTarget, SessionError};
use tether_protocol::{Credential, Frame, TunnelHeader};

use crate::registry::{SessionHandle, SessionState};
use crate::relay::{self, InboundEnd, OutboundEnd};

/// How each direction of a relayed session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySummary {
    pub outbound: OutboundEnd,
    pub inbound: InboundEnd,
}

/// What a relay does when the peer sends EndOfStream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEnd {
    /// Stop relaying in both directions
    Finish,
    /// Shut down the local write half and keep relaying local->remote
    HalfClose,
}

/// Client side of one accepted local connection
pub struct Session<S> {
    handle: Arc<SessionHandle>,
    stream: S,
    target: ServiceTarget,
    credential: Credential,
    buffer_size: usize,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(
        handle: Arc<SessionHandle>,
        stream: S,
        target: ServiceTarget,
        credential: Credential,
        buffer_size: usize,
    ) -> Self {
        Self {
            handle,
            stream,
            target,
            credential,
            buffer_size,
        }
    }

    /// Run the session to completion.
    ///
    /// Errors are returned only for failures before relaying started; the
    /// local stream has already been closed when this returns either way.
    pub async fn run<F>(self, factory: &F) -> Result<RelaySummary, SessionError>
    where
        F: SessionFactory + ?Sized,
    {
        let Session {
            handle,
            mut stream,
            target,
            credential,
            buffer_size,
        } = self;
        let id = handle.id;

        handle.set_state(SessionState::Connecting);
        let cancel = CancellationToken::new();
        let remote = match factory.open(&credential, cancel.clone()).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::error!("{} failed to establish tunnel to {}: {}", id, target, e);
                close_stream(&mut stream).await;
                return Err(e);
            }
        };

        handle.set_state(SessionState::Handshaking);
        let (mut sink, source) = remote.into_parts();
        let header = TunnelHeader::new(credential, target.name.clone(), target.port);
        if let Err(e) = sink.send(Frame::Header(header)).await {
            tracing::error!("{} failed to send tunnel header for {}: {}", id, target, e);
            cancel.cancel();
            close_stream(&mut stream).await;
            return Err(e);
        }

        tracing::debug!("{} tunnel to {} established", id, target);
        let summary = relay_bidirectional(
            &handle,
            stream,
            RemoteSession::new(sink, source),
            cancel,
            buffer_size,
            PeerEnd::Finish,
        )
        .await;
        Ok(summary)
    }
}

/// Run both relay directions, then close the local stream.
///
/// `remote_cancel` must be the token the remote session observes.
pub async fn relay_bidirectional<S>(
    handle: &SessionHandle,
    stream: S,
    remote: RemoteSession,
    remote_cancel: CancellationToken,
    buffer_size: usize,
    peer_end: PeerEnd,
) -> RelaySummary
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let id = handle.id;
    handle.set_state(SessionState::Relaying);

    let (reader, writer) = tokio::io::split(stream);
    let (mut sink, mut source) = remote.into_parts();
    let done = CancellationToken::new();
    let inbound_finished = CancellationToken::new();
    let closed = CancellationToken::new();

    let inbound = {
        let done = done.clone();
        let inbound_finished = inbound_finished.clone();
        tokio::spawn(async move {
            let mut writer = writer;
            let end = relay::remote_to_local(id, source.as_mut(), &mut writer).await;
            if end == InboundEnd::EndOfStream && peer_end == PeerEnd::HalfClose {
                tracing::trace!("{} peer finished sending, half-closing local", id);
                if let Err(e) = writer.shutdown().await {
                    tracing::debug!("{} local half-close: {}", id, e);
                    done.cancel();
                }
            } else {
                done.cancel();
            }
            inbound_finished.cancel();
            (end, writer)
        })
    };

    let outbound = {
        let closed = closed.clone();
        tokio::spawn(async move {
            let end =
                relay::local_to_remote(id, reader, sink.as_mut(), buffer_size, &done, closed).await;
            if end == OutboundEnd::EndOfStream {
                // Our direction is finished; the other one may still be draining
                inbound_finished.cancelled().await;
            }
            remote_cancel.cancel();
            end
        })
    };

    let (inbound, outbound) = tokio::join!(inbound, outbound);

    let (inbound, writer) = match inbound {
        Ok((end, writer)) => (end, Some(writer)),
        Err(e) => {
            tracing::error!("{} remote->local task failed: {}", id, e);
            (InboundEnd::ReceiveFailed, None)
        }
    };
    let outbound = outbound.unwrap_or_else(|e| {
        tracing::error!("{} local->remote task failed: {}", id, e);
        OutboundEnd::ReadFailed
    });

    // Close the local connection. The reader task drops its half once
    // `closed` fires, even if it is still parked in a read.
    closed.cancel();
    if let Some(mut writer) = writer {
        if let Err(e) = writer.shutdown().await {
            tracing::trace!("{} local shutdown: {}", id, e);
        }
    }

    tracing::debug!(
        "{} finished (local->remote: {:?}, remote->local: {:?})",
        id,
        outbound,
        inbound
    );

    RelaySummary { outbound, inbound }
}

async fn close_stream<S>(stream: &mut S)
where
    S: AsyncWrite + Unpin,
{
    if let Err(e) = stream.shutdown().await {
        tracing::trace!("local shutdown: {}", e);
    }
}
