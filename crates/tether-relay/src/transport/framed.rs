//! Frames over a byte stream, one stream per session

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use tether_core::traits::{FrameSink, FrameSource, RemoteSession, SessionFactory};
use tether_core::SessionError;
use tether_protocol::{Credential, Frame, FrameCodec};

/// Sending half of a framed session
pub struct FramedSink<T> {
    inner: SplitSink<Framed<T, FrameCodec>, Frame>,
    cancel: CancellationToken,
}

/// Receiving half of a framed session
pub struct FramedSource<T> {
    inner: SplitStream<Framed<T, FrameCodec>>,
    cancel: CancellationToken,
}

#[async_trait]
impl<T> FrameSink for FramedSink<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn send(&mut self, frame: Frame) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            result = self.inner.send(frame) => result.map_err(SessionError::from),
        }
    }
}

#[async_trait]
impl<T> FrameSource for FramedSource<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn recv(&mut self) -> Result<Option<Frame>, SessionError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            next = self.inner.next() => match next {
                Some(Ok(frame)) => Ok(Some(frame)),
                Some(Err(e)) => Err(SessionError::from(e)),
                None => Ok(None),
            },
        }
    }
}

/// Wrap a byte stream as a remote session.
///
/// The underlying stream is released once both halves are dropped.
pub fn framed_session<T>(io: T, cancel: CancellationToken) -> RemoteSession
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (sink, stream) = Framed::new(io, FrameCodec::new()).split();
    RemoteSession::new(
        Box::new(FramedSink {
            inner: sink,
            cancel: cancel.clone(),
        }),
        Box::new(FramedSource {
            inner: stream,
            cancel,
        }),
    )
}

/// Opens one TCP connection to the controller per session.
///
/// The credential travels in the session's `Header` frame, so it is not
/// needed to establish the connection itself.
#[derive(Debug, Clone)]
pub struct TcpSessionFactory {
    address: String,
    connect_timeout: Duration,
}

impl TcpSessionFactory {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }

    /// Controller address sessions are opened to
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl SessionFactory for TcpSessionFactory {
    async fn open(
        &self,
        _credential: &Credential,
        cancel: CancellationToken,
    ) -> Result<RemoteSession, SessionError> {
        let connect = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address));

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            result = connect => result,
        };
        let stream = result
            .map_err(|_| SessionError::Connect(format!("timed out connecting to {}", self.address)))?
            .map_err(|e| SessionError::Connect(format!("{}: {}", self.address, e)))?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY towards {}: {}", self.address, e);
        }

        Ok(framed_session(stream, cancel))
    }
}
