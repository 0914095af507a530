//! Unidirectional relay loops
//!
//! Each session runs one loop per direction. The local->remote loop never
//! reads the local connection itself: a background reader task owns the read
//! half and is handed empty buffers through a one-slot channel, answering
//! through another. That lets the loop abandon an outstanding read the moment
//! the opposite direction finishes. The abandoned reader stays parked in its
//! read until the session closes the local connection, which fires the
//! `closed` token it also watches.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tether_core::traits::{FrameSink, FrameSource};
use tether_core::Direction;
use tether_protocol::{Frame, Inbound, InboundGuard, SessionId};

/// Why the local->remote direction stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundEnd {
    /// Local EOF reached and EndOfStream sent
    EndOfStream,
    /// The opposite direction finished first
    Interrupted,
    /// Local read failed; no EndOfStream was sent
    ReadFailed,
    /// Remote send failed
    SendFailed,
}

/// Why the remote->local direction stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEnd {
    /// Peer sent EndOfStream
    EndOfStream,
    /// Transport reported end of session
    SessionEnded,
    /// Remote session was cancelled
    Cancelled,
    /// Transport receive failed
    ReceiveFailed,
    /// Writing to the local connection failed
    WriteFailed,
}

/// Result of one background read
struct ReadOutcome {
    buf: Vec<u8>,
    result: std::io::Result<usize>,
}

/// Handle to the background reader task
struct LocalReader {
    requests: mpsc::Sender<Vec<u8>>,
    results: mpsc::Receiver<ReadOutcome>,
}

impl LocalReader {
    fn spawn<R>(reader: R, closed: CancellationToken) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (requests, request_rx) = mpsc::channel(1);
        let (result_tx, results) = mpsc::channel(1);
        tokio::spawn(read_loop(reader, request_rx, result_tx, closed));
        Self { requests, results }
    }
}

async fn read_loop<R>(
    mut reader: R,
    mut requests: mpsc::Receiver<Vec<u8>>,
    results: mpsc::Sender<ReadOutcome>,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    while let Some(mut buf) = requests.recv().await {
        let result = tokio::select! {
            _ = closed.cancelled() => break,
            result = reader.read(&mut buf) => result,
        };

        let finished = !matches!(result, Ok(n) if n > 0);
        if results.send(ReadOutcome { buf, result }).await.is_err() || finished {
            break;
        }
    }
    // Dropping `reader` here releases this task's share of the connection
}

/// Copy the local connection into the remote session.
///
/// Reads at most `buffer_size` bytes per `Data` frame. Returns as soon as
/// `done` fires, leaving any outstanding read to the background task.
pub async fn local_to_remote<R>(
    id: SessionId,
    reader: R,
    sink: &mut dyn FrameSink,
    buffer_size: usize,
    done: &CancellationToken,
    closed: CancellationToken,
) -> OutboundEnd
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let direction = Direction::Outbound;
    let mut local = LocalReader::spawn(reader, closed);
    let mut buf = vec![0u8; buffer_size];

    loop {
        if local.requests.send(buf).await.is_err() {
            tracing::debug!("{} {}: local reader exited", id, direction);
            return OutboundEnd::ReadFailed;
        }

        let outcome = tokio::select! {
            _ = done.cancelled() => {
                tracing::trace!("{} {}: abandoning pending read", id, direction);
                return OutboundEnd::Interrupted;
            }
            outcome = local.results.recv() => outcome,
        };

        let Some(outcome) = outcome else {
            tracing::debug!("{} {}: local reader closed", id, direction);
            return OutboundEnd::ReadFailed;
        };
        buf = outcome.buf;

        match outcome.result {
            Ok(0) => {
                tracing::trace!("{} {}: local EOF", id, direction);
                if let Err(e) = sink.send(Frame::EndOfStream).await {
                    if !e.is_cancelled() {
                        tracing::debug!("{} {}: failed to send EndOfStream: {}", id, direction, e);
                    }
                    return OutboundEnd::SendFailed;
                }
                return OutboundEnd::EndOfStream;
            }
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if let Err(e) = sink.send(Frame::Data(chunk)).await {
                    tracing::debug!("{} {}: tunnel send error: {}", id, direction, e);
                    return OutboundEnd::SendFailed;
                }
            }
            Err(e) => {
                tracing::debug!("{} {}: failed to read from local: {}", id, direction, e);
                return OutboundEnd::ReadFailed;
            }
        }
    }
}

/// Copy the remote session into the local connection.
///
/// EndOfStream only ends this loop; nothing is written to the local side
/// for it. Frames that break ordering are logged and skipped.
pub async fn remote_to_local<W>(
    id: SessionId,
    source: &mut dyn FrameSource,
    writer: &mut W,
) -> InboundEnd
where
    W: AsyncWrite + Unpin + Send,
{
    let direction = Direction::Inbound;
    let mut guard = InboundGuard::without_header();

    loop {
        let frame = match source.recv().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::trace!("{} {}: remote session ended", id, direction);
                return InboundEnd::SessionEnded;
            }
            Err(e) if e.is_cancelled() => return InboundEnd::Cancelled,
            Err(e) => {
                tracing::debug!("{} {}: failed to receive on tunnel: {}", id, direction, e);
                return InboundEnd::ReceiveFailed;
            }
        };

        match guard.accept(frame) {
            Inbound::Data(data) => {
                let written = match writer.write_all(&data).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    tracing::debug!("{} {}: failed to write to local: {}", id, direction, e);
                    return InboundEnd::WriteFailed;
                }
            }
            Inbound::End => {
                tracing::trace!("{} {}: remote EndOfStream", id, direction);
                return InboundEnd::EndOfStream;
            }
            Inbound::Header(_) => {
                tracing::error!("{} {}: tunnel protocol error, ignoring Header", id, direction);
            }
            Inbound::Violation(violation) => {
                tracing::error!("{} {}: tunnel protocol error, {}", id, direction, violation);
            }
        }
    }
}
