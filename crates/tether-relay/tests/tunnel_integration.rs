//! Tunnel integration tests
//!
//! Runs a forwarding manager against a controller and a plain TCP service,
//! all on loopback, and checks what a local client observes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use tether_core::config::{ControllerConfig, RelayConfig};
use tether_core::traits::{FrameSink, FrameSource, RemoteSession, SessionFactory, StaticTokens};
use tether_core::{ServiceTarget, SessionError};
use tether_protocol::{Credential, Frame};
use tether_relay::transport::memory_pair_with;
use tether_relay::{
    relay_bidirectional, Controller, MemoryFactory, PeerEnd, SessionRegistry, TcpSessionFactory,
    TunnelManager,
};

const TOKEN: &str = "integration-token";
const WAIT: Duration = Duration::from_secs(5);

/// Echo every connection back until the peer half-closes
async fn echo_service() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.into_split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
                let _ = writer.shutdown().await;
            });
        }
    });
    addr
}

/// Write `payload` to every connection in one call, then close
async fn blob_service(payload: Arc<Vec<u8>>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let payload = Arc::clone(&payload);
            tokio::spawn(async move {
                let _ = socket.write_all(&payload).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

fn controller_config() -> ControllerConfig {
    let mut services = HashMap::new();
    services.insert("echo".to_string(), "127.0.0.1".to_string());
    services.insert("blob".to_string(), "127.0.0.1".to_string());
    ControllerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        tokens: vec![TOKEN.to_string()],
        services,
        restrict_services: true,
        handshake_timeout: Duration::from_secs(2),
    }
}

async fn start_controller(
    relay: RelayConfig,
    cancel: CancellationToken,
) -> (SocketAddr, Controller<StaticTokens>) {
    let config = controller_config();
    let validator = StaticTokens::new(config.tokens.clone());
    let controller = Controller::new(config, validator, relay, cancel);

    let (ready_tx, ready_rx) = oneshot::channel();
    let server = controller.clone();
    tokio::spawn(async move { server.run(Some(ready_tx)).await });
    let addr = timeout(WAIT, ready_rx).await.unwrap().unwrap();
    (addr, controller)
}

async fn start_manager<F: SessionFactory>(
    factory: F,
    credential: &str,
    target: ServiceTarget,
    cancel: CancellationToken,
) -> (SocketAddr, TunnelManager<F>) {
    let manager = TunnelManager::new(
        factory,
        Credential::new(credential),
        RelayConfig::default(),
        cancel,
    );

    let (ready_tx, ready_rx) = oneshot::channel();
    let forwarder = manager.clone();
    tokio::spawn(async move {
        forwarder
            .run("127.0.0.1", 0, &target.name, target.port, Some(ready_tx))
            .await
    });
    let addr = timeout(WAIT, ready_rx).await.unwrap().unwrap();
    (addr, manager)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn assert_echo(client: &mut TcpStream, message: &[u8]) {
    client.write_all(message).await.unwrap();
    let mut buf = vec![0u8; message.len()];
    timeout(WAIT, client.read_exact(&mut buf))
        .await
        .expect("timed out waiting for echo")
        .unwrap();
    assert_eq!(buf, message);
}

/// Fails the first session it is asked to open
struct FailingOnceFactory<F> {
    inner: F,
    failed: AtomicBool,
}

impl<F> FailingOnceFactory<F> {
    fn new(inner: F) -> Self {
        Self {
            inner,
            failed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<F: SessionFactory> SessionFactory for FailingOnceFactory<F> {
    async fn open(
        &self,
        credential: &Credential,
        cancel: CancellationToken,
    ) -> Result<RemoteSession, SessionError> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(SessionError::Connect("simulated failure".to_string()));
        }
        self.inner.open(credential, cancel).await
    }
}

#[tokio::test]
async fn test_echo_through_tcp_tunnel() {
    let cancel = CancellationToken::new();
    let echo = echo_service().await;
    let (controller_addr, controller) =
        start_controller(RelayConfig::default(), cancel.clone()).await;
    let factory = TcpSessionFactory::new(controller_addr.to_string(), WAIT);
    let (local, manager) = start_manager(
        factory,
        TOKEN,
        ServiceTarget::new("echo", echo.port()),
        cancel.clone(),
    )
    .await;

    let mut client = TcpStream::connect(local).await.unwrap();
    assert_echo(&mut client, b"hello tether").await;
    assert_echo(&mut client, &[0u8, 1, 2, 255, 254]).await;
    drop(client);

    wait_until(|| manager.registry().closed_total() == 1).await;
    wait_until(|| controller.registry().closed_total() == 1).await;
    assert!(manager.registry().is_empty());

    cancel.cancel();
}

#[tokio::test]
async fn test_half_closed_client_still_gets_reply() {
    let cancel = CancellationToken::new();
    let echo = echo_service().await;
    let (controller_addr, controller) =
        start_controller(RelayConfig::default(), cancel.clone()).await;
    let factory = TcpSessionFactory::new(controller_addr.to_string(), WAIT);
    let (local, manager) = start_manager(
        factory,
        TOKEN,
        ServiceTarget::new("echo", echo.port()),
        cancel.clone(),
    )
    .await;

    // Send the whole request, then stop writing before reading anything
    let mut client = TcpStream::connect(local).await.unwrap();
    client.write_all(b"GET /\r\n\r\n").await.unwrap();
    client.shutdown().await.unwrap();

    let mut response = Vec::new();
    timeout(WAIT, client.read_to_end(&mut response))
        .await
        .expect("echo should finish once the service sees EOF")
        .unwrap();
    assert_eq!(response, b"GET /\r\n\r\n");

    wait_until(|| manager.registry().closed_total() == 1).await;
    wait_until(|| controller.registry().closed_total() == 1).await;

    cancel.cancel();
}

#[tokio::test]
async fn test_connections_are_independent() {
    let cancel = CancellationToken::new();
    let echo = echo_service().await;
    let (controller_addr, _controller) =
        start_controller(RelayConfig::default(), cancel.clone()).await;
    let factory = TcpSessionFactory::new(controller_addr.to_string(), WAIT);
    let (local, manager) = start_manager(
        factory,
        TOKEN,
        ServiceTarget::new("echo", echo.port()),
        cancel.clone(),
    )
    .await;

    let mut first = TcpStream::connect(local).await.unwrap();
    let mut second = TcpStream::connect(local).await.unwrap();
    assert_echo(&mut first, b"first").await;
    assert_echo(&mut second, b"second").await;
    assert_eq!(manager.registry().len(), 2);

    drop(first);
    wait_until(|| manager.registry().closed_total() == 1).await;
    assert_echo(&mut second, b"still here").await;

    cancel.cancel();
}

#[tokio::test]
async fn test_large_response_arrives_intact() {
    let cancel = CancellationToken::new();
    let payload: Arc<Vec<u8>> = Arc::new((0..2 * 1024 * 1024).map(|i| (i % 251) as u8).collect());
    let blob = blob_service(Arc::clone(&payload)).await;
    let (controller_addr, _controller) = start_controller(
        RelayConfig {
            buffer_size: 1024 * 1024,
        },
        cancel.clone(),
    )
    .await;
    let factory = TcpSessionFactory::new(controller_addr.to_string(), WAIT);
    let (local, _manager) = start_manager(
        factory,
        TOKEN,
        ServiceTarget::new("blob", blob.port()),
        cancel.clone(),
    )
    .await;

    let mut client = TcpStream::connect(local).await.unwrap();
    let mut received = Vec::new();
    timeout(WAIT, client.read_to_end(&mut received))
        .await
        .expect("timed out reading response")
        .unwrap();
    assert_eq!(received.len(), payload.len());
    assert!(received == *payload);

    cancel.cancel();
}

#[tokio::test]
async fn test_large_write_is_split_into_frames() {
    let registry = SessionRegistry::new();
    let handle = registry.open("test", None);
    let cancel = CancellationToken::new();
    let (near, far) = memory_pair_with(8, cancel.clone(), CancellationToken::new());
    let (mut service, local) = tokio::io::duplex(4 * 1024 * 1024);

    let payload: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i % 253) as u8).collect();
    service.write_all(&payload).await.unwrap();
    service.shutdown().await.unwrap();

    let relay = tokio::spawn(async move {
        relay_bidirectional(&handle, local, near, cancel, 1024 * 1024, PeerEnd::Finish).await
    });

    let (mut far_sink, mut far_source) = far.into_parts();
    let mut received = Vec::new();
    let mut frames = 0;
    loop {
        let frame = timeout(WAIT, far_source.recv()).await.unwrap().unwrap();
        match frame {
            Some(Frame::Data(data)) => {
                assert!(data.len() <= 1024 * 1024);
                frames += 1;
                received.extend_from_slice(&data);
            }
            Some(Frame::EndOfStream) => break,
            other => panic!("unexpected frame {:?}", other),
        }
    }
    assert!(frames >= 2);
    assert!(received == payload);

    far_sink.send(Frame::EndOfStream).await.unwrap();
    timeout(WAIT, relay).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failed_session_does_not_stop_listener() {
    let cancel = CancellationToken::new();
    let echo = echo_service().await;
    let (controller_addr, _controller) =
        start_controller(RelayConfig::default(), cancel.clone()).await;
    let factory =
        FailingOnceFactory::new(TcpSessionFactory::new(controller_addr.to_string(), WAIT));

    // Ready fires even though the first session will fail
    let (local, manager) = start_manager(
        factory,
        TOKEN,
        ServiceTarget::new("echo", echo.port()),
        cancel.clone(),
    )
    .await;

    let mut doomed = TcpStream::connect(local).await.unwrap();
    let mut buf = [0u8; 1];
    let read = timeout(WAIT, doomed.read(&mut buf))
        .await
        .expect("failed session should close the local socket");
    assert!(matches!(read, Ok(0) | Err(_)));
    wait_until(|| manager.registry().closed_total() == 1).await;

    let mut client = TcpStream::connect(local).await.unwrap();
    assert_echo(&mut client, b"second try").await;

    cancel.cancel();
}

#[tokio::test]
async fn test_simultaneous_end_of_stream_closes_once() {
    let cancel = CancellationToken::new();
    let (factory, mut accepted) = MemoryFactory::new(16);
    let (local, manager) = start_manager(
        factory,
        TOKEN,
        ServiceTarget::new("svc", 80),
        cancel.clone(),
    )
    .await;

    let mut client = TcpStream::connect(local).await.unwrap();
    let accept = timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
    let (mut peer_sink, mut peer_source) = accept.session.into_parts();
    assert!(matches!(
        peer_source.recv().await.unwrap(),
        Some(Frame::Header(_))
    ));

    // Both sides finish at the same time
    let (client_done, peer_done) = tokio::join!(client.shutdown(), peer_sink.send(Frame::EndOfStream));
    client_done.unwrap();
    peer_done.unwrap();

    let mut rest = Vec::new();
    timeout(WAIT, client.read_to_end(&mut rest))
        .await
        .expect("local connection should close")
        .unwrap();
    assert!(rest.is_empty());

    wait_until(|| manager.registry().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.registry().closed_total(), 1);

    cancel.cancel();
}

#[tokio::test]
async fn test_controller_rejects_bad_credential() {
    let cancel = CancellationToken::new();
    let echo = echo_service().await;
    let (controller_addr, controller) =
        start_controller(RelayConfig::default(), cancel.clone()).await;
    let factory = TcpSessionFactory::new(controller_addr.to_string(), WAIT);
    let (local, _manager) = start_manager(
        factory,
        "not-the-token",
        ServiceTarget::new("echo", echo.port()),
        cancel.clone(),
    )
    .await;

    let mut client = TcpStream::connect(local).await.unwrap();
    let mut buf = [0u8; 16];
    let read = timeout(WAIT, client.read(&mut buf))
        .await
        .expect("rejected session should close the local socket");
    assert!(matches!(read, Ok(0) | Err(_)));

    wait_until(|| controller.registry().closed_total() == 1).await;
    cancel.cancel();
}

#[tokio::test]
async fn test_controller_rejects_unlisted_service() {
    let cancel = CancellationToken::new();
    let echo = echo_service().await;
    let (controller_addr, _controller) =
        start_controller(RelayConfig::default(), cancel.clone()).await;
    let factory = TcpSessionFactory::new(controller_addr.to_string(), WAIT);
    let (local, _manager) = start_manager(
        factory,
        TOKEN,
        ServiceTarget::new("localhost", echo.port()),
        cancel.clone(),
    )
    .await;

    let mut client = TcpStream::connect(local).await.unwrap();
    let mut buf = [0u8; 16];
    let read = timeout(WAIT, client.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    cancel.cancel();
}

#[tokio::test]
async fn test_in_process_controller() {
    let cancel = CancellationToken::new();
    let echo = echo_service().await;

    let config = controller_config();
    let validator = StaticTokens::new(config.tokens.clone());
    let controller = Controller::new(config, validator, RelayConfig::default(), cancel.clone());
    let (factory, accepted) = MemoryFactory::new(16);
    {
        let controller = controller.clone();
        tokio::spawn(async move { controller.serve_memory(accepted).await });
    }

    let (local, manager) = start_manager(
        factory,
        TOKEN,
        ServiceTarget::new("echo", echo.port()),
        cancel.clone(),
    )
    .await;

    let mut client = TcpStream::connect(local).await.unwrap();
    assert_echo(&mut client, b"no sockets between us").await;
    let live = controller.registry().list();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].peer, "in-process");
    assert_eq!(
        live[0].target(),
        Some(&ServiceTarget::new("echo", echo.port()))
    );

    drop(client);
    wait_until(|| manager.registry().closed_total() == 1).await;
    wait_until(|| controller.registry().closed_total() == 1).await;

    cancel.cancel();
}
