use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;

use p2p_manager::config::ManagerConfig;
use p2p_manager::network::codec::{Frame, FrameCodec};
use p2p_manager::network::{
    EventType, HostSpec, ManagerEvent, ManagerState, PeerManager, PeerState, SendRequest,
};

const MAGIC: u32 = 0xD9B4BEF9;
const WAIT: Duration = Duration::from_secs(5);

/// A remote peer: greets every connection with `greeting`, answers `ping`
/// with `pong`, reports every frame it receives and closes on EOF.
struct Stub {
    port: u16,
    accepted: Arc<AtomicUsize>,
    received: mpsc::UnboundedReceiver<Frame>,
}

async fn stub(greeting: Vec<Frame>) -> Stub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));
    let (tx, received) = mpsc::unbounded_channel();

    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let greeting = greeting.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, FrameCodec::new(MAGIC));
                for frame in greeting {
                    if framed.send(frame).await.is_err() {
                        return;
                    }
                }
                while let Some(Ok(frame)) = framed.next().await {
                    if frame.command == "ping" {
                        let _ = framed.send(Frame::new("pong", frame.payload.clone())).await;
                    }
                    let _ = tx.send(frame);
                }
            });
        }
    });

    Stub { port, accepted, received }
}

/// A port with nothing listening on it
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn config(min_peers: usize) -> ManagerConfig {
    ManagerConfig {
        listen: false,
        magic: MAGIC,
        min_peers,
        connect_timeout_ms: 2_000,
        ..ManagerConfig::default()
    }
}

async fn wait_for_active(manager: &PeerManager, connected: usize) {
    timeout(WAIT, async {
        loop {
            let peers = manager.peers().await.unwrap();
            if peers.iter().filter(|p| p.state == PeerState::Connected).count() == connected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peers did not connect in time");
}

#[tokio::test]
async fn test_hello_message_reaches_subscribers() {
    let stub = stub(vec![Frame::new("hello", Bytes::from_static(b"world"))]).await;
    let manager = PeerManager::new(config(1));
    let mut hello = manager.subscribe_command("hello");
    let mut messages = manager.subscribe(EventType::Message).await;

    manager.launch(Some(vec![HostSpec::from(("127.0.0.1", stub.port))])).await.unwrap();

    let routed = timeout(WAIT, hello.recv()).await.unwrap().unwrap();
    assert_eq!(&routed.data[..], b"world");
    assert_eq!(routed.addr.port, stub.port);

    match timeout(WAIT, messages.recv()).await.unwrap() {
        Some(ManagerEvent::Message(message)) => {
            assert_eq!(message.command, "hello");
            assert_eq!(message.peer, routed.peer);
        }
        other => panic!("expected message event, got {:?}", other),
    }

    let peer = manager.peers().await.unwrap().remove(0);
    assert_eq!(peer.id, routed.peer);
    assert!(peer.last_seen.is_some());
    assert!(!peer.inbound);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_send_and_await_reply() {
    let mut stub = stub(Vec::new()).await;
    let manager = PeerManager::new(config(1));
    manager.add_pool(vec![("127.0.0.1", stub.port)]).await.unwrap();
    wait_for_active(&manager, 1).await;

    let mut sent = manager
        .send(SendRequest::new("ping", Bytes::from_static(b"\x2a")).expect_reply("pong"))
        .await
        .unwrap();
    assert_eq!(sent.len(), 1);

    let (_, dispatch) = sent.drain().next().unwrap();
    assert!(dispatch.sent);

    let frame = timeout(WAIT, stub.received.recv()).await.unwrap().unwrap();
    assert_eq!(frame.command, "ping");
    assert_eq!(&frame.payload[..], b"\x2a");

    let reply = timeout(WAIT, dispatch.reply.unwrap()).await.unwrap().unwrap();
    assert_eq!(&reply.data[..], b"\x2a");

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_peer_replaced_from_pool() {
    let dead = closed_port().await;
    let stub = stub(vec![Frame::new("hello", Bytes::from_static(b"world"))]).await;
    let manager = PeerManager::new(config(1));
    let mut peer_events = manager.subscribe(EventType::Peer).await;
    let mut hello = manager.subscribe_command("hello");

    manager
        .launch(Some(vec![
            HostSpec::from(("127.0.0.1", dead)),
            HostSpec::from(("127.0.0.1", stub.port)),
        ]))
        .await
        .unwrap();

    match timeout(WAIT, peer_events.recv()).await.unwrap() {
        Some(ManagerEvent::PeerError(_, addr, _)) => assert_eq!(addr.port, dead),
        other => panic!("expected peer error, got {:?}", other),
    }

    let routed = timeout(WAIT, hello.recv()).await.unwrap().unwrap();
    assert_eq!(routed.addr.port, stub.port);
    assert_eq!(manager.pool_size().await.unwrap(), 0);
    assert_eq!(stub.accepted.load(Ordering::SeqCst), 1);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_inbound_peers_are_managed() {
    let manager = PeerManager::new(ManagerConfig {
        listen: true,
        port: 0,
        ..config(0)
    });
    let mut peer_events = manager.subscribe(EventType::Peer).await;
    let mut hello = manager.subscribe_command("hello");

    let addr = manager.launch(None).await.unwrap().expect("listener address");
    assert_eq!(manager.listen_addr().await.unwrap(), Some(addr));

    let stream = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
    let mut client = Framed::new(stream, FrameCodec::new(MAGIC));
    client.send(Frame::new("hello", Bytes::from_static(b"world"))).await.unwrap();

    assert!(matches!(
        timeout(WAIT, peer_events.recv()).await.unwrap(),
        Some(ManagerEvent::ListenConnect(..))
    ));
    let routed = timeout(WAIT, hello.recv()).await.unwrap().unwrap();
    assert_eq!(&routed.data[..], b"world");

    let peer = manager.peers().await.unwrap().remove(0);
    assert!(peer.inbound);
    assert_eq!(peer.state, PeerState::Connected);

    // Our shutdown half-closes; the client sees EOF
    manager.shutdown().await.unwrap();
    assert!(timeout(WAIT, client.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_shutdown_drains_without_new_dials() {
    let stubs = vec![stub(Vec::new()).await, stub(Vec::new()).await, stub(Vec::new()).await, stub(Vec::new()).await];
    let manager = PeerManager::new(config(2));
    let mut notices = manager.subscribe(EventType::Error).await;

    let seeds: Vec<HostSpec> = stubs.iter().map(|s| HostSpec::from(("127.0.0.1", s.port))).collect();
    manager.launch(Some(seeds)).await.unwrap();
    wait_for_active(&manager, 2).await;
    assert_eq!(manager.pool_size().await.unwrap(), 2);

    manager.shutdown().await.unwrap();
    timeout(WAIT, async {
        while manager.active_peer_count().await.unwrap() > 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peers did not close in time");

    sleep(Duration::from_millis(200)).await;
    let status = manager.status().await.unwrap();
    assert_eq!(status.state, ManagerState::Shutdown);
    assert_eq!(status.num_active, 0);
    assert_eq!(status.pool_size, 2);

    let accepted: usize = stubs.iter().map(|s| s.accepted.load(Ordering::SeqCst)).sum();
    assert_eq!(accepted, 2);
    assert!(notices.try_recv().is_err());
}
