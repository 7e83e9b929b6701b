//! Unit tests for the server lifecycle and dispatch paths

use super::*;
use crate::capability::CapabilityId;
use async_trait::async_trait;
use outpost_proto::{Packet, PacketType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

/// Sink that keeps every message in memory
#[derive(Default)]
struct MemorySink {
    stored: std::sync::Mutex<Vec<String>>,
    printed: std::sync::Mutex<Vec<String>>,
}

impl MemorySink {
    fn printed(&self) -> Vec<String> {
        self.printed.lock().unwrap().clone()
    }

    fn contains(&self, needle: &str) -> bool {
        let printed = self.printed.lock().unwrap();
        let stored = self.stored.lock().unwrap();
        printed.iter().chain(stored.iter()).any(|m| m.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, message: &str) {
        self.printed.lock().unwrap().push(message.to_string());
    }

    fn store(&self, message: &str) -> usize {
        let mut stored = self.stored.lock().unwrap();
        stored.push(message.to_string());
        stored.len()
    }

    fn flush(&self) {
        let drained: Vec<String> = self.stored.lock().unwrap().drain(..).collect();
        self.printed.lock().unwrap().extend(drained);
    }
}

/// Capability that forwards what it sees to the test
struct Recorder {
    packets: mpsc::UnboundedSender<(ClientId, Packet)>,
    active: std::sync::Mutex<Option<Arc<Connection>>>,
    notifications: std::sync::Mutex<Vec<Option<ClientId>>>,
    closed: AtomicBool,
}

impl Recorder {
    const ECHO: PacketType = PacketType(3);
    const FAIL: PacketType = PacketType(5);
    const RELAY_TO_CLOSED: PacketType = PacketType(6);

    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(ClientId, Packet)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Self {
            packets: tx,
            active: std::sync::Mutex::new(None),
            notifications: std::sync::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        (recorder, rx)
    }

    fn notifications(&self) -> Vec<Option<ClientId>> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl Capability for Recorder {
    fn id(&self) -> CapabilityId {
        CapabilityId(7)
    }

    fn name(&self) -> &str {
        "RECORDER"
    }

    fn commands(&self) -> Vec<String> {
        vec!["rec".to_string()]
    }

    fn packet_types(&self) -> Vec<PacketType> {
        vec![Self::ECHO, Self::FAIL, Self::RELAY_TO_CLOSED]
    }

    async fn exec(&self, _command: &str, args: &[String]) -> Result<()> {
        let active = self.active.lock().unwrap().clone();
        let connection = active.ok_or(OutpostError::NoActiveConnection)?;
        let packet = Packet::with_payload(Self::ECHO, format!("{}\r\n", args.join(" ")));
        connection.send_packet(&packet).await
    }

    async fn respond(&self, connection: &Arc<Connection>, packet: Packet) -> Result<()> {
        if packet.packet_type() == Self::FAIL {
            return Err(OutpostError::Capability("boom".to_string()));
        }
        if packet.packet_type() == Self::RELAY_TO_CLOSED {
            let (stream, _peer) = tokio::io::duplex(64);
            let other = Connection::new(stream, PacketCodec::new());
            other.close().await?;
            return other.send_packet(&packet).await;
        }
        let _ = self.packets.send((connection.id(), packet));
        Ok(())
    }

    async fn set_active_connection(&self, connection: Option<Arc<Connection>>) {
        self.notifications
            .lock()
            .unwrap()
            .push(connection.as_ref().map(|c| c.id()));
        *self.active.lock().unwrap() = connection;
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn test_config() -> ServerConfig {
    ServerConfig::default()
        .with_host("127.0.0.1")
        .with_timestamp_format(None)
}

async fn started() -> (
    Server,
    SocketAddr,
    Arc<MemorySink>,
    Arc<Recorder>,
    mpsc::UnboundedReceiver<(ClientId, Packet)>,
) {
    let sink = Arc::new(MemorySink::default());
    let server = Server::new(test_config(), sink.clone()).await.unwrap();
    let (recorder, packets) = Recorder::new();
    server.register(recorder.clone()).await.unwrap();
    let addr = server.startup(0).await.unwrap();
    (server, addr, sink, recorder, packets)
}

async fn wait_for_sessions(server: &Server, count: usize) -> Vec<ClientId> {
    timeout(WAIT, async {
        loop {
            let ids = server.sessions().await;
            if ids.len() == count {
                return ids;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session count never reached")
}

async fn connect(server: &Server, addr: SocketAddr) -> (TcpStream, ClientId) {
    let before = server.sessions().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let after = wait_for_sessions(server, before.len() + 1).await;
    let id = after
        .into_iter()
        .find(|id| !before.contains(id))
        .expect("new session");
    (stream, id)
}

fn frame(packet_type: i32, payload: &[u8]) -> Vec<u8> {
    PacketCodec::new()
        .encode_packet(&Packet::with_payload(PacketType(packet_type), payload))
        .unwrap()
        .to_vec()
}

fn args(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

#[tokio::test]
async fn test_invalid_command() {
    let (server, addr, _sink, _recorder, _packets) = started().await;
    let (_client, id) = connect(&server, addr).await;

    let err = server.exec("badcmd", &[]).await.unwrap_err();
    assert_eq!(err.to_string(), "the command is invalid: badcmd");
    assert_eq!(server.sessions().await, vec![id]);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_empty_command_flushes() {
    let sink = Arc::new(MemorySink::default());
    let server = Server::new(test_config(), sink.clone()).await.unwrap();

    sink.store("queued");
    server.exec("", &[]).await.unwrap();
    assert_eq!(sink.printed(), vec!["queued".to_string()]);
}

#[tokio::test]
async fn test_packet_routed_by_type() {
    let (server, addr, _sink, _recorder, mut packets) = started().await;
    let (mut client, id) = connect(&server, addr).await;

    client.write_all(&frame(3, b"hello, world!")).await.unwrap();

    let (from, packet) = timeout(WAIT, packets.recv()).await.unwrap().unwrap();
    assert_eq!(from, id);
    assert_eq!(packet.packet_type(), PacketType(3));
    assert_eq!(packet.data(), b"hello, world!");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_packet_type_keeps_session() {
    let (server, addr, sink, _recorder, mut packets) = started().await;
    let (mut client, id) = connect(&server, addr).await;

    client.write_all(&frame(99, b"???")).await.unwrap();
    client.write_all(&frame(3, b"after")).await.unwrap();

    let (_, packet) = timeout(WAIT, packets.recv()).await.unwrap().unwrap();
    assert_eq!(packet.data(), b"after");
    assert!(sink.contains("invalid type: 99"));
    assert_eq!(server.sessions().await, vec![id]);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_respond_failure_keeps_session() {
    let (server, addr, sink, _recorder, mut packets) = started().await;
    let (mut client, id) = connect(&server, addr).await;

    client.write_all(&frame(5, b"")).await.unwrap();
    client.write_all(&frame(3, b"still here")).await.unwrap();

    let (_, packet) = timeout(WAIT, packets.recv()).await.unwrap().unwrap();
    assert_eq!(packet.data(), b"still here");
    assert!(sink.contains("boom"));
    assert_eq!(server.sessions().await, vec![id]);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_send_to_other_closed_connection_keeps_session() {
    let (server, addr, sink, _recorder, mut packets) = started().await;
    let (mut client, id) = connect(&server, addr).await;

    client.write_all(&frame(6, b"forward")).await.unwrap();
    client.write_all(&frame(3, b"still here")).await.unwrap();

    let (_, packet) = timeout(WAIT, packets.recv()).await.unwrap().unwrap();
    assert_eq!(packet.data(), b"still here");
    assert!(sink.contains("RECORDER failed to handle a packet"));
    assert!(!sink.contains("is disconnecting"));
    assert_eq!(server.sessions().await, vec![id]);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stream_ends_mid_header() {
    let (server, addr, _sink, _recorder, mut packets) = started().await;
    let (mut client, _id) = connect(&server, addr).await;

    client.write_all(&[3, 0, 0]).await.unwrap();
    client.shutdown().await.unwrap();
    drop(client);

    wait_for_sessions(&server, 0).await;
    assert!(packets.try_recv().is_err());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_notification_removes_session() {
    let (server, addr, sink, _recorder, _packets) = started().await;
    let (mut client, id) = connect(&server, addr).await;

    client
        .write_all(&frame(PacketType::DISCONNECT.value(), b""))
        .await
        .unwrap();

    wait_for_sessions(&server, 0).await;
    assert!(sink.contains(&format!("The client [{}] is disconnecting.", id)));

    let mut buf = [0u8; 1];
    let n = timeout(WAIT, client.read(&mut buf)).await.unwrap().unwrap_or(0);
    assert_eq!(n, 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connect_notification_logged() {
    let (server, addr, sink, _recorder, _packets) = started().await;
    let (mut client, id) = connect(&server, addr).await;

    client
        .write_all(&frame(PacketType::CONNECT.value(), b"desktop-01"))
        .await
        .unwrap();

    let expected = format!("The client [{}] has announced itself: desktop-01", id);
    timeout(WAIT, async {
        while !sink.contains(&expected) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_use_broadcasts_and_exec_sends() {
    let (server, addr, _sink, recorder, _packets) = started().await;
    let (mut client, id) = connect(&server, addr).await;

    let err = server.exec("rec", &args(&["ls"])).await.unwrap_err();
    assert!(matches!(err, OutpostError::NoActiveConnection));

    server.exec("use", &args(&[&id.to_string()])).await.unwrap();
    assert_eq!(server.active_connection().await.map(|c| c.id()), Some(id));
    assert_eq!(recorder.notifications(), vec![Some(id)]);

    server.exec("rec", &args(&["ls"])).await.unwrap();

    let mut received = [0u8; 12];
    timeout(WAIT, client.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&received[..8], &[3, 0, 0, 0, 4, 0, 0, 0]);
    assert_eq!(&received[8..], b"ls\r\n");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_use_rejects_unknown_client() {
    let (server, _addr, _sink, recorder, _packets) = started().await;

    let err = server.exec("use", &args(&["999999"])).await.unwrap_err();
    assert!(matches!(err, OutpostError::InvalidClientId(_)));

    let err = server.exec("use", &args(&["abc"])).await.unwrap_err();
    assert!(matches!(err, OutpostError::InvalidClientId(_)));

    let err = server.exec("use", &[]).await.unwrap_err();
    assert!(matches!(err, OutpostError::InvalidArguments(_)));

    assert!(recorder.notifications().is_empty());
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stale_active_connection_cleared() {
    let (server, addr, sink, recorder, _packets) = started().await;
    let (_client, id) = connect(&server, addr).await;

    server.exec("use", &args(&[&id.to_string()])).await.unwrap();
    server.exec("kick", &args(&[&id.to_string()])).await.unwrap();
    assert!(server.sessions().await.is_empty());

    // The pointer is only checked on the next command cycle.
    assert!(server.active_connection().await.is_some());
    server.exec("", &[]).await.unwrap();
    assert!(server.active_connection().await.is_none());
    assert_eq!(recorder.notifications(), vec![Some(id), None]);
    assert!(sink.contains(&format!("The current client [{}] has become invalid.", id)));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_kick_is_quiet() {
    let (server, addr, sink, _recorder, _packets) = started().await;
    let (_client, id) = connect(&server, addr).await;

    server.exec("kick", &args(&[&id.to_string()])).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    assert!(!sink.contains(&format!("The client [{}] has failed", id)));
    assert!(!sink.contains(&format!("The client [{}] has disconnected.", id)));

    let err = server.exec("kick", &args(&[&id.to_string()])).await.unwrap_err();
    assert!(matches!(err, OutpostError::InvalidClientId(_)));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_list_and_help() {
    let (server, addr, sink, _recorder, _packets) = started().await;
    let (_client, id) = connect(&server, addr).await;

    server.exec("use", &args(&[&id.to_string()])).await.unwrap();
    server.exec("list", &[]).await.unwrap();
    assert!(sink.printed().iter().any(|m| m.starts_with(&format!("[{}] 127.0.0.1:", id)) && m.ends_with(" *")));

    server.exec("help", &[]).await.unwrap();
    assert!(sink.contains("SERVER: exit, help, kick, list, use"));
    assert!(sink.contains("RECORDER: rec"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_exit_requested() {
    let sink = Arc::new(MemorySink::default());
    let server = Server::new(test_config(), sink).await.unwrap();

    let err = server.exec("exit", &[]).await.unwrap_err();
    assert!(matches!(err, OutpostError::ExitRequested));
}

#[tokio::test]
async fn test_builtin_conflicts_rejected() {
    struct Clash;

    #[async_trait]
    impl Capability for Clash {
        fn id(&self) -> CapabilityId {
            CapabilityId(42)
        }
        fn name(&self) -> &str {
            "CLASH"
        }
        fn commands(&self) -> Vec<String> {
            vec!["list".to_string()]
        }
        fn packet_types(&self) -> Vec<PacketType> {
            vec![]
        }
        async fn exec(&self, _command: &str, _args: &[String]) -> Result<()> {
            Ok(())
        }
        async fn respond(&self, _connection: &Arc<Connection>, _packet: Packet) -> Result<()> {
            Ok(())
        }
        async fn set_active_connection(&self, _connection: Option<Arc<Connection>>) {}
    }

    let sink = Arc::new(MemorySink::default());
    let server = Server::new(test_config(), sink).await.unwrap();

    let result = server.register(Arc::new(Clash)).await;
    assert!(matches!(result, Err(OutpostError::ConflictingCommand(c)) if c == "list"));
}

#[tokio::test]
async fn test_startup_twice() {
    let (server, _addr, _sink, _recorder, _packets) = started().await;

    let result = server.startup(0).await;
    assert!(matches!(result, Err(OutpostError::AlreadyStarted)));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_uses_configured_port() {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let server = Server::new(test_config().with_port(port), Arc::new(MemorySink::default()))
        .await
        .unwrap();
    let addr = server.start().await.unwrap();
    assert_eq!(addr.port(), port);
    assert_eq!(server.state().await, ServerState::Listening);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bind_failure() {
    let (server, addr, _sink, _recorder, _packets) = started().await;

    let other = Server::new(test_config(), Arc::new(MemorySink::default()))
        .await
        .unwrap();
    let result = other.startup(addr.port()).await;
    assert!(matches!(result, Err(OutpostError::Bind { .. })));
    assert_eq!(other.state().await, ServerState::Created);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown() {
    let (server, addr, sink, recorder, _packets) = started().await;
    let (mut first, _) = connect(&server, addr).await;
    let (mut second, _) = connect(&server, addr).await;
    assert_eq!(server.state().await, ServerState::Listening);

    timeout(WAIT, server.shutdown()).await.unwrap().unwrap();

    assert_eq!(server.state().await, ServerState::Closed);
    assert!(server.sessions().await.is_empty());
    assert!(server.shared.tasks.is_empty());
    assert!(recorder.closed.load(Ordering::SeqCst));
    assert!(sink.printed().iter().any(|m| m == "The server has exited."));

    let mut buf = [0u8; 1];
    assert_eq!(first.read(&mut buf).await.unwrap_or(0), 0);
    assert_eq!(second.read(&mut buf).await.unwrap_or(0), 0);
    assert!(TcpStream::connect(addr).await.is_err());

    timeout(WAIT, server.shutdown()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_without_startup() {
    let server = Server::new(test_config(), Arc::new(MemorySink::default()))
        .await
        .unwrap();

    server.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
    assert_eq!(server.state().await, ServerState::Closed);
}
