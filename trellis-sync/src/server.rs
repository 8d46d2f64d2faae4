//! WebSocket sync server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                   ┌── StateStore (Arc<BoardSnapshot>)
//!            ├── connection ──► MutationResolver ──► SnapshotStore (RocksDB)
//! Client B ──┘    loops              │
//!                                    ▼
//!                             BroadcastChannel
//!                       ┌────────────┼────────────┐
//!                       ▼            ▼            ▼
//!                    Client A     Client B     Client C
//! ```
//!
//! Each connection runs one `select!` loop over its socket, the broadcast
//! receiver it gets on `join`, a heartbeat timer and the shutdown signal.
//! The HTTP boundary (see [`crate::http`]) runs beside it on the same
//! [`Engine`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::{self, Message};
use trellis_core::{BoardError, ChatDraft};

use crate::broadcast::{stopped, Event};
use crate::config::ServerConfig;
use crate::engine::{Engine, EngineError};
use crate::protocol::{ClientMessage, ErrorBody, ProtocolError, ServerMessage, Topic};
use crate::session::SessionInfo;

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub decode_failures: u64,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    engine: Engine,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a server for `config`, opening storage and recovering the
    /// persisted board if a storage path is set.
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let engine = Engine::open(&config).await?;
        Ok(Self::with_engine(config, engine))
    }

    pub fn with_engine(config: ServerConfig, engine: Engine) -> Self {
        Self {
            config,
            engine,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Bind both listeners and serve until the engine is shut down.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.start().await?.wait().await;
        Ok(())
    }

    /// Bind both listeners and serve in background tasks.
    ///
    /// Port 0 in either address picks a free port; the handle reports the
    /// bound addresses.
    pub async fn start(&self) -> Result<ServerHandle, ServerError> {
        let ws_listener = TcpListener::bind(&self.config.bind_addr).await?;
        let ws_addr = ws_listener.local_addr()?;
        log::info!("Sync server listening on {ws_addr}");

        let mut tasks = Vec::new();
        let mut http_addr = None;
        if let Some(addr) = &self.config.http_addr {
            let listener = TcpListener::bind(addr).await?;
            let bound = listener.local_addr()?;
            http_addr = Some(bound);
            log::info!("HTTP API listening on {bound}");

            let engine = self.engine.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = crate::http::serve(listener, engine).await {
                    log::error!("HTTP server error: {e}");
                }
            }));
        }

        let engine = self.engine.clone();
        let config = self.config.clone();
        let stats = self.stats.clone();
        tasks.push(tokio::spawn(async move {
            accept_loop(ws_listener, engine, config, stats).await;
        }));

        Ok(ServerHandle {
            ws_addr,
            http_addr,
            engine: self.engine.clone(),
            stats: self.stats.clone(),
            tasks,
        })
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// A running server.
pub struct ServerHandle {
    pub ws_addr: SocketAddr,
    pub http_addr: Option<SocketAddr>,
    engine: Engine,
    stats: Arc<RwLock<ServerStats>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.ws_addr)
    }

    pub fn http_url(&self) -> Option<String> {
        self.http_addr.map(|addr| format!("http://{addr}"))
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Wait for the listeners to finish (after [`Engine::shutdown`]).
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("Server task failed: {e}");
            }
        }
    }

    /// Stop the engine and wait for the listeners to close.
    pub async fn shutdown(self) {
        self.engine.shutdown();
        self.wait().await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    engine: Engine,
    config: ServerConfig,
    stats: Arc<RwLock<ServerStats>>,
) {
    let shutdown = engine.channel.shutdown_signal();
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::warn!("Failed to accept connection: {e}");
                        continue;
                    }
                };
                log::debug!("New TCP connection from {addr}");

                let engine = engine.clone();
                let config = config.clone();
                let stats = stats.clone();
                connections.spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, engine, config, stats).await {
                        log::error!("Connection error from {addr}: {e}");
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = stopped(shutdown.clone()) => {
                log::info!("Sync server on {:?} shutting down", listener.local_addr().ok());
                break;
            }
        }
    }

    // Every connection loop sees the same signal and closes its socket.
    while connections.join_next().await.is_some() {}
}

/// Per-connection state the select loop threads through.
struct Connection {
    addr: SocketAddr,
    engine: Engine,
    session: Option<SessionInfo>,
    events: Option<Receiver<Arc<Event>>>,
    /// Version of the newest board this client has been sent.
    floor: u64,
}

impl Connection {
    fn new(addr: SocketAddr, engine: Engine) -> Self {
        Self {
            addr,
            engine,
            session: None,
            events: None,
            floor: 0,
        }
    }

    fn session_id(&self) -> Option<uuid::Uuid> {
        self.session.as_ref().map(|s| s.session_id)
    }

    /// Handle one client frame and produce the direct reply, if any.
    async fn dispatch(&mut self, msg: ClientMessage) -> Option<ServerMessage> {
        match msg {
            ClientMessage::Join { user } => Some(self.join(user).await),
            ClientMessage::Fetch => {
                let snapshot = self.engine.snapshot().await;
                self.floor = self.floor.max(snapshot.version);
                Some(ServerMessage::Snapshot {
                    version: snapshot.version,
                    board: snapshot.board.clone(),
                })
            }
            ClientMessage::Intent { request_id, intent } => {
                if self.session.is_none() {
                    return Some(not_joined(Some(request_id)));
                }
                match self.engine.submit(self.session_id(), intent).await {
                    Ok(commit) => Some(ServerMessage::Ack {
                        request_id,
                        version: commit.version(),
                        committed: commit.is_applied(),
                    }),
                    Err(e) => Some(ServerMessage::rejected(Some(request_id), &e)),
                }
            }
            ClientMessage::Chat { id, text, user } => {
                let Some(session) = &self.session else {
                    return Some(not_joined(None));
                };
                let draft = ChatDraft {
                    id,
                    text,
                    user: user.or_else(|| Some(session.user.clone())),
                };
                match self.engine.post_chat(self.session_id(), draft).await {
                    Ok(_) => None,
                    Err(e) => Some(ServerMessage::rejected(None, &e)),
                }
            }
            ClientMessage::Ping => Some(ServerMessage::Pong),
        }
    }

    /// Register, subscribe, then read the snapshot: anything committed after
    /// the subscription is either in that snapshot or still in the receiver.
    async fn join(&mut self, user: String) -> ServerMessage {
        if self.session.is_some() {
            let e = BoardError::MalformedInput("already joined".into());
            return ServerMessage::rejected(None, &e);
        }
        let info = match self.engine.sessions.register(user).await {
            Ok(info) => info,
            Err(e) => {
                log::warn!("Refused join from {}: {e}", self.addr);
                return ServerMessage::Rejected {
                    request_id: None,
                    error: ErrorBody::new("session_limit", e.to_string()),
                };
            }
        };
        let events = match self.engine.channel.subscribe() {
            Ok(rx) => rx,
            Err(e) => {
                self.engine.sessions.unregister(&info.session_id).await;
                return ServerMessage::Rejected {
                    request_id: None,
                    error: ErrorBody::new("unavailable", e.to_string()),
                };
            }
        };
        let snapshot = self.engine.snapshot().await;

        log::info!("{} ({}) joined from {} at v{}", info.user, info.session_id, self.addr, snapshot.version);
        self.floor = snapshot.version;
        self.events = Some(events);
        let session_id = info.session_id;
        self.session = Some(info);

        ServerMessage::Welcome {
            session_id,
            version: snapshot.version,
            board: snapshot.board.clone(),
        }
    }

    async fn leave(&mut self) {
        self.events = None;
        if let Some(info) = self.session.take() {
            self.engine.sessions.unregister(&info.session_id).await;
            log::info!("{} ({}) left", info.user, info.session_id);
        }
    }
}

fn not_joined(request_id: Option<u64>) -> ServerMessage {
    ServerMessage::Rejected {
        request_id,
        error: ErrorBody::new("not_joined", "send a join frame first"),
    }
}

async fn next_event(events: &mut Option<Receiver<Arc<Event>>>) -> Result<Arc<Event>, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        // No receiver before join: wait forever.
        None => std::future::pending().await,
    }
}

async fn send<S>(sink: &mut S, msg: &ServerMessage) -> Result<(), ServerError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = msg.encode()?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    engine: Engine,
    config: ServerConfig,
    stats: Arc<RwLock<ServerStats>>,
) -> Result<(), ServerError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    log::info!("WebSocket connection established from {addr}");

    {
        let mut s = stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let shutdown = engine.channel.shutdown_signal();
    let heartbeat_period = Duration::from_secs(config.heartbeat_interval_secs);
    // Zero disables the heartbeat, as does a period too long to schedule.
    let mut heartbeat = tokio::time::Instant::now()
        .checked_add(heartbeat_period)
        .filter(|_| !heartbeat_period.is_zero())
        .map(|start| tokio::time::interval_at(start, heartbeat_period));
    let mut conn = Connection::new(addr, engine);

    let result = async {
        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += text.len() as u64;
                            }
                            match ClientMessage::decode(text.as_str()) {
                                Ok(client_msg) => {
                                    if let Some(reply) = conn.dispatch(client_msg).await {
                                        send(&mut ws_sender, &reply).await?;
                                    }
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                    stats.write().await.decode_failures += 1;
                                    let reply = ServerMessage::rejected(None, &BoardError::MalformedInput(e.to_string()));
                                    send(&mut ws_sender, &reply).await?;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Binary(_))) => {
                            log::warn!("Ignoring binary frame from {addr}");
                        }
                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }
                        _ => {}
                    }
                }
                event = next_event(&mut conn.events) => {
                    match event {
                        Ok(event) => {
                            if event.delivers_to(conn.session_id(), conn.floor) {
                                if event.topic == Topic::BoardUpdated {
                                    conn.floor = event.version;
                                }
                                ws_sender.send(Message::Text(event.frame.to_string().into())).await?;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            log::warn!("Session {:?} lagged by {n} events, resyncing", conn.session_id());
                            conn.engine.channel.record_lag();
                            let snapshot = conn.engine.snapshot().await;
                            conn.floor = snapshot.version;
                            let resync = ServerMessage::Snapshot {
                                version: snapshot.version,
                                board: snapshot.board.clone(),
                            };
                            send(&mut ws_sender, &resync).await?;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                _ = async {
                    match heartbeat.as_mut() {
                        Some(timer) => { timer.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    ws_sender.send(Message::Ping(Default::default())).await?;
                }
                _ = stopped(shutdown.clone()) => {
                    log::debug!("Closing connection from {addr}: server stopping");
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        Ok::<(), ServerError>(())
    }
    .await;

    conn.leave().await;
    {
        let mut s = stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{CardId, Intent, ListId};

    fn conn() -> Connection {
        let engine = Engine::in_memory(&ServerConfig::ephemeral());
        Connection::new("127.0.0.1:1".parse().unwrap(), engine)
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = SyncServer::new(ServerConfig::default()).await.unwrap();
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
        assert!(server.engine().snapshots().is_none());
        assert_eq!(server.stats().await, ServerStats::default());
    }

    #[tokio::test]
    async fn test_server_with_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            storage_path: Some(dir.path().join("db")),
            ..ServerConfig::ephemeral()
        };
        let server = SyncServer::new(config).await.unwrap();
        assert!(server.engine().snapshots().is_some());
    }

    #[tokio::test]
    async fn test_join_sends_welcome_and_subscribes() {
        let mut conn = conn();
        let reply = conn.dispatch(ClientMessage::Join { user: "Alice".into() }).await.unwrap();
        match reply {
            ServerMessage::Welcome { version, .. } => assert_eq!(version, 0),
            other => panic!("expected welcome, got {other:?}"),
        }
        assert!(conn.events.is_some());
        assert_eq!(conn.engine.sessions.count().await, 1);

        let again = conn.dispatch(ClientMessage::Join { user: "Alice".into() }).await.unwrap();
        assert!(matches!(again, ServerMessage::Rejected { .. }));

        conn.leave().await;
        assert_eq!(conn.engine.sessions.count().await, 0);
    }

    #[tokio::test]
    async fn test_intent_requires_join() {
        let mut conn = conn();
        let intent = Intent::InsertList { list_id: None, title: "Todo".into() };
        let reply = conn.dispatch(ClientMessage::Intent { request_id: 1, intent }).await.unwrap();
        match reply {
            ServerMessage::Rejected { request_id, error } => {
                assert_eq!(request_id, Some(1));
                assert_eq!(error.kind, "not_joined");
            }
            other => panic!("expected rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_intent_ack_and_reject() {
        let mut conn = conn();
        conn.dispatch(ClientMessage::Join { user: "Alice".into() }).await;

        let insert = Intent::InsertList { list_id: Some(ListId(1)), title: "Todo".into() };
        let reply = conn.dispatch(ClientMessage::Intent { request_id: 1, intent: insert }).await;
        assert_eq!(reply, Some(ServerMessage::Ack { request_id: 1, version: 1, committed: true }));

        let stale = Intent::move_card(CardId(5), ListId(1), 0, ListId(1), 0);
        let reply = conn.dispatch(ClientMessage::Intent { request_id: 2, intent: stale }).await.unwrap();
        match reply {
            ServerMessage::Rejected { request_id, error } => {
                assert_eq!(request_id, Some(2));
                assert_eq!(error.kind, "stale_reference");
            }
            other => panic!("expected rejected, got {other:?}"),
        }

        // The originator receives its own commit on the board topic.
        let event = conn.events.as_mut().unwrap().try_recv().unwrap();
        assert!(event.delivers_to(conn.session_id(), conn.floor));
    }

    #[tokio::test]
    async fn test_join_floor_skips_older_events() {
        let mut conn = conn();
        let engine = conn.engine.clone();
        conn.dispatch(ClientMessage::Join { user: "Bob".into() }).await;

        engine
            .submit(None, Intent::InsertList { list_id: Some(ListId(1)), title: "A".into() })
            .await
            .unwrap();
        let reply = conn.dispatch(ClientMessage::Fetch).await.unwrap();
        assert!(matches!(reply, ServerMessage::Snapshot { version: 1, .. }));

        // The buffered v1 event is already covered by the fetched snapshot.
        let event = conn.events.as_mut().unwrap().try_recv().unwrap();
        assert!(!event.delivers_to(conn.session_id(), conn.floor));
    }

    #[tokio::test]
    async fn test_chat_defaults_to_session_user() {
        let mut conn = conn();
        conn.dispatch(ClientMessage::Join { user: "Carol".into() }).await;
        let reply = conn
            .dispatch(ClientMessage::Chat { id: None, text: "hello".into(), user: None })
            .await;
        assert!(reply.is_none());
        let history = conn.engine.store.chat_history().await;
        assert_eq!(history[0].user, "Carol");
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let mut conn = conn();
        assert_eq!(conn.dispatch(ClientMessage::Ping).await, Some(ServerMessage::Pong));
    }

    #[tokio::test]
    async fn test_start_reports_bound_ports() {
        let server = SyncServer::with_engine(
            ServerConfig::ephemeral(),
            Engine::in_memory(&ServerConfig::ephemeral()),
        );
        let handle = server.start().await.unwrap();
        assert_ne!(handle.ws_addr.port(), 0);
        assert!(handle.http_addr.is_some_and(|a| a.port() != 0));
        assert!(handle.ws_url().starts_with("ws://127.0.0.1:"));

        tokio::time::timeout(Duration::from_secs(2), handle.shutdown()).await.unwrap();
    }
}
