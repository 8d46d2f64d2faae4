//! WebSocket sync client.
//!
//! Provides:
//! - Connection lifecycle (connect, join, disconnect)
//! - Optimistic local application of intents
//! - Wholesale replacement of the local board on every authoritative snapshot
//! - Rollback to the last confirmed snapshot when an intent is rejected
//!
//! There is no offline queue: intents submitted while disconnected fail.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use trellis_core::{Board, BoardError, ChatDraft, ChatMessage, IdGenerator, Intent};

use crate::protocol::{ClientMessage, ErrorBody, ProtocolError, ServerMessage, SessionId};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Socket established, join sent
    Connected,
    /// Server accepted the join
    Joined { session_id: SessionId, version: u64 },
    /// The local board was replaced by an authoritative snapshot
    BoardReplaced { version: u64 },
    /// One of our intents was accepted
    Acked { request_id: u64, version: u64, committed: bool },
    /// One of our requests failed; the local board was rolled back
    Rejected { request_id: Option<u64>, error: ErrorBody },
    /// Chat message from another observer
    Chat(ChatMessage),
    Pong,
    /// Connection lost
    Disconnected,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// The client's copy of the board.
///
/// `board` is what the user sees, including optimistic edits; `confirmed` is
/// the last snapshot the server sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalView {
    pub session_id: Option<SessionId>,
    pub version: u64,
    pub confirmed: Board,
    pub board: Board,
    pub chat: Vec<ChatMessage>,
}

impl LocalView {
    /// Replace the local board with an authoritative snapshot, unless it is
    /// older than the one already held. Returns whether it was adopted.
    pub fn adopt(&mut self, version: u64, board: Board) -> bool {
        if version < self.version {
            return false;
        }
        self.version = version;
        self.confirmed = board.clone();
        self.board = board;
        true
    }

    /// Drop optimistic edits.
    pub fn rollback(&mut self) {
        self.board = self.confirmed.clone();
    }

    pub fn has_pending(&self) -> bool {
        self.board != self.confirmed
    }
}

/// Give inserts that carry no identifier a fresh one, so the optimistic
/// copy and the server agree on it.
fn assign_ids(intent: &mut Intent, board: &Board, ids: &IdGenerator) {
    match intent {
        Intent::InsertList { list_id, .. } if list_id.is_none() => {
            *list_id = Some(ids.next_list_id(board));
        }
        Intent::InsertCard { card_id, .. } if card_id.is_none() => {
            *card_id = Some(ids.next_card_id(board));
        }
        _ => {}
    }
}

/// The sync client.
pub struct SyncClient {
    user: String,
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    view: Arc<RwLock<LocalView>>,
    ids: IdGenerator,
    next_request: AtomicU64,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncClient {
    pub fn new(user: impl Into<String>, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            user: user.into(),
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            view: Arc::new(RwLock::new(LocalView::default())),
            ids: IdGenerator::new(),
            next_request: AtomicU64::new(1),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect and send `join`. Spawns the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing frames, close the socket when the
        // channel is dropped.
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        let join = ClientMessage::Join { user: self.user.clone() }.encode()?;
        out_tx
            .send(join)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        self.outgoing_tx = Some(out_tx);

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;

        // Reader task: apply server frames to the local view.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let view = self.view.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                        Ok(server_msg) => {
                            if let Some(event) = apply_server_message(&view, server_msg).await {
                                let _ = event_tx.send(event).await;
                            }
                        }
                        Err(e) => log::warn!("Failed to decode server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Apply `intent` to the local board and send it. Returns the request id
    /// that the server's `ack` / `rejected` will carry.
    pub async fn submit(&self, mut intent: Intent) -> Result<u64, ClientError> {
        let tx = self.connected_sender().await?;
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        {
            let mut view = self.view.write().await;
            assign_ids(&mut intent, &view.board, &self.ids);
            view.board = intent.apply(&view.board, &self.ids)?;
        }

        let frame = ClientMessage::Intent { request_id, intent }.encode()?;
        if tx.send(frame).await.is_err() {
            self.view.write().await.rollback();
            return Err(ProtocolError::ConnectionClosed.into());
        }
        Ok(request_id)
    }

    /// Post a chat message. It is appended locally because the server does
    /// not echo chat back to its sender.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<ChatMessage, ClientError> {
        let tx = self.connected_sender().await?;
        let draft = ChatDraft::new(text).by(self.user.clone()).with_id(self.ids.next());
        let local = {
            let mut view = self.view.write().await;
            let seq = view.chat.len() as u64;
            let message = draft.clone().accept(seq, 0)?;
            view.chat.push(message.clone());
            message
        };
        tx.send(ClientMessage::chat(draft).encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        Ok(local)
    }

    /// Ask for the current snapshot.
    pub async fn fetch(&self) -> Result<(), ClientError> {
        self.send(ClientMessage::Fetch).await
    }

    pub async fn send_ping(&self) -> Result<(), ClientError> {
        self.send(ClientMessage::Ping).await
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), ClientError> {
        let tx = self.connected_sender().await?;
        tx.send(msg.encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        Ok(())
    }

    async fn connected_sender(&self) -> Result<mpsc::Sender<String>, ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.outgoing_tx.clone().ok_or(ProtocolError::ConnectionClosed)
    }

    /// Close the connection. The reader task reports `Disconnected`.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// The board as the user sees it, optimistic edits included.
    pub async fn board(&self) -> Board {
        self.view.read().await.board.clone()
    }

    /// The last snapshot confirmed by the server.
    pub async fn confirmed(&self) -> Board {
        self.view.read().await.confirmed.clone()
    }

    pub async fn version(&self) -> u64 {
        self.view.read().await.version
    }

    pub async fn chat(&self) -> Vec<ChatMessage> {
        self.view.read().await.chat.clone()
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.view.read().await.session_id
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

async fn apply_server_message(view: &RwLock<LocalView>, msg: ServerMessage) -> Option<SyncEvent> {
    match msg {
        ServerMessage::Welcome { session_id, version, board } => {
            let mut view = view.write().await;
            view.session_id = Some(session_id);
            view.version = version;
            view.confirmed = board.clone();
            view.board = board;
            Some(SyncEvent::Joined { session_id, version })
        }
        ServerMessage::Snapshot { version, board } | ServerMessage::BoardUpdated { version, board } => {
            let adopted = view.write().await.adopt(version, board);
            adopted.then_some(SyncEvent::BoardReplaced { version })
        }
        ServerMessage::ChatMessage { message } => {
            view.write().await.chat.push(message.clone());
            Some(SyncEvent::Chat(message))
        }
        ServerMessage::Ack { request_id, version, committed } => {
            Some(SyncEvent::Acked { request_id, version, committed })
        }
        ServerMessage::Rejected { request_id, error } => {
            // Frame-level errors carry no request id and say nothing about pending edits.
            if request_id.is_some() {
                view.write().await.rollback();
            }
            Some(SyncEvent::Rejected { request_id, error })
        }
        ServerMessage::Pong => Some(SyncEvent::Pong),
    }
}
