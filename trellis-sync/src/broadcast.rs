//! Fan-out of committed snapshots and chat messages to every observer.
//!
//! Uses one tokio broadcast channel for both topics. Frames are encoded once
//! at publish time and shared as `Arc<Event>`; each observer's connection
//! loop decides with [`Event::delivers_to`] whether to forward it.
//!
//! Delivery is at-most-once. An observer that falls more than `capacity`
//! events behind gets `Lagged` from its receiver and is resynchronised with
//! the current snapshot by its connection loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use trellis_core::ChatMessage;

use crate::protocol::{ProtocolError, ServerMessage, SessionId, Topic};
use crate::store::BoardSnapshot;

/// One published event with its pre-encoded frame.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: Topic,
    /// Board version for `BoardUpdated`, 0 for chat.
    pub version: u64,
    /// Session whose request produced the event, if any.
    pub origin: Option<SessionId>,
    pub frame: Arc<str>,
}

impl Event {
    /// Whether this event should be forwarded to `session`, which already
    /// holds the board at version `floor`.
    ///
    /// Board updates go to everyone, originator included, as long as they
    /// are newer than what the session has. Chat skips its sender.
    pub fn delivers_to(&self, session: Option<SessionId>, floor: u64) -> bool {
        match self.topic {
            Topic::BoardUpdated => self.version > floor,
            Topic::ChatMessage => self.origin.is_none() || self.origin != session,
        }
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast channel is stopped")]
    ChannelClosed,
    #[error("failed to encode event: {0}")]
    Encode(#[from] ProtocolError),
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub published: u64,
    pub board_events: u64,
    pub chat_events: u64,
    pub lagged_resyncs: u64,
    pub receivers: usize,
}

/// Lock-free counters, read via [`BroadcastChannel::stats`].
#[derive(Default)]
struct AtomicBroadcastStats {
    published: AtomicU64,
    board_events: AtomicU64,
    chat_events: AtomicU64,
    lagged_resyncs: AtomicU64,
}

/// The process-wide real-time channel.
///
/// Created running by [`BroadcastChannel::start`]; [`BroadcastChannel::stop`]
/// refuses further publishes and signals every connection loop to close.
pub struct BroadcastChannel {
    sender: broadcast::Sender<Arc<Event>>,
    capacity: usize,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    stats: AtomicBroadcastStats,
}

impl BroadcastChannel {
    /// Open the channel. `capacity` is the number of events buffered per
    /// observer before it starts lagging.
    pub fn start(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        log::debug!("Broadcast channel started (capacity {capacity})");
        Self {
            sender,
            capacity,
            running: AtomicBool::new(true),
            shutdown,
            stats: AtomicBroadcastStats::default(),
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.shutdown.send_replace(true);
            log::info!("Broadcast channel stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribe a new observer. Events published before this call are not seen.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Arc<Event>>, BroadcastError> {
        if !self.is_running() {
            return Err(BroadcastError::ChannelClosed);
        }
        Ok(self.sender.subscribe())
    }

    /// A receiver that flips to `true` when the channel is stopped.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Publish a committed snapshot on the board topic.
    ///
    /// Returns the number of observers the event was queued for.
    pub fn publish_board(
        &self,
        snapshot: &BoardSnapshot,
        origin: Option<SessionId>,
    ) -> Result<usize, BroadcastError> {
        let frame = ServerMessage::BoardUpdated {
            version: snapshot.version,
            board: snapshot.board.clone(),
        }
        .encode()?;
        let count = self.publish(Event {
            topic: Topic::BoardUpdated,
            version: snapshot.version,
            origin,
            frame: frame.into(),
        })?;
        self.stats.board_events.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    pub fn publish_chat(
        &self,
        message: &ChatMessage,
        origin: Option<SessionId>,
    ) -> Result<usize, BroadcastError> {
        let frame = ServerMessage::ChatMessage {
            message: message.clone(),
        }
        .encode()?;
        let count = self.publish(Event {
            topic: Topic::ChatMessage,
            version: 0,
            origin,
            frame: frame.into(),
        })?;
        self.stats.chat_events.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    fn publish(&self, event: Event) -> Result<usize, BroadcastError> {
        if !self.is_running() {
            return Err(BroadcastError::ChannelClosed);
        }
        let topic = event.topic;
        // No receivers is not an error: nobody is watching yet.
        let count = self.sender.send(Arc::new(event)).unwrap_or(0);
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        log::trace!("Published '{}' to {count} observers", topic.as_str());
        Ok(count)
    }

    /// Count a lagging observer that was resynchronised.
    pub fn record_lag(&self) {
        self.stats.lagged_resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            published: self.stats.published.load(Ordering::Relaxed),
            board_events: self.stats.board_events.load(Ordering::Relaxed),
            chat_events: self.stats.chat_events.load(Ordering::Relaxed),
            lagged_resyncs: self.stats.lagged_resyncs.load(Ordering::Relaxed),
            receivers: self.sender.receiver_count(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Resolves once the watched channel has been stopped (or dropped).
pub async fn stopped(mut signal: watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            return;
        }
    }
}
