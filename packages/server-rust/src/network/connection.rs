//! Subscriber connections on the `/updates` WebSocket.
//!
//! Each subscriber gets a bounded mpsc channel drained by its own write loop,
//! so a slow reader only ever delays itself. Frames are `Bytes`, encoded once
//! and shared by every subscriber.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::config::ConnectionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Frame queued for a subscriber's write loop.
#[derive(Debug)]
pub enum OutboundMessage {
    /// An encoded `Update`.
    Binary(Bytes),
    /// Close the socket with an optional reason.
    Close(Option<String>),
}

/// Sender side of one subscriber's outbound channel.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    tx: mpsc::Sender<OutboundMessage>,
}

impl ConnectionHandle {
    /// Enqueues without waiting. `false` if the channel is full or the
    /// write loop has exited.
    pub fn try_send(&self, msg: OutboundMessage) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// All live update subscribers, keyed by id.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds a subscriber. The receiver feeds its write loop.
    pub fn register(
        &self,
        config: &ConnectionConfig,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(config.outbound_channel_capacity);
        let handle = Arc::new(ConnectionHandle { id, tx });
        self.connections.insert(id, Arc::clone(&handle));
        (handle, rx)
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.remove(&id).map(|(_, handle)| handle)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Queues `frame` for every subscriber and returns how many took it.
    /// Subscribers with a full channel miss the frame.
    pub fn broadcast(&self, frame: &Bytes) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().try_send(OutboundMessage::Binary(frame.clone())))
            .count()
    }

    /// Removes and returns every subscriber.
    pub fn drain_all(&self) -> Vec<Arc<ConnectionHandle>> {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
