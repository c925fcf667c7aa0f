//! Connected WebSocket clients.
//!
//! Each socket gets an unbounded outbox drained by its own task, so messages
//! reach a socket in the order they were broadcast and a slow socket never
//! blocks the broadcaster.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::ws::{CloseFrame, Message, close_code};
use serde::Serialize;
use tokio::sync::mpsc;

/// Identifier of a registered client.
pub(crate) type ClientId = u64;

/// Message pushed to connected browsers.
#[derive(Debug, Serialize)]
pub(crate) struct ReloadMessage<'a> {
    #[serde(rename = "type")]
    pub event_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a serde_json::Value>,
}

/// Set of open client connections.
#[derive(Default)]
pub(crate) struct ClientSet {
    next_id: AtomicU64,
    clients: Mutex<HashMap<ClientId, mpsc::UnboundedSender<Message>>>,
}

impl ClientSet {
    /// Register a new client, returning its id and outbox receiver.
    pub(crate) fn register(&self) -> (ClientId, mpsc::UnboundedReceiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let count = {
            let mut clients = self.lock();
            clients.insert(id, tx);
            clients.len()
        };
        tracing::info!(client = id, total = count, "WebSocket client connected");
        (id, rx)
    }

    /// Remove a client. Unknown ids are ignored.
    pub(crate) fn unregister(&self, id: ClientId) {
        let mut clients = self.lock();
        if clients.remove(&id).is_some() {
            tracing::info!(client = id, remaining = clients.len(), "WebSocket client disconnected");
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Send `text` to every open client. Returns how many accepted it.
    ///
    /// Works on a snapshot of the set; clients whose outbox is closed are
    /// pruned.
    pub(crate) fn broadcast_text(&self, text: &str) -> usize {
        let snapshot: Vec<(ClientId, mpsc::UnboundedSender<Message>)> = self
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in snapshot {
            if tx.send(Message::Text(text.into())).is_ok() {
                delivered += 1;
            } else {
                closed.push(id);
            }
        }

        if !closed.is_empty() {
            let mut clients = self.lock();
            for id in closed {
                clients.remove(&id);
            }
        }
        delivered
    }

    /// Send a Close frame to every client and empty the set.
    pub(crate) fn close_all(&self) {
        let clients: Vec<_> = self.lock().drain().collect();
        for (_, tx) in clients {
            let _ = tx.send(Message::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: "Server shutting down".into(),
            })));
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, mpsc::UnboundedSender<Message>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle for pushing messages to a gateway's clients.
///
/// Sending never blocks, so it can be used from any thread, including file
/// watcher callbacks.
#[derive(Clone)]
pub struct Broadcaster {
    clients: Arc<ClientSet>,
}

impl Broadcaster {
    pub(crate) fn new(clients: Arc<ClientSet>) -> Self {
        Self { clients }
    }

    /// Send `{"type": event_type, "data": data}` to all connected clients.
    ///
    /// Returns the number of clients the message was handed to. Delivery is
    /// best effort: clients that disconnect meanwhile simply miss it.
    pub fn broadcast(&self, event_type: &str, data: Option<&serde_json::Value>) -> usize {
        let message = ReloadMessage { event_type, data };
        match serde_json::to_string(&message) {
            Ok(text) => self.clients.broadcast_text(&text),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize broadcast message");
                0
            }
        }
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
