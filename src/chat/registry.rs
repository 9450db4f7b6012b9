use std::{
    collections::HashMap,
    sync::Mutex,
};

use axum::extract::ws::{Message as WsMessage, Utf8Bytes};
use tokio::sync::mpsc;
use uuid::Uuid;

/// A live connection's handle in a room: an id to leave by and a channel
/// into the task that owns the socket's write half.
#[derive(Clone)]
pub struct Connection {
    id: Uuid,
    tx: mpsc::UnboundedSender<WsMessage>,
}

impl Connection {
    pub fn new(tx: mpsc::UnboundedSender<WsMessage>) -> Self {
        Self {
            id: Uuid::now_v7(),
            tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn send(&self, frame: WsMessage) -> bool {
        self.tx.send(frame).is_ok()
    }
}

/// Room key (conversation id string) to the connections subscribed to it.
///
/// One lock guards the whole map. Sends are non-blocking channel pushes,
/// so the lock is never held across an await.
#[derive(Default)]
pub struct ConnectionRegistry {
    rooms: Mutex<HashMap<String, Vec<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room: &str, connection: Connection) {
        let mut rooms = self.rooms.lock().unwrap();
        rooms.entry(room.to_owned()).or_default().push(connection);
    }

    /// Removes one connection; a no-op if it was never admitted. The room
    /// entry is dropped once its last member leaves.
    pub fn leave(&self, room: &str, connection_id: Uuid) {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(members) = rooms.get_mut(room) {
            members.retain(|c| c.id != connection_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Delivers `payload` to every connection in the room. A dead peer
    /// only loses its own copy; everyone else still receives.
    pub fn broadcast(&self, room: &str, payload: &str) -> usize {
        let rooms = self.rooms.lock().unwrap();
        let Some(members) = rooms.get(room) else {
            return 0;
        };
        let mut delivered = 0;
        for connection in members {
            if connection.send(WsMessage::Text(Utf8Bytes::from(payload.to_owned()))) {
                delivered += 1;
            } else {
                tracing::warn!(room, connection = %connection.id, "send to dead connection skipped");
            }
        }
        delivered
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.lock().unwrap().get(room).map_or(0, Vec::len)
    }
}
