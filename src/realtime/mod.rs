use std::collections::{ HashMap, VecDeque };

use chrono::{ DateTime, Utc };
use log::{ info, warn };
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::websocket::ServerMessage;

/// Every admin console instance sits in this room and sees all traffic.
pub const ADMIN_ROOM: &str = "admin-room";

const NOTIFICATION_CAPACITY: usize = 100;

pub type ConnectionId = String;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: String,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: &str, title: &str, body: &str) -> Self {
        Self {
            kind: kind.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, UnboundedSender<ServerMessage>>,
    rooms: HashMap<String, HashMap<ConnectionId, UnboundedSender<ServerMessage>>>,
}

/// Room membership for the real-time layer. Purely derived state: rebuilt
/// from scratch on restart, clients rejoin on reconnect, history fetch is the
/// authoritative source. Constructed once at bootstrap and passed by
/// reference, never ambient.
///
/// Membership lives in this process only; a multi-instance deployment
/// fragments rooms.
pub struct RealtimeHub {
    state: Mutex<HubState>,
    notifications: Mutex<VecDeque<Notification>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            notifications: Mutex::new(VecDeque::new()),
        }
    }

    /// Register a connection's outbound channel and get its id.
    pub async fn register(&self, sender: UnboundedSender<ServerMessage>) -> ConnectionId {
        let connection_id = Uuid::new_v4().to_string();
        let mut state = self.state.lock().await;
        state.connections.insert(connection_id.clone(), sender);
        connection_id
    }

    /// Add a registered connection to a room. Returns false for connections
    /// the hub has never seen (or that already disconnected).
    pub async fn join(&self, connection_id: &str, room: &str) -> bool {
        let mut state = self.state.lock().await;
        let sender = match state.connections.get(connection_id) {
            Some(sender) => sender.clone(),
            None => return false,
        };
        state.rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id.to_string(), sender);
        info!("Connection {} joined room {}", connection_id, room);
        true
    }

    /// Drop a connection from every room it belonged to; empty rooms are
    /// pruned.
    pub async fn disconnect(&self, connection_id: &str) {
        let mut state = self.state.lock().await;
        state.connections.remove(connection_id);
        state.rooms.retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });
    }

    /// Fan a message out to a room, duplicated into the admin room so every
    /// admin console sees all traffic. Best-effort: senders whose receiver is
    /// gone are dropped and logged, never surfaced to the caller.
    pub async fn broadcast(&self, room: &str, message: &ServerMessage) {
        let mut state = self.state.lock().await;
        let mut dead: Vec<ConnectionId> = Vec::new();

        let mut targets = vec![room];
        if room != ADMIN_ROOM {
            targets.push(ADMIN_ROOM);
        }
        for target in targets {
            if let Some(members) = state.rooms.get(target) {
                for (connection_id, sender) in members {
                    if sender.send(message.clone()).is_err() {
                        dead.push(connection_id.clone());
                    }
                }
            }
        }

        for connection_id in dead {
            warn!("Dropping dead connection {}", connection_id);
            state.connections.remove(&connection_id);
            state.rooms.retain(|_, members| {
                members.remove(&connection_id);
                !members.is_empty()
            });
        }
    }

    pub async fn room_size(&self, room: &str) -> usize {
        self.state.lock().await.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// Push onto the bounded admin notification feed; oldest entries fall off.
    pub async fn notify(&self, notification: Notification) {
        let mut notifications = self.notifications.lock().await;
        if notifications.len() == NOTIFICATION_CAPACITY {
            notifications.pop_front();
        }
        notifications.push_back(notification);
    }

    pub async fn recent_notifications(&self) -> Vec<Notification> {
        self.notifications.lock().await.iter().rev().cloned().collect()
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{ unbounded_channel, UnboundedReceiver };

    async fn joined_connection(
        hub: &RealtimeHub,
        room: &str
    ) -> (ConnectionId, UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = unbounded_channel();
        let id = hub.register(tx).await;
        assert!(hub.join(&id, room).await);
        (id, rx)
    }

    fn text_of(message: ServerMessage) -> String {
        match message {
            ServerMessage::Error { message } => message,
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_room_and_admin_room_only() {
        let hub = RealtimeHub::new();
        let (_a, mut in_room) = joined_connection(&hub, "tok_room").await;
        let (_b, mut admin) = joined_connection(&hub, ADMIN_ROOM).await;
        let (_c, mut elsewhere) = joined_connection(&hub, "tok_other").await;

        let msg = ServerMessage::Error { message: "ping".to_string() };
        hub.broadcast("tok_room", &msg).await;

        assert_eq!(text_of(in_room.recv().await.unwrap()), "ping");
        assert_eq!(text_of(admin.recv().await.unwrap()), "ping");
        assert!(elsewhere.try_recv().is_err());
    }

    #[tokio::test]
    async fn admin_room_broadcast_is_not_duplicated() {
        let hub = RealtimeHub::new();
        let (_a, mut admin) = joined_connection(&hub, ADMIN_ROOM).await;

        let msg = ServerMessage::Error { message: "once".to_string() };
        hub.broadcast(ADMIN_ROOM, &msg).await;

        assert!(admin.try_recv().is_ok());
        assert!(admin.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_prunes_empty_rooms() {
        let hub = RealtimeHub::new();
        let (id, _rx) = joined_connection(&hub, "tok_room").await;
        assert_eq!(hub.room_size("tok_room").await, 1);

        hub.disconnect(&id).await;
        assert_eq!(hub.room_size("tok_room").await, 0);
        assert!(!hub.join(&id, "tok_room").await);
    }

    #[tokio::test]
    async fn dead_receivers_are_dropped_on_broadcast() {
        let hub = RealtimeHub::new();
        let (id, rx) = joined_connection(&hub, "tok_room").await;
        drop(rx);

        let msg = ServerMessage::Error { message: "gone".to_string() };
        hub.broadcast("tok_room", &msg).await;
        assert_eq!(hub.room_size("tok_room").await, 0);
        assert!(!hub.join(&id, "tok_room").await);
    }

    #[tokio::test]
    async fn notification_buffer_is_bounded_and_newest_first() {
        let hub = RealtimeHub::new();
        for i in 0..(NOTIFICATION_CAPACITY + 5) {
            hub.notify(Notification::new("message", &format!("n{}", i), "")).await;
        }
        let recent = hub.recent_notifications().await;
        assert_eq!(recent.len(), NOTIFICATION_CAPACITY);
        assert_eq!(recent[0].title, format!("n{}", NOTIFICATION_CAPACITY + 4));
    }
}
