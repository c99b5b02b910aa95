//! Per-room fan-out for chat WebSocket connections.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::chat::ServerFrame;

/// Frames buffered per room before slow receivers start lagging
const ROOM_CAPACITY: usize = 256;

/// A frame and the user whose action produced it
#[derive(Debug, Clone)]
pub struct HubEvent {
    pub origin: Option<Uuid>,
    pub frame: ServerFrame,
}

impl HubEvent {
    /// Whether a connection owned by `user_id` should receive this event.
    pub fn is_for(&self, user_id: Uuid) -> bool {
        self.origin != Some(user_id) || self.frame.echoes_to_origin()
    }
}

#[derive(Clone, Default)]
pub struct ChatHub {
    rooms: Arc<RwLock<HashMap<Uuid, broadcast::Sender<HubEvent>>>>,
    /// Open sockets per user across all rooms
    sockets: Arc<Mutex<HashMap<Uuid, usize>>>,
}

impl ChatHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, room_id: Uuid) -> broadcast::Receiver<HubEvent> {
        if let Some(tx) = self.rooms.read().get(&room_id) {
            return tx.subscribe();
        }
        self.rooms
            .write()
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Sends to every connection in the room; returns how many received it.
    pub fn publish(&self, room_id: Uuid, origin: Option<Uuid>, frame: ServerFrame) -> usize {
        let Some(tx) = self.rooms.read().get(&room_id).cloned() else {
            return 0;
        };
        tx.send(HubEvent { origin, frame }).unwrap_or(0)
    }

    /// Drops the room channel once its last connection is gone.
    pub fn release(&self, room_id: Uuid) {
        let mut rooms = self.rooms.write();
        if rooms
            .get(&room_id)
            .map(|tx| tx.receiver_count() == 0)
            .unwrap_or(false)
        {
            rooms.remove(&room_id);
            tracing::debug!(room_id = %room_id, "Chat room channel released");
        }
    }

    /// Counts a new socket for `user_id`; returns how many are now open.
    pub fn user_connected(&self, user_id: Uuid) -> usize {
        let mut sockets = self.sockets.lock();
        let count = sockets.entry(user_id).or_insert(0);
        *count += 1;
        *count
    }

    /// Returns how many sockets `user_id` still has open. The user is
    /// offline once this reaches zero.
    pub fn user_disconnected(&self, user_id: Uuid) -> usize {
        let mut sockets = self.sockets.lock();
        let remaining = match sockets.get_mut(&user_id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            sockets.remove(&user_id);
        }
        remaining
    }

    pub fn connections(&self, room_id: Uuid) -> usize {
        self.rooms
            .read()
            .get(&room_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chat::PresenceStatus;

    fn typing(user_id: Uuid) -> ServerFrame {
        ServerFrame::Typing {
            user_id,
            user_name: "Ann".into(),
            is_typing: true,
        }
    }

    #[tokio::test]
    async fn publishes_to_all_subscribers_of_a_room() {
        let hub = ChatHub::new();
        let room = Uuid::new_v4();
        let mut a = hub.subscribe(room);
        let mut b = hub.subscribe(room);
        let mut other = hub.subscribe(Uuid::new_v4());

        let user = Uuid::new_v4();
        assert_eq!(hub.publish(room, Some(user), typing(user)), 2);

        assert_eq!(a.recv().await.unwrap().origin, Some(user));
        assert_eq!(b.recv().await.unwrap().origin, Some(user));
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let hub = ChatHub::new();
        let user = Uuid::new_v4();
        assert_eq!(hub.publish(Uuid::new_v4(), Some(user), typing(user)), 0);
    }

    #[test]
    fn typing_is_not_echoed_to_its_author() {
        let author = Uuid::new_v4();
        let event = HubEvent {
            origin: Some(author),
            frame: typing(author),
        };
        assert!(!event.is_for(author));
        assert!(event.is_for(Uuid::new_v4()));

        let status = HubEvent {
            origin: Some(author),
            frame: ServerFrame::UserStatus {
                user_id: author,
                status: PresenceStatus::Offline,
            },
        };
        assert!(!status.is_for(author));
    }

    #[test]
    fn release_drops_idle_rooms_only() {
        let hub = ChatHub::new();
        let room = Uuid::new_v4();
        let rx = hub.subscribe(room);
        hub.release(room);
        assert_eq!(hub.connections(room), 1);

        drop(rx);
        hub.release(room);
        assert_eq!(hub.connections(room), 0);
        assert!(hub.rooms.read().is_empty());
    }

    #[test]
    fn user_stays_online_while_any_socket_is_open() {
        let hub = ChatHub::new();
        let user = Uuid::new_v4();
        assert_eq!(hub.user_connected(user), 1);
        assert_eq!(hub.user_connected(user), 2);

        assert_eq!(hub.user_disconnected(user), 1);
        assert_eq!(hub.user_disconnected(user), 0);
        assert!(hub.sockets.lock().is_empty());

        // a stray disconnect never underflows
        assert_eq!(hub.user_disconnected(user), 0);
    }
}
