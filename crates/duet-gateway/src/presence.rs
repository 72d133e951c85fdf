use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use duet_types::events::GatewayEvent;

/// Handle to one live socket: a connection id plus its outbound event queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnectionHandle {
    /// New handle with a fresh connection id. The receiver feeds the socket writer.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { conn_id: Uuid::new_v4(), tx }, rx)
    }

    /// Queue an event for the socket. Fails once the socket writer is gone.
    pub fn send(&self, event: GatewayEvent) -> Result<(), GatewayEvent> {
        self.tx.send(event).map_err(|e| e.0)
    }
}

/// In-memory map of user id -> the connection currently representing that user.
///
/// One entry per user; a reconnect overwrites the previous entry, and only the
/// owning connection may remove it. Nothing here survives a restart.
#[derive(Default)]
pub struct Presence {
    entries: RwLock<HashMap<Uuid, ConnectionHandle>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` for `user_id`. Returns the handle it replaced, if any.
    pub async fn register(&self, user_id: Uuid, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.entries.write().await.insert(user_id, handle)
    }

    /// Remove the entry for `user_id`, but only if `conn_id` still owns it.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(&user_id) {
            Some(handle) if handle.conn_id == conn_id => {
                entries.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.entries.read().await.get(&user_id).cloned()
    }

    /// Ids of every connected user, sorted for stable output.
    pub async fn online_user_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.entries.read().await.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reconnect_overwrites_and_stale_disconnect_is_ignored() {
        let presence = Presence::new();
        let user = Uuid::new_v4();

        let (first, _rx1) = ConnectionHandle::new();
        let (second, _rx2) = ConnectionHandle::new();
        assert!(presence.register(user, first.clone()).await.is_none());
        let replaced = presence.register(user, second.clone()).await.unwrap();
        assert_eq!(replaced.conn_id, first.conn_id);

        // the old socket closing must not evict the new one
        assert!(!presence.unregister(user, first.conn_id).await);
        assert_eq!(presence.lookup(user).await.unwrap().conn_id, second.conn_id);

        assert!(presence.unregister(user, second.conn_id).await);
        assert!(presence.lookup(user).await.is_none());
        assert!(presence.online_user_ids().await.is_empty());
    }

    #[tokio::test]
    async fn send_fails_after_receiver_dropped() {
        let (handle, rx) = ConnectionHandle::new();
        drop(rx);
        let event = GatewayEvent::MessagesDeleted { by: Uuid::nil() };
        assert_eq!(handle.send(event.clone()), Err(event));
    }
}
