use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use duet_types::events::GatewayEvent;

use crate::presence::{ConnectionHandle, Presence};

/// Outcome of a targeted emit. An observation only: persistence is the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the user's live socket
    Delivered,
    /// No live socket for the user; the event was dropped
    Offline,
}

/// Completed deletions remembered for matching client delete notices.
const DELETION_LOG_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Deletion {
    message_id: Uuid,
    sender: Uuid,
    receiver: Uuid,
}

/// Tracks connected users and relays events to them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Events every connected socket receives
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// user_id -> live connection
    presence: Presence,

    /// Recent server-side deletions, oldest first
    deletions: Mutex<VecDeque<Deletion>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                presence: Presence::new(),
                deletions: Mutex::new(VecDeque::with_capacity(DELETION_LOG_LEN)),
            }),
        }
    }

    /// Subscribe to events addressed to everyone.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a new connection for `user_id` and announce the new online list.
    pub async fn connect(&self, user_id: Uuid) -> (ConnectionHandle, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (handle, rx) = ConnectionHandle::new();
        if self.inner.presence.register(user_id, handle.clone()).await.is_some() {
            debug!("user {} reconnected, previous socket superseded", user_id);
        }
        self.broadcast_online_users().await;
        (handle, rx)
    }

    /// Drop the connection if it still owns the user's entry, then announce the new list.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: Uuid) {
        if self.inner.presence.unregister(user_id, conn_id).await {
            self.broadcast_online_users().await;
        }
    }

    /// Send a targeted event to a specific user, if they are connected.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> Delivery {
        let Some(handle) = self.inner.presence.lookup(user_id).await else {
            return Delivery::Offline;
        };
        match handle.send(event) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Offline,
        }
    }

    /// Note a message the server has deleted on behalf of `sender`.
    pub async fn record_deletion(&self, message_id: Uuid, sender: Uuid, receiver: Uuid) {
        let mut log = self.inner.deletions.lock().await;
        if log.len() == DELETION_LOG_LEN {
            log.pop_front();
        }
        log.push_back(Deletion { message_id, sender, receiver });
    }

    /// Relay a client's `messageDeleted` notice. It goes through only when it
    /// matches a recorded deletion by that same sender to that same receiver,
    /// and each recorded deletion can be relayed this way once. `None` means
    /// the notice was refused.
    pub async fn relay_delete_notice(
        &self,
        sender: Uuid,
        message_id: Uuid,
        receiver: Uuid,
    ) -> Option<Delivery> {
        let wanted = Deletion { message_id, sender, receiver };
        {
            let mut log = self.inner.deletions.lock().await;
            let pos = log.iter().position(|d| *d == wanted)?;
            log.remove(pos);
        }
        Some(self.send_to_user(receiver, GatewayEvent::MessageDeleted { message_id }).await)
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.presence.online_user_ids().await
    }

    async fn broadcast_online_users(&self) {
        let ids = self.online_users().await;
        self.broadcast(GatewayEvent::GetOnlineUsers(ids));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_and_disconnect_announce_online_list() {
        let dispatcher = Dispatcher::new();
        let mut all = dispatcher.subscribe();
        let user = Uuid::new_v4();

        let (handle, _rx) = dispatcher.connect(user).await;
        assert_eq!(all.recv().await.unwrap(), GatewayEvent::GetOnlineUsers(vec![user]));

        dispatcher.disconnect(user, handle.conn_id).await;
        assert_eq!(all.recv().await.unwrap(), GatewayEvent::GetOnlineUsers(vec![]));
    }

    #[tokio::test]
    async fn targeted_send_reports_delivery() {
        let dispatcher = Dispatcher::new();
        let online = Uuid::new_v4();
        let offline = Uuid::new_v4();
        let (_handle, mut rx) = dispatcher.connect(online).await;

        let event = GatewayEvent::MessagesDeleted { by: offline };
        assert_eq!(dispatcher.send_to_user(online, event.clone()).await, Delivery::Delivered);
        assert_eq!(rx.recv().await.unwrap(), event);

        assert_eq!(dispatcher.send_to_user(offline, event).await, Delivery::Offline);
    }

    #[tokio::test]
    async fn deletion_log_forgets_the_oldest_entries() {
        let dispatcher = Dispatcher::new();
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();
        let first = Uuid::new_v4();
        dispatcher.record_deletion(first, sender, receiver).await;
        for _ in 0..DELETION_LOG_LEN {
            dispatcher.record_deletion(Uuid::new_v4(), sender, receiver).await;
        }

        assert_eq!(dispatcher.relay_delete_notice(sender, first, receiver).await, None);
    }

    #[tokio::test]
    async fn closed_socket_counts_as_offline() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (_handle, rx) = dispatcher.connect(user).await;
        drop(rx);

        let event = GatewayEvent::MessageDeleted { message_id: Uuid::new_v4() };
        assert_eq!(dispatcher.send_to_user(user, event).await, Delivery::Offline);
    }
}
