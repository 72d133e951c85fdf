//! Conversation state and the context that drives it.
//!
//! Every change of the selected partner bumps a sequence number. Fetches carry
//! a [`Ticket`] stamped with the sequence they were issued under, and results
//! for an older sequence are dropped instead of overwriting the newer view.

use std::collections::HashMap;
use std::future::Future;

use tracing::{debug, warn};
use uuid::Uuid;

use duet_types::api::SendMessageRequest;
use duet_types::events::{GatewayCommand, GatewayEvent};
use duet_types::models::{Message, User};

use crate::api::ApiClient;
use crate::error::ClientError;
use crate::socket::SocketSender;

/// Identifies one conversation fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    seq: u64,
    pub partner: Uuid,
}

/// Follow-up work an applied event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// The message landed in the open conversation; tell the server it was seen
    MarkSeen(Uuid),
}

#[derive(Debug)]
pub struct ChatState {
    me: Uuid,
    users: Vec<User>,
    unseen: HashMap<Uuid, u32>,
    selected: Option<Uuid>,
    messages: Vec<Message>,
    /// Bumped on every selection change
    seq: u64,
    /// Bumped on every sidebar fetch
    users_seq: u64,
}

impl ChatState {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            users: Vec::new(),
            unseen: HashMap::new(),
            selected: None,
            messages: Vec::new(),
            seq: 0,
            users_seq: 0,
        }
    }

    pub fn me(&self) -> Uuid {
        self.me
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn unseen(&self, user_id: Uuid) -> u32 {
        self.unseen.get(&user_id).copied().unwrap_or(0)
    }

    pub fn selected(&self) -> Option<&User> {
        let id = self.selected?;
        self.users.iter().find(|u| u.id == id)
    }

    pub fn selected_id(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Switch conversations. Returns the ticket for fetching the new one.
    pub fn select(&mut self, partner: Option<Uuid>) -> Option<Ticket> {
        self.seq += 1;
        self.selected = partner;
        self.messages.clear();
        let partner = partner?;
        // opening the conversation marks it read on the server
        self.unseen.remove(&partner);
        Some(Ticket { seq: self.seq, partner })
    }

    /// Ticket for re-fetching the open conversation.
    pub fn current_ticket(&self) -> Option<Ticket> {
        self.selected.map(|partner| Ticket { seq: self.seq, partner })
    }

    /// Install a fetched conversation. Returns false if the ticket is stale.
    pub fn apply_messages(&mut self, ticket: Ticket, messages: Vec<Message>) -> bool {
        if ticket.seq != self.seq || self.selected != Some(ticket.partner) {
            debug!("dropping stale conversation fetch for {}", ticket.partner);
            return false;
        }
        self.messages = messages;
        for m in &mut self.messages {
            if m.sender_id == ticket.partner {
                m.seen = true;
            }
        }
        true
    }

    pub fn begin_users_fetch(&mut self) -> u64 {
        self.users_seq += 1;
        self.users_seq
    }

    /// Install a sidebar fetch unless a newer one was started since.
    pub fn apply_users(&mut self, seq: u64, users: Vec<User>, unseen: HashMap<Uuid, u32>) -> bool {
        if seq != self.users_seq {
            return false;
        }
        self.users = users;
        self.unseen = unseen;
        if let Some(open) = self.selected {
            self.unseen.remove(&open);
        }
        true
    }

    /// Add our own freshly sent message if its conversation is still open.
    pub fn apply_sent(&mut self, message: Message) {
        if self.selected == Some(message.receiver_id) {
            self.push(message);
        }
    }

    pub fn remove_message(&mut self, message_id: Uuid) {
        self.messages.retain(|m| m.id != message_id);
    }

    /// Fold a socket event into local state.
    pub fn apply_event(&mut self, event: &GatewayEvent) -> Effect {
        match event {
            GatewayEvent::NewMessage(message) => {
                if message.receiver_id != self.me {
                    return Effect::None;
                }
                if self.selected == Some(message.sender_id) {
                    let mut message = message.clone();
                    message.seen = true;
                    let id = message.id;
                    self.push(message);
                    Effect::MarkSeen(id)
                } else {
                    *self.unseen.entry(message.sender_id).or_insert(0) += 1;
                    Effect::None
                }
            }
            GatewayEvent::MessageDeleted { message_id } => {
                self.remove_message(*message_id);
                Effect::None
            }
            GatewayEvent::MessagesDeleted { by } => {
                if self.selected == Some(*by) {
                    self.messages.clear();
                }
                self.unseen.remove(by);
                Effect::None
            }
            GatewayEvent::GetOnlineUsers(_) => Effect::None,
        }
    }

    fn push(&mut self, message: Message) {
        if !self.messages.iter().any(|m| m.id == message.id) {
            self.messages.push(message);
        }
    }
}

/// Issues the REST calls behind chat actions and applies their results.
pub struct ChatContext {
    api: ApiClient,
    socket: Option<SocketSender>,
    state: ChatState,
}

impl ChatContext {
    pub fn new(api: ApiClient, me: Uuid, socket: Option<SocketSender>) -> Self {
        Self {
            api,
            socket,
            state: ChatState::new(me),
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub async fn get_users(&mut self) -> Result<(), ClientError> {
        let seq = self.state.begin_users_fetch();
        let resp = self.api.users().await?;
        self.state.apply_users(seq, resp.users, resp.unseen_messages);
        Ok(())
    }

    /// Switch conversation and return the fetch to run for it.
    ///
    /// The fetch is detached from `self` so a caller can run it concurrently
    /// and hand the result to [`ChatContext::finish_fetch`] later.
    pub fn select_user(
        &mut self,
        partner: Option<Uuid>,
    ) -> Option<impl Future<Output = (Ticket, Result<Vec<Message>, ClientError>)> + Send + use<>> {
        let ticket = self.state.select(partner)?;
        Some(fetch_conversation(self.api.clone(), ticket))
    }

    /// Re-fetch the open conversation.
    pub fn refresh(
        &self,
    ) -> Option<impl Future<Output = (Ticket, Result<Vec<Message>, ClientError>)> + Send + use<>> {
        let ticket = self.state.current_ticket()?;
        Some(fetch_conversation(self.api.clone(), ticket))
    }

    /// Apply a finished fetch. Returns Ok(false) when it was stale and dropped.
    pub fn finish_fetch(
        &mut self,
        ticket: Ticket,
        result: Result<Vec<Message>, ClientError>,
    ) -> Result<bool, ClientError> {
        Ok(self.state.apply_messages(ticket, result?))
    }

    pub async fn send_message(&mut self, req: SendMessageRequest) -> Result<(), ClientError> {
        let partner = self.state.selected_id().ok_or(ClientError::NoConversation)?;
        let resp = self.api.send(partner, &req).await?;
        self.state.apply_sent(resp.new_message);
        Ok(())
    }

    pub async fn delete_all_messages(&mut self) -> Result<(), ClientError> {
        let partner = self.state.selected_id().ok_or(ClientError::NoConversation)?;
        self.api.delete_all(partner).await?;
        if self.state.selected_id() == Some(partner) {
            self.state.messages.clear();
        }
        Ok(())
    }

    pub async fn delete_message_by_id(&mut self, message_id: Uuid) -> Result<(), ClientError> {
        let partner = self.state.selected_id().ok_or(ClientError::NoConversation)?;
        self.api.delete_message(message_id, self.state.me()).await?;
        self.state.remove_message(message_id);

        if let Some(socket) = &self.socket {
            socket.send(GatewayCommand::DeleteMessage { message_id, receiver_id: partner });
        }
        Ok(())
    }

    /// Apply a socket event and carry out whatever follow-up it needs.
    pub async fn handle_event(&mut self, event: &GatewayEvent) -> Result<(), ClientError> {
        match self.state.apply_event(event) {
            Effect::None => Ok(()),
            Effect::MarkSeen(id) => {
                if let Err(e) = self.api.mark_seen(id).await {
                    warn!("mark seen for {} failed: {}", id, e);
                    return Err(e);
                }
                Ok(())
            }
        }
    }
}

async fn fetch_conversation(
    api: ApiClient,
    ticket: Ticket,
) -> (Ticket, Result<Vec<Message>, ClientError>) {
    let result = api.messages(ticket.partner).await.map(|resp| resp.messages);
    (ticket, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(from: Uuid, to: Uuid, text: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: from,
            receiver_id: to,
            text: Some(text.into()),
            image: None,
            seen: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn stale_fetch_is_dropped_after_switching_partner() {
        let me = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut state = ChatState::new(me);

        let slow = state.select(Some(alice)).unwrap();
        let fast = state.select(Some(bob)).unwrap();

        assert!(state.apply_messages(fast, vec![message(bob, me, "from bob")]));
        assert!(!state.apply_messages(slow, vec![message(alice, me, "from alice")]));
        assert_eq!(state.messages()[0].sender_id, bob);
    }

    #[test]
    fn reselecting_same_partner_still_invalidates_old_ticket() {
        let me = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let mut state = ChatState::new(me);

        let first = state.select(Some(alice)).unwrap();
        state.select(None);
        let second = state.select(Some(alice)).unwrap();

        assert!(!state.apply_messages(first, vec![]));
        assert!(state.apply_messages(second, vec![message(alice, me, "hi")]));
        assert!(state.messages()[0].seen);
    }

    #[test]
    fn incoming_message_for_open_conversation_is_marked_seen() {
        let me = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut state = ChatState::new(me);
        state.select(Some(alice));

        let from_alice = message(alice, me, "hi");
        let effect = state.apply_event(&GatewayEvent::NewMessage(from_alice.clone()));
        assert_eq!(effect, Effect::MarkSeen(from_alice.id));
        assert!(state.messages()[0].seen);

        // duplicates from a racing fetch are not appended twice
        state.apply_event(&GatewayEvent::NewMessage(from_alice));
        assert_eq!(state.messages().len(), 1);

        let from_bob = message(bob, me, "psst");
        assert_eq!(state.apply_event(&GatewayEvent::NewMessage(from_bob)), Effect::None);
        assert_eq!(state.unseen(bob), 1);
        assert_eq!(state.messages().len(), 1);
    }

    #[test]
    fn deletions_from_the_other_side_update_the_open_view() {
        let me = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let mut state = ChatState::new(me);
        let ticket = state.select(Some(alice)).unwrap();
        let keep = message(alice, me, "keep");
        let gone = message(alice, me, "gone");
        state.apply_messages(ticket, vec![keep.clone(), gone.clone()]);

        state.apply_event(&GatewayEvent::MessageDeleted { message_id: gone.id });
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages()[0].id, keep.id);

        state.apply_event(&GatewayEvent::MessagesDeleted { by: alice });
        assert!(state.messages().is_empty());
    }

    #[test]
    fn older_sidebar_fetch_cannot_overwrite_newer_one() {
        let me = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let mut state = ChatState::new(me);

        let old = state.begin_users_fetch();
        let new = state.begin_users_fetch();
        assert!(state.apply_users(new, vec![], HashMap::from([(alice, 3)])));
        assert!(!state.apply_users(old, vec![], HashMap::new()));
        assert_eq!(state.unseen(alice), 3);

        state.select(Some(alice));
        assert_eq!(state.unseen(alice), 0);
    }

    #[test]
    fn sent_message_only_lands_in_its_own_conversation() {
        let me = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut state = ChatState::new(me);
        state.select(Some(bob));

        state.apply_sent(message(me, alice, "late reply"));
        assert!(state.messages().is_empty());
        state.apply_sent(message(me, bob, "hello"));
        assert_eq!(state.messages().len(), 1);
    }
}
