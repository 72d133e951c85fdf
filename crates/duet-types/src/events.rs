use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events pushed from the server over the WebSocket.
///
/// Frames are `{"type": "<camelCaseName>", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// Full list of currently connected user ids, sent to everyone
    GetOnlineUsers(Vec<Uuid>),

    /// A message addressed to the receiving user was persisted
    NewMessage(Message),

    /// A single message in one of the user's conversations was deleted
    #[serde(rename_all = "camelCase")]
    MessageDeleted { message_id: Uuid },

    /// The counterpart cleared the whole conversation
    MessagesDeleted { by: Uuid },
}

/// Commands sent from the client to the server over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayCommand {
    /// Deletion notice mirroring a successful REST delete
    #[serde(rename_all = "camelCase")]
    DeleteMessage { message_id: Uuid, receiver_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_users_frame_carries_plain_id_array() {
        let id = Uuid::nil();
        let json = serde_json::to_value(GatewayEvent::GetOnlineUsers(vec![id])).unwrap();
        assert_eq!(json["type"], "getOnlineUsers");
        assert_eq!(json["data"][0], id.to_string());
    }

    #[test]
    fn message_deleted_uses_camel_case_payload() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(GatewayEvent::MessageDeleted { message_id: id }).unwrap();
        assert_eq!(json["type"], "messageDeleted");
        assert_eq!(json["data"]["messageId"], id.to_string());
    }

    #[test]
    fn parses_client_delete_notice() {
        let mid = Uuid::new_v4();
        let rid = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"deleteMessage","data":{{"messageId":"{mid}","receiverId":"{rid}"}}}}"#
        );
        let cmd: GatewayCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(cmd, GatewayCommand::DeleteMessage { message_id: mid, receiver_id: rid });
    }

    #[test]
    fn new_message_omits_missing_image() {
        let msg = Message {
            id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            text: Some("hi".into()),
            image: None,
            seen: false,
            created_at: chrono::Utc::now(),
        };
        let json = serde_json::to_value(GatewayEvent::NewMessage(msg.clone())).unwrap();
        assert_eq!(json["data"]["_id"], msg.id.to_string());
        assert_eq!(json["data"]["senderId"], msg.sender_id.to_string());
        assert!(json["data"].get("image").is_none());
    }
}
