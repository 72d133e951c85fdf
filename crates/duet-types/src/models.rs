use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public profile of a user. The credential hash never leaves the database layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    #[serde(default)]
    pub profile_pic: String,
    #[serde(default)]
    pub bio: String,
    pub created_at: DateTime<Utc>,
}

/// A single one-to-one message. Usually exactly one of `text` / `image` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}
