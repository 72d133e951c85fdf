//! Conversions from database rows to wire models.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use duet_db::models::{MessageRow, UserRow};
use duet_types::models::{Message, User};

fn parse_id(raw: &str, what: &str, owner: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on '{}': {}", what, raw, owner, e);
        Uuid::default()
    })
}

fn parse_timestamp(raw: &str, owner: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat it as UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on '{}': {}", raw, owner, e);
            DateTime::default()
        })
}

pub(crate) fn user_from_row(row: UserRow) -> User {
    User {
        id: parse_id(&row.id, "user id", &row.id),
        created_at: parse_timestamp(&row.created_at, &row.id),
        email: row.email,
        full_name: row.full_name,
        profile_pic: row.profile_pic,
        bio: row.bio,
    }
}

pub(crate) fn message_from_row(row: MessageRow) -> Message {
    Message {
        id: parse_id(&row.id, "message id", &row.id),
        sender_id: parse_id(&row.sender_id, "sender_id", &row.id),
        receiver_id: parse_id(&row.receiver_id, "receiver_id", &row.id),
        created_at: parse_timestamp(&row.created_at, &row.id),
        text: row.text,
        image: row.image,
        seen: row.seen,
    }
}
