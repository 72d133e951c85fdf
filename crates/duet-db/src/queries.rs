use crate::models::{MessageRow, ProfileUpdate, UserRow};
use crate::Database;
use anyhow::Result;
use chrono::SecondsFormat;
use rusqlite::{Connection, Row};

/// Timestamp format stored in `created_at` columns (RFC 3339, UTC, millis).
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

const USER_COLUMNS: &str = "id, email, full_name, password, profile_pic, bio, created_at";
const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, text, image, seen, created_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, full_name, password, profile_pic, bio, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    user.id,
                    user.email,
                    user.full_name,
                    user.password,
                    user.profile_pic,
                    user.bio,
                    user.created_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Every user except `id`, oldest account first.
    pub fn list_users_except(&self, id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE id != ?1 ORDER BY rowid"
            ))?;
            let rows = stmt
                .query_map([id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Applies the set fields and returns the updated row, `None` if the user is gone.
    pub fn update_profile(&self, id: &str, update: &ProfileUpdate) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET
                    full_name   = COALESCE(?2, full_name),
                    bio         = COALESCE(?3, bio),
                    profile_pic = COALESCE(?4, profile_pic)
                 WHERE id = ?1",
                rusqlite::params![id, update.full_name, update.bio, update.profile_pic],
            )?;
            query_user(conn, "id", id)
        })
    }

    /// Removes the account. Messages are kept.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM users WHERE id = ?1", [id])? > 0))
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, text, image, seen, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    msg.id,
                    msg.sender_id,
                    msg.receiver_id,
                    msg.text,
                    msg.image,
                    msg.seen,
                    msg.created_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"))?;
            stmt.query_row([id], message_from_row).optional()
        })
    }

    /// Both directions of the conversation between `a` and `b`, in insertion order.
    pub fn get_conversation(&self, a: &str, b: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY rowid"
            ))?;
            let rows = stmt
                .query_map([a, b], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Marks everything `sender` sent to `receiver` as seen. Returns rows changed.
    pub fn mark_conversation_seen(&self, sender: &str, receiver: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET seen = 1
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND seen = 0",
                [sender, receiver],
            )?;
            Ok(n)
        })
    }

    pub fn mark_message_seen(&self, id: &str) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("UPDATE messages SET seen = 1 WHERE id = ?1", [id])?))
    }

    pub fn delete_message(&self, id: &str) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM messages WHERE id = ?1", [id])?))
    }

    /// Deletes both directions of the conversation. Returns rows removed.
    pub fn delete_conversation(&self, a: &str, b: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)",
                [a, b],
            )?;
            Ok(n)
        })
    }

    /// Unseen message counts addressed to `receiver`, grouped by sender.
    /// Only senders that still have an account are reported.
    pub fn unseen_counts(&self, receiver: &str) -> Result<Vec<(String, u32)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.sender_id, COUNT(*)
                 FROM messages m
                 JOIN users u ON u.id = m.sender_id
                 WHERE m.receiver_id = ?1 AND m.seen = 0
                 GROUP BY m.sender_id",
            )?;
            let rows = stmt
                .query_map([receiver], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"))?;
    stmt.query_row([value], user_from_row).optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        password: row.get(3)?,
        profile_pic: row.get(4)?,
        bio: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        text: row.get(3)?,
        image: row.get(4)?,
        seen: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(db: &Database, email: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&UserRow {
            id: id.clone(),
            email: email.to_string(),
            full_name: email.to_string(),
            password: "hash".to_string(),
            profile_pic: String::new(),
            bio: String::new(),
            created_at: timestamp_now(),
        })
        .unwrap();
        id
    }

    fn send(db: &Database, from: &str, to: &str, text: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_message(&MessageRow {
            id: id.clone(),
            sender_id: from.to_string(),
            receiver_id: to.to_string(),
            text: Some(text.to_string()),
            image: None,
            seen: false,
            created_at: timestamp_now(),
        })
        .unwrap();
        id
    }

    #[test]
    fn conversation_is_symmetric_and_in_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@duet.test");
        let b = user(&db, "b@duet.test");
        let c = user(&db, "c@duet.test");

        send(&db, &a, &b, "one");
        send(&db, &b, &a, "two");
        send(&db, &a, &c, "elsewhere");
        send(&db, &a, &b, "three");

        let from_a: Vec<_> = db.get_conversation(&a, &b).unwrap();
        let from_b: Vec<_> = db.get_conversation(&b, &a).unwrap();
        let texts: Vec<_> = from_a.iter().filter_map(|m| m.text.clone()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert_eq!(
            from_a.iter().map(|m| &m.id).collect::<Vec<_>>(),
            from_b.iter().map(|m| &m.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn marking_conversation_seen_is_idempotent_and_one_directional() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@duet.test");
        let b = user(&db, "b@duet.test");
        send(&db, &a, &b, "hi");
        send(&db, &a, &b, "there");
        send(&db, &b, &a, "reply");

        assert_eq!(db.mark_conversation_seen(&a, &b).unwrap(), 2);
        assert_eq!(db.mark_conversation_seen(&a, &b).unwrap(), 0);

        let conv = db.get_conversation(&a, &b).unwrap();
        for m in &conv {
            assert_eq!(m.seen, m.sender_id == a);
        }
    }

    #[test]
    fn unseen_counts_group_by_sender_and_skip_deleted_users() {
        let db = Database::open_in_memory().unwrap();
        let me = user(&db, "me@duet.test");
        let a = user(&db, "a@duet.test");
        let b = user(&db, "b@duet.test");
        send(&db, &a, &me, "1");
        send(&db, &a, &me, "2");
        send(&db, &b, &me, "3");
        send(&db, &me, &a, "mine");

        let mut counts = db.unseen_counts(&me).unwrap();
        counts.sort();
        let mut expected = vec![(a.clone(), 2), (b.clone(), 1)];
        expected.sort();
        assert_eq!(counts, expected);

        assert!(db.delete_user(&b).unwrap());
        assert_eq!(db.unseen_counts(&me).unwrap(), vec![(a.clone(), 2)]);
        // history survives the account
        assert_eq!(db.get_conversation(&me, &b).unwrap().len(), 1);
    }

    #[test]
    fn deleting_a_conversation_twice_is_harmless() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@duet.test");
        let b = user(&db, "b@duet.test");
        let c = user(&db, "c@duet.test");
        send(&db, &a, &b, "x");
        send(&db, &b, &a, "y");
        send(&db, &a, &c, "keep");

        assert_eq!(db.delete_conversation(&b, &a).unwrap(), 2);
        assert_eq!(db.delete_conversation(&b, &a).unwrap(), 0);
        assert!(db.get_conversation(&a, &b).unwrap().is_empty());
        assert_eq!(db.get_conversation(&a, &c).unwrap().len(), 1);
    }

    #[test]
    fn profile_update_only_touches_given_fields() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@duet.test");
        let updated = db
            .update_profile(
                &a,
                &ProfileUpdate { bio: Some("hello".into()), ..Default::default() },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.bio, "hello");
        assert_eq!(updated.full_name, "a@duet.test");

        assert!(db.update_profile("missing", &ProfileUpdate::default()).unwrap().is_none());
    }

    #[test]
    fn single_message_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@duet.test");
        let b = user(&db, "b@duet.test");
        let id = send(&db, &a, &b, "hi");

        assert_eq!(db.mark_message_seen(&id).unwrap(), 1);
        assert!(db.get_message(&id).unwrap().unwrap().seen);
        assert_eq!(db.delete_message(&id).unwrap(), 1);
        assert!(db.get_message(&id).unwrap().is_none());
        assert_eq!(db.mark_message_seen(&id).unwrap(), 0);
    }
}
