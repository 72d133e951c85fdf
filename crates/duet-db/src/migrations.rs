use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            full_name   TEXT NOT NULL,
            password    TEXT NOT NULL,
            profile_pic TEXT NOT NULL DEFAULT '',
            bio         TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL
        );

        -- No foreign keys: deleting a user keeps the conversation history.
        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            sender_id   TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            text        TEXT,
            image       TEXT,
            seen        INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, receiver_id);

        CREATE INDEX IF NOT EXISTS idx_messages_unseen
            ON messages(receiver_id, seen);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
