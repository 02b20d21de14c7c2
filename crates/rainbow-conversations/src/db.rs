use rusqlite::Connection;

use crate::error::Result;

/// Initialise conversation tables and indexes.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            phone                        TEXT PRIMARY KEY,
            language                     TEXT NOT NULL DEFAULT 'en',
            display_name                 TEXT,
            assigned_unit                TEXT,
            favourite                    INTEGER NOT NULL DEFAULT 0,
            pinned                       INTEGER NOT NULL DEFAULT 0,
            archived                     INTEGER NOT NULL DEFAULT 0,
            response_mode                TEXT,
            last_read_at                 TEXT,
            unknown_count                INTEGER NOT NULL DEFAULT 0,
            repeat_count                 INTEGER NOT NULL DEFAULT 0,
            consecutive_negative_count   INTEGER NOT NULL DEFAULT 0,
            last_sentiment_escalation_at TEXT,
            last_intent                  TEXT,
            last_intent_confidence       REAL,
            last_intent_at               TEXT,
            workflow_cursor              TEXT,
            message_count                INTEGER NOT NULL DEFAULT 0,
            total_tokens                 INTEGER NOT NULL DEFAULT 0,
            created_at                   TEXT NOT NULL,
            updated_at                   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            phone       TEXT NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            intent      TEXT,
            confidence  REAL,
            tier        TEXT,
            model       TEXT,
            response_ms INTEGER,
            kb_topics   TEXT,
            action      TEXT,
            workflow_id TEXT,
            step_id     TEXT,
            tokens_in   INTEGER NOT NULL DEFAULT 0,
            tokens_out  INTEGER NOT NULL DEFAULT 0,
            manual      INTEGER NOT NULL DEFAULT 0,
            summary     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_phone
            ON messages(phone, id);

        CREATE TABLE IF NOT EXISTS intent_predictions (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            phone         TEXT NOT NULL,
            message       TEXT NOT NULL,
            intent        TEXT NOT NULL,
            confidence    REAL NOT NULL,
            tier          TEXT NOT NULL,
            model         TEXT,
            actual_intent TEXT,
            was_correct   INTEGER,
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_predictions_phone
            ON intent_predictions(phone, id DESC);

        CREATE TABLE IF NOT EXISTS tags (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            name       TEXT NOT NULL UNIQUE COLLATE NOCASE,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS conversation_tags (
            phone  TEXT NOT NULL,
            tag_id INTEGER NOT NULL,
            PRIMARY KEY (phone, tag_id)
        );",
    )?;
    Ok(())
}
