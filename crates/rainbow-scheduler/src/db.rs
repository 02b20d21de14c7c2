use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduled_tasks table and its sweep index.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id              TEXT PRIMARY KEY,
            phone           TEXT NOT NULL,
            payload         TEXT NOT NULL,
            fire_at         TEXT NOT NULL,
            repeat_rule     TEXT NOT NULL DEFAULT 'none',
            creator         TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending',
            attempts        INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TEXT,
            last_error      TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_sweep
            ON scheduled_tasks(status, fire_at, created_at);",
    )?;
    Ok(())
}
