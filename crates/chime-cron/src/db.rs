use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `jobs` table (idempotent) and an index on `next_fire_at` so
/// the due/soonest queries stay efficient with thousands of jobs.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id            TEXT    NOT NULL PRIMARY KEY,
            name          TEXT    NOT NULL,
            mode          TEXT    NOT NULL,
            message       TEXT    NOT NULL,
            schedule      TEXT    NOT NULL,   -- JSON-encoded Schedule enum
            status        TEXT    NOT NULL DEFAULT 'scheduled',
            next_fire_at  TEXT,               -- RFC 3339 or NULL
            last_fired_at TEXT,               -- RFC 3339 or NULL
            run_count     INTEGER NOT NULL DEFAULT 0,
            last_error    TEXT,
            created_at    TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL
        ) STRICT;

        -- Efficient wake-up: SELECT … WHERE next_fire_at <= ? ORDER BY next_fire_at
        CREATE INDEX IF NOT EXISTS idx_jobs_next_fire_at ON jobs (next_fire_at);
        ",
    )?;
    Ok(())
}
