//! Database schema migrations.

use rusqlite::Connection;

use crate::error::Result;

/// Run all pending database migrations.
pub(crate) fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )?;

    let current_version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version < 1 {
        apply_v1(conn)?;
        log::info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: trackers and per-destination dedup records.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS trackers (
            url          TEXT NOT NULL,
            destination  TEXT NOT NULL,
            UNIQUE (url, destination)
        );

        CREATE TABLE IF NOT EXISTS processed_events (
            event_id      TEXT NOT NULL,
            destination   TEXT NOT NULL,
            processed_at  INTEGER NOT NULL,
            PRIMARY KEY (event_id, destination)
        );

        CREATE INDEX IF NOT EXISTS idx_processed_events_destination
            ON processed_events (destination);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )?;
    Ok(())
}
