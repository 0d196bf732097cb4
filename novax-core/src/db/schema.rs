//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: sessions and their score points
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id          INTEGER NOT NULL,
        topic_id         INTEGER NOT NULL,
        status           TEXT NOT NULL CHECK (status IN ('IN_PROGRESS', 'COMPLETED')),
        created_at       DATETIME NOT NULL,
        completed_at     DATETIME,
        transcript_hash  TEXT
    );

    CREATE TABLE IF NOT EXISTS score_points (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id       INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        dimension        TEXT NOT NULL,
        value            INTEGER NOT NULL CHECK (value BETWEEN 0 AND 100),

        UNIQUE(session_id, dimension)
    );

    -- At most one live session per user
    CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_in_progress
        ON sessions(user_id) WHERE status = 'IN_PROGRESS';

    CREATE INDEX IF NOT EXISTS idx_sessions_user_status ON sessions(user_id, status);
    CREATE INDEX IF NOT EXISTS idx_sessions_completed_at ON sessions(completed_at DESC);
    CREATE INDEX IF NOT EXISTS idx_score_points_session ON score_points(session_id);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
