use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};

/// Ordered migration batches. `PRAGMA user_version` records the last applied
/// index + 1, so appending a batch here is all a schema change needs.
///
/// The vector tables are not part of this list: their dimension comes from
/// the configured embedding model, so they are created by
/// `Store::ensure_vec_tables` once the dimension is known.
const MIGRATIONS: &[&str] = &[
    // v1: full relational schema
    "CREATE TABLE users (
        id            TEXT PRIMARY KEY NOT NULL,
        username      TEXT NOT NULL UNIQUE,
        email         TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at    TEXT NOT NULL,
        updated_at    TEXT NOT NULL
    );
    CREATE TABLE auth_tokens (
        token_hash  TEXT PRIMARY KEY NOT NULL,
        user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires_at  TEXT NOT NULL,
        created_at  TEXT NOT NULL
    );
    CREATE INDEX idx_tokens_user ON auth_tokens(user_id);

    CREATE TABLE projects (
        id          TEXT PRIMARY KEY NOT NULL,
        user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        name        TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        is_active   INTEGER NOT NULL DEFAULT 1,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    );
    CREATE INDEX idx_projects_user ON projects(user_id);

    CREATE TABLE sessions (
        id          TEXT PRIMARY KEY NOT NULL,
        user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        project_id  TEXT REFERENCES projects(id) ON DELETE SET NULL,
        title       TEXT NOT NULL DEFAULT '',
        archived    INTEGER NOT NULL DEFAULT 0,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    );
    CREATE INDEX idx_sessions_user ON sessions(user_id, updated_at DESC);
    CREATE INDEX idx_sessions_project ON sessions(project_id);

    CREATE TABLE messages (
        id          TEXT PRIMARY KEY NOT NULL,
        session_id  TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        role        TEXT NOT NULL CHECK (role IN ('user','assistant','system')),
        content     TEXT NOT NULL,
        model_name  TEXT,
        tokens_used INTEGER,
        created_at  TEXT NOT NULL
    );
    CREATE INDEX idx_messages_session ON messages(session_id, created_at);

    CREATE TABLE models (
        id             TEXT PRIMARY KEY NOT NULL,
        name           TEXT NOT NULL UNIQUE,
        display_name   TEXT NOT NULL DEFAULT '',
        description    TEXT NOT NULL DEFAULT '',
        size_bytes     INTEGER NOT NULL DEFAULT 0,
        family         TEXT NOT NULL DEFAULT '',
        format         TEXT NOT NULL DEFAULT '',
        parameter_size TEXT NOT NULL DEFAULT '',
        quantization   TEXT NOT NULL DEFAULT '',
        status         TEXT NOT NULL DEFAULT 'available'
                       CHECK (status IN ('available','downloading','installing','error','removed')),
        is_default     INTEGER NOT NULL DEFAULT 0,
        is_enabled     INTEGER NOT NULL DEFAULT 1,
        progress       REAL,
        created_at     TEXT NOT NULL,
        updated_at     TEXT NOT NULL,
        last_used_at   TEXT
    );

    CREATE TABLE model_configs (
        model_id       TEXT PRIMARY KEY NOT NULL REFERENCES models(id) ON DELETE CASCADE,
        temperature    REAL NOT NULL DEFAULT 0.8,
        top_p          REAL NOT NULL DEFAULT 0.9,
        top_k          INTEGER NOT NULL DEFAULT 40,
        repeat_penalty REAL NOT NULL DEFAULT 1.1,
        context_length INTEGER NOT NULL DEFAULT 4096,
        max_tokens     INTEGER NOT NULL DEFAULT 2048,
        system_prompt  TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE message_embeddings (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id      TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        embedding_model TEXT NOT NULL,
        created_at      TEXT NOT NULL,
        UNIQUE(message_id, embedding_model)
    );

    CREATE TABLE memory_summaries (
        id            TEXT PRIMARY KEY NOT NULL,
        session_id    TEXT REFERENCES sessions(id) ON DELETE CASCADE,
        summary_type  TEXT NOT NULL DEFAULT 'conversation'
                      CHECK (summary_type IN ('conversation','manual','auto')),
        title         TEXT,
        content       TEXT NOT NULL,
        start_time    TEXT,
        end_time      TEXT,
        message_count INTEGER NOT NULL DEFAULT 0,
        created_at    TEXT NOT NULL
    );
    CREATE INDEX idx_summaries_session ON memory_summaries(session_id, created_at DESC);

    CREATE TABLE meta (
        key   TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    );",
];

/// Apply all pending migrations. Each batch runs in its own transaction and
/// bumps `user_version` atomically with its DDL.
pub fn apply(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    for (idx, batch) in MIGRATIONS.iter().enumerate() {
        let version = idx as i64 + 1;
        if version <= current {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(batch).map_err(|e| StoreError::Migration {
            version,
            message: e.to_string(),
        })?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!(version, "applied schema migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply(&mut conn).unwrap();
        apply(&mut conn).unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, MIGRATIONS.len() as i64);
    }

    #[test]
    fn schema_has_expected_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply(&mut conn).unwrap();
        for table in [
            "users",
            "auth_tokens",
            "projects",
            "sessions",
            "messages",
            "models",
            "model_configs",
            "message_embeddings",
            "memory_summaries",
            "meta",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
