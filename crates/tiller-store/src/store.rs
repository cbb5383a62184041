use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Once};

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::migrations;

/// Registers the sqlite-vec extension process-wide (once). Must run before
/// any connection opens so every connection sees the vec0 module.
static SQLITE_VEC_INIT: Once = Once::new();

#[allow(clippy::missing_transmute_annotations)]
fn ensure_sqlite_vec_registered() {
    SQLITE_VEC_INIT.call_once(|| {
        // SAFETY: sqlite3_vec_init matches the entry-point signature expected
        // by sqlite3_auto_extension; the symbol is statically linked and
        // valid for the life of the process.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }
        debug!("sqlite-vec extension registered");
    });
}

/// Thread-safe handle to the one logical database.
///
/// Wraps a single SQLite connection in a `Mutex`; WAL mode plus a busy
/// timeout keeps the file case well-behaved under the single-process
/// deployment this system targets. Clones share the connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database file and bring the schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        ensure_sqlite_vec_registered();
        if let Some(dir) = path.as_ref().parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| StoreError::Migration {
                    version: 0,
                    message: format!("create db directory: {e}"),
                })?;
            }
        }
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        ensure_sqlite_vec_registered();
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let mut conn = conn;
        migrations::apply(&mut conn)?;
        info!("store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the shared connection. Domain crates run their SQL through this.
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Run `f` inside a single IMMEDIATE transaction. Commits on Ok; the
    /// transaction rolls back on drop when `f` errors. Generic over the
    /// caller's error type so domain crates keep their own enums.
    pub fn with_tx<T, E>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<rusqlite::Error>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Create the vector tables for dimension `dim`, or verify an existing
    /// schema matches. The dimension is frozen the first time this runs and
    /// boot fails on any later mismatch.
    pub fn ensure_vec_tables(&self, dim: usize) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let existing: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'embedding_dim'",
                [],
                |r| r.get(0),
            )
            .ok();

        if let Some(stored) = existing {
            let stored: usize = stored.parse().map_err(|_| StoreError::Migration {
                version: 0,
                message: format!("corrupt embedding_dim meta value: {stored}"),
            })?;
            if stored != dim {
                return Err(StoreError::DimensionMismatch {
                    expected: stored,
                    actual: dim,
                });
            }
            return Ok(());
        }

        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_messages
                USING vec0(embedding float[{dim}]);
             CREATE VIRTUAL TABLE IF NOT EXISTS vec_summaries
                USING vec0(embedding float[{dim}]);"
        ))?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('embedding_dim', ?1)",
            [dim.to_string()],
        )?;
        info!(dim, "vector tables created");
        Ok(())
    }

    /// The schema's frozen embedding dimension, when the vec tables exist.
    pub fn embedding_dim(&self) -> Result<Option<usize>> {
        let conn = self.conn.lock().unwrap();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'embedding_dim'",
                [],
                |r| r.get(0),
            )
            .ok();
        Ok(value.and_then(|v| v.parse().ok()))
    }
}

/// Serialize an f32 vector into the little-endian blob sqlite-vec expects.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_tables_freeze_dimension() {
        let store = Store::open_in_memory().unwrap();
        store.ensure_vec_tables(4).unwrap();
        assert_eq!(store.embedding_dim().unwrap(), Some(4));

        // Same dimension is fine; a different one must fail.
        store.ensure_vec_tables(4).unwrap();
        let err = store.ensure_vec_tables(8).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 4,
                actual: 8
            }
        ));
    }

    #[test]
    fn with_tx_rolls_back_on_error() {
        let store = Store::open_in_memory().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let result: Result<()> = store.with_tx(|tx| {
            tx.execute(
                "INSERT INTO users (id, username, email, password_hash, created_at, updated_at)
                 VALUES ('u1', 'alice', 'a@x.io', 'h', ?1, ?1)",
                [&now],
            )?;
            Err(StoreError::NotFound("forced".into()))
        });
        assert!(result.is_err());

        let count: i64 = store
            .lock()
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn constraint_violation_is_classified() {
        let store = Store::open_in_memory().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let insert = |store: &Store| -> Result<()> {
            store.lock().execute(
                "INSERT INTO users (id, username, email, password_hash, created_at, updated_at)
                 VALUES ('u1', 'alice', 'a@x.io', 'h', ?1, ?1)",
                [&now],
            )?;
            Ok(())
        };
        insert(&store).unwrap();
        let err = insert(&store).unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[test]
    fn vector_blob_layout_is_little_endian_f32() {
        let blob = vector_to_blob(&[1.0, -2.0]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[0..4], &1.0_f32.to_le_bytes());
        assert_eq!(&blob[4..8], &(-2.0_f32).to_le_bytes());
    }

    #[test]
    fn file_backed_store_reopens_with_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiller.db");
        {
            let store = Store::open(&path).unwrap();
            store.ensure_vec_tables(4).unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.embedding_dim().unwrap(), Some(4));
    }
}
