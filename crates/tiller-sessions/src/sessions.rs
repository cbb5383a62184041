use tiller_core::Role;
use tiller_store::Store;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::types::{Message, Session};

/// Number of characters of the first message used as a derived title.
const TITLE_CHARS: usize = 50;

/// Ownership-scoped session and message storage.
#[derive(Clone)]
pub struct SessionStore {
    store: Store,
}

impl SessionStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Create a session. `title_seed` is trimmed to the derived-title length.
    #[instrument(skip(self, title_seed), fields(user_id))]
    pub fn create(
        &self,
        user_id: &str,
        title_seed: &str,
        project_id: Option<&str>,
    ) -> Result<Session> {
        let id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let title = derive_title(title_seed);

        let conn = self.store.lock();
        conn.execute(
            "INSERT INTO sessions (id, user_id, project_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![id, user_id, project_id, title, now],
        )?;
        debug!(session_id = %id, "session created");

        Ok(Session {
            id,
            user_id: user_id.to_string(),
            project_id: project_id.map(String::from),
            title,
            archived: false,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Fetch a session and verify ownership. `NotFound` when the row is
    /// absent, `Forbidden` when it belongs to someone else.
    pub fn get_owned(&self, session_id: &str, user_id: &str) -> Result<Session> {
        let conn = self.store.lock();
        let session = conn
            .query_row(
                "SELECT id, user_id, project_id, title, archived, created_at, updated_at
                 FROM sessions WHERE id = ?1",
                [session_id],
                row_to_session,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    SessionError::NotFound(format!("session {session_id}"))
                }
                other => other.into(),
            })?;

        if session.user_id != user_id {
            return Err(SessionError::Forbidden(format!("session {session_id}")));
        }
        Ok(session)
    }

    /// Resolve the session for a chat turn: verify ownership when an id is
    /// given, otherwise mint a new session titled from the first message.
    pub fn ensure(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        title_seed: &str,
    ) -> Result<Session> {
        match session_id {
            Some(id) => self.get_owned(id, user_id),
            None => self.create(user_id, title_seed, None),
        }
    }

    /// Sessions for a user, most recently updated first. Archived sessions
    /// are excluded.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let conn = self.store.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, project_id, title, archived, created_at, updated_at
             FROM sessions
             WHERE user_id = ?1 AND archived = 0
             ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([user_id], row_to_session)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Sessions attached to a project (ownership enforced on the project by
    /// the caller). Archived sessions are excluded.
    pub fn list_for_project(&self, project_id: &str) -> Result<Vec<Session>> {
        let conn = self.store.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, project_id, title, archived, created_at, updated_at
             FROM sessions
             WHERE project_id = ?1 AND archived = 0
             ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([project_id], row_to_session)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Update a session's title.
    pub fn update_title(&self, session_id: &str, user_id: &str, title: &str) -> Result<Session> {
        self.get_owned(session_id, user_id)?;
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.store.lock();
        conn.execute(
            "UPDATE sessions SET title = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![title, now, session_id],
        )?;
        drop(conn);
        self.get_owned(session_id, user_id)
    }

    /// Delete a session, its messages, and their vectors. Messages and
    /// embedding rows cascade via foreign keys; the vec0 virtual tables do
    /// not participate in cascades, so their rows are cleared explicitly
    /// inside the same transaction.
    #[instrument(skip(self), fields(session_id, user_id))]
    pub fn delete(&self, session_id: &str, user_id: &str) -> Result<()> {
        self.get_owned(session_id, user_id)?;
        let session_id = session_id.to_string();
        self.store.with_tx(|tx| -> Result<()> {
            tx.execute(
                "DELETE FROM vec_messages WHERE rowid IN (
                    SELECT e.id FROM message_embeddings e
                    JOIN messages m ON m.id = e.message_id
                    WHERE m.session_id = ?1)",
                [&session_id],
            )?;
            tx.execute(
                "DELETE FROM vec_summaries WHERE rowid IN (
                    SELECT rowid FROM memory_summaries WHERE session_id = ?1)",
                [&session_id],
            )?;
            tx.execute("DELETE FROM sessions WHERE id = ?1", [&session_id])?;
            Ok(())
        })?;
        debug!("session deleted");
        Ok(())
    }

    /// Insert a message and bump the session's `updated_at` to the message
    /// timestamp, in one transaction.
    pub fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        model_name: Option<&str>,
        tokens_used: Option<u32>,
    ) -> Result<Message> {
        let id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let message = Message {
            id: id.clone(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            model_name: model_name.map(String::from),
            tokens_used,
            created_at: now.clone(),
        };

        let session_id = session_id.to_string();
        let changed = self.store.with_tx(|tx| -> Result<usize> {
            tx.execute(
                "INSERT INTO messages (id, session_id, role, content, model_name, tokens_used, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id,
                    session_id,
                    role.to_string(),
                    content,
                    model_name,
                    tokens_used,
                    now
                ],
            )?;
            let changed = tx.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, session_id],
            )?;
            Ok(changed)
        })?;
        if changed == 0 {
            return Err(SessionError::NotFound(format!("session {session_id}")));
        }
        Ok(message)
    }

    /// A session's messages, oldest first. Ownership verified.
    pub fn list_messages(&self, session_id: &str, user_id: &str) -> Result<Vec<Message>> {
        self.get_owned(session_id, user_id)?;
        let conn = self.store.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, model_name, tokens_used, created_at
             FROM messages
             WHERE session_id = ?1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([session_id], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// The most recent `limit` messages, returned oldest first (the shape
    /// the prompt builder wants).
    pub fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let conn = self.store.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, model_name, tokens_used, created_at
             FROM messages
             WHERE session_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![session_id, limit as i64], row_to_message)?;
        let mut msgs: Vec<_> = rows.filter_map(|r| r.ok()).collect();
        msgs.reverse();
        Ok(msgs)
    }
}

/// Trim the first message down to a presentable session title.
fn derive_title(seed: &str) -> String {
    let trimmed = seed.trim();
    if trimmed.is_empty() {
        return "New chat".to_string();
    }
    let title: String = trimmed.chars().take(TITLE_CHARS).collect();
    if trimmed.chars().count() > TITLE_CHARS {
        format!("{title}…")
    } else {
        title
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        project_id: row.get(2)?,
        title: row.get(3)?,
        archived: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: role.parse().unwrap_or(Role::User),
        content: row.get(3)?,
        model_name: row.get(4)?,
        tokens_used: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> SessionStore {
        let store = Store::open_in_memory().unwrap();
        store.ensure_vec_tables(4).unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        {
            let conn = store.lock();
            for user in ["u1", "u2"] {
                conn.execute(
                    "INSERT INTO users (id, username, email, password_hash, created_at, updated_at)
                     VALUES (?1, ?1, ?1 || '@x.io', 'h', ?2, ?2)",
                    rusqlite::params![user, now],
                )
                .unwrap();
            }
        }
        SessionStore::new(store)
    }

    #[test]
    fn ensure_mints_session_with_derived_title() {
        let sessions = fixture();
        let s = sessions
            .ensure("u1", None, "please explain lifetimes to me")
            .unwrap();
        assert_eq!(s.title, "please explain lifetimes to me");
        assert_eq!(s.user_id, "u1");

        // Existing id resolves to the same session.
        let again = sessions.ensure("u1", Some(&s.id), "ignored").unwrap();
        assert_eq!(again.id, s.id);
    }

    #[test]
    fn long_seed_is_trimmed_with_ellipsis() {
        let sessions = fixture();
        let seed = "x".repeat(80);
        let s = sessions.create("u1", &seed, None).unwrap();
        assert_eq!(s.title.chars().count(), TITLE_CHARS + 1);
        assert!(s.title.ends_with('…'));
    }

    #[test]
    fn cross_user_access_is_forbidden() {
        let sessions = fixture();
        let s = sessions.create("u1", "mine", None).unwrap();
        let err = sessions.get_owned(&s.id, "u2").unwrap_err();
        assert!(matches!(err, SessionError::Forbidden(_)));

        let err = sessions.get_owned("missing", "u2").unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[test]
    fn add_message_bumps_session_updated_at() {
        let sessions = fixture();
        let s = sessions.create("u1", "chat", None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let m = sessions
            .add_message(&s.id, Role::User, "hello", None, None)
            .unwrap();

        let reloaded = sessions.get_owned(&s.id, "u1").unwrap();
        assert_eq!(reloaded.updated_at, m.created_at);
        assert!(reloaded.updated_at > s.updated_at);
    }

    #[test]
    fn messages_list_in_chronological_order() {
        let sessions = fixture();
        let s = sessions.create("u1", "chat", None).unwrap();
        sessions
            .add_message(&s.id, Role::User, "first", None, None)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        sessions
            .add_message(&s.id, Role::Assistant, "second", Some("m1"), Some(12))
            .unwrap();

        let msgs = sessions.list_messages(&s.id, "u1").unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "first");
        assert_eq!(msgs[1].content, "second");
        assert_eq!(msgs[1].tokens_used, Some(12));
    }

    #[test]
    fn delete_cascades_messages() {
        let sessions = fixture();
        let s = sessions.create("u1", "chat", None).unwrap();
        sessions
            .add_message(&s.id, Role::User, "hello", None, None)
            .unwrap();
        sessions.delete(&s.id, "u1").unwrap();

        let count: i64 = sessions
            .store
            .lock()
            .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(matches!(
            sessions.get_owned(&s.id, "u1"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn recent_messages_returns_tail_oldest_first() {
        let sessions = fixture();
        let s = sessions.create("u1", "chat", None).unwrap();
        for i in 0..5 {
            sessions
                .add_message(&s.id, Role::User, &format!("msg {i}"), None, None)
                .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let recent = sessions.recent_messages(&s.id, 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "msg 3");
        assert_eq!(recent[1].content, "msg 4");
    }
}
