use std::sync::Arc;

use chrono::DateTime;
use tiller_store::store::vector_to_blob;
use tiller_store::{Store, StoreError};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::embedding::EmbeddingService;
use crate::error::{MemoryError, Result};
use crate::types::*;

/// Semantic memory over the message store: vector indexing, cosine top-k
/// retrieval, summaries, and temporal gap detection.
pub struct SemanticMemory {
    store: Store,
    embedder: Arc<EmbeddingService>,
}

impl SemanticMemory {
    pub fn new(store: Store, embedder: Arc<EmbeddingService>) -> Self {
        Self { store, embedder }
    }

    pub fn embedder(&self) -> &Arc<EmbeddingService> {
        &self.embedder
    }

    /// Embed `text` and upsert the vector for `message_id`. At most one
    /// vector exists per (message, embedding model) pair.
    #[instrument(skip(self, text), fields(message_id))]
    pub async fn index(&self, message_id: &str, text: &str) -> Result<()> {
        let vector = self.embedder.embed(text).await?;
        let blob = vector_to_blob(&vector);
        let model = self.embedder.model().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let message_id = message_id.to_string();

        self.store.with_tx(|tx| -> Result<()> {
            tx.execute(
                "INSERT INTO message_embeddings (message_id, embedding_model, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(message_id, embedding_model) DO NOTHING",
                rusqlite::params![message_id, model, now],
            )?;
            let rowid: i64 = tx.query_row(
                "SELECT id FROM message_embeddings
                 WHERE message_id = ?1 AND embedding_model = ?2",
                rusqlite::params![message_id, model],
                |r| r.get(0),
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO vec_messages (rowid, embedding) VALUES (?1, ?2)",
                rusqlite::params![rowid, blob],
            )?;
            Ok(())
        })?;

        debug!("message indexed");
        Ok(())
    }

    /// Top-`limit` messages by ascending cosine distance to the query.
    /// Ties break on `created_at DESC`; similarity is `1 − distance`
    /// clipped to [0, 1].
    #[instrument(skip(self, query), fields(limit))]
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.embed(query).await?;
        let blob = vector_to_blob(&vector);
        let model = self.embedder.model().to_string();

        let conn = self.store.lock();
        let mut stmt = conn.prepare(
            "SELECT m.id, m.session_id, m.role, m.content, m.created_at,
                    vec_distance_cosine(v.embedding, ?1) AS distance
             FROM vec_messages v
             JOIN message_embeddings e ON e.id = v.rowid
             JOIN messages m ON m.id = e.message_id
             JOIN sessions s ON s.id = m.session_id
             WHERE e.embedding_model = ?2
               AND (?3 IS NULL OR m.session_id = ?3)
               AND (?4 IS NULL OR s.user_id = ?4)
             ORDER BY distance ASC, m.created_at DESC
             LIMIT ?5",
        )?;

        let rows = stmt.query_map(
            rusqlite::params![
                blob,
                model,
                filters.session_id.as_deref(),
                filters.user_id.as_deref(),
                limit as i64
            ],
            |row| {
                let role: String = row.get(2)?;
                let distance: f64 = row.get(5)?;
                Ok(SearchHit {
                    message_id: row.get(0)?,
                    session_id: row.get(1)?,
                    role: role.parse().unwrap_or(tiller_core::Role::User),
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                    similarity: (1.0 - distance as f32).clamp(0.0, 1.0),
                })
            },
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Store a summary; when content is present its vector is indexed
    /// best-effort (an embedding failure never loses the summary).
    pub async fn create_summary(&self, new: NewSummary) -> Result<MemorySummary> {
        if new.content.trim().is_empty() {
            return Err(MemoryError::InvalidInput("summary content is empty".into()));
        }

        let id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let summary = MemorySummary {
            id: id.clone(),
            session_id: new.session_id.clone(),
            summary_type: new.summary_type,
            title: new.title.clone(),
            content: new.content.clone(),
            start_time: None,
            end_time: None,
            message_count: new.message_count,
            created_at: now.clone(),
        };

        {
            let conn = self.store.lock();
            conn.execute(
                "INSERT INTO memory_summaries
                 (id, session_id, summary_type, title, content, message_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id,
                    new.session_id,
                    new.summary_type.to_string(),
                    new.title,
                    new.content,
                    new.message_count,
                    now
                ],
            )
            .map_err(StoreError::from)?;
        }

        match self.embedder.embed(&new.content).await {
            Ok(vector) => {
                let blob = vector_to_blob(&vector);
                let conn = self.store.lock();
                // Summary ids are uuids; vec rowids are integers, so the
                // sqlite rowid of the summary row keys the vector.
                let rowid: i64 = conn
                    .query_row(
                        "SELECT rowid FROM memory_summaries WHERE id = ?1",
                        [&id],
                        |r| r.get(0),
                    )
                    .map_err(StoreError::from)?;
                conn.execute(
                    "INSERT OR REPLACE INTO vec_summaries (rowid, embedding) VALUES (?1, ?2)",
                    rusqlite::params![rowid, blob],
                )
                .map_err(StoreError::from)?;
            }
            Err(e) => warn!(error = %e, "summary embedding skipped"),
        }

        Ok(summary)
    }

    /// Summaries newest-first, optionally filtered by session and type.
    pub fn list_summaries(
        &self,
        session_id: Option<&str>,
        summary_type: Option<SummaryType>,
    ) -> Result<Vec<MemorySummary>> {
        let conn = self.store.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, summary_type, title, content,
                    start_time, end_time, message_count, created_at
             FROM memory_summaries
             WHERE (?1 IS NULL OR session_id = ?1)
               AND (?2 IS NULL OR summary_type = ?2)
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![session_id, summary_type.map(|t| t.to_string())],
            row_to_summary,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Scan a session's messages in order and report every silence longer
    /// than `threshold`. Output is recomputed, never stored.
    pub fn detect_gaps(
        &self,
        session_id: &str,
        threshold: chrono::Duration,
    ) -> Result<Vec<MemoryGap>> {
        let conn = self.store.lock();
        let mut stmt = conn.prepare(
            "SELECT created_at FROM messages
             WHERE session_id = ?1
             ORDER BY created_at ASC",
        )?;
        let timestamps: Vec<String> = stmt
            .query_map([session_id], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        let mut gaps = Vec::new();
        for pair in timestamps.windows(2) {
            let (Ok(prev), Ok(next)) = (
                DateTime::parse_from_rfc3339(&pair[0]),
                DateTime::parse_from_rfc3339(&pair[1]),
            ) else {
                warn!(session_id, "unparseable message timestamp; skipping pair");
                continue;
            };
            let delta = next.signed_duration_since(prev);
            if delta > threshold {
                gaps.push(MemoryGap {
                    session_id: session_id.to_string(),
                    gap_start: pair[0].clone(),
                    gap_end: pair[1].clone(),
                    gap_type: GapType::Temporal,
                    duration_secs: delta.num_seconds(),
                });
            }
        }
        Ok(gaps)
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemorySummary> {
    let type_str: String = row.get(2)?;
    Ok(MemorySummary {
        id: row.get(0)?,
        session_id: row.get(1)?,
        summary_type: type_str.parse().unwrap_or(SummaryType::Conversation),
        title: row.get(3)?,
        content: row.get(4)?,
        start_time: row.get(5)?,
        end_time: row.get(6)?,
        message_count: row.get::<_, i64>(7)? as u32,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tiller_runtime::{
        GenerateReply, GenerateRequest, ModelDescriptor, PullProgress, RuntimeClient,
        RuntimeError, TokenEvent,
    };
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// Keyword-keyed embeddings: "foo" texts map to one axis, everything
    /// else to another, so cosine ranking is deterministic.
    struct KeywordRuntime;

    #[async_trait]
    impl RuntimeClient for KeywordRuntime {
        async fn list_installed(&self) -> tiller_runtime::error::Result<Vec<ModelDescriptor>> {
            Ok(vec![])
        }
        async fn generate(
            &self,
            _req: &GenerateRequest,
            _cancel: &CancellationToken,
        ) -> tiller_runtime::error::Result<GenerateReply> {
            Err(RuntimeError::Unavailable("embed only".into()))
        }
        async fn generate_stream(
            &self,
            _req: &GenerateRequest,
            _tx: mpsc::Sender<TokenEvent>,
            _cancel: CancellationToken,
        ) -> tiller_runtime::error::Result<()> {
            Err(RuntimeError::Unavailable("embed only".into()))
        }
        async fn embed(&self, _model: &str, text: &str) -> tiller_runtime::error::Result<Vec<f32>> {
            if text.contains("foo") {
                Ok(vec![1.0, 0.0, 0.1, 0.0])
            } else {
                Ok(vec![0.0, 1.0, 0.0, 0.1])
            }
        }
        async fn pull(
            &self,
            _name: &str,
            _tx: mpsc::Sender<PullProgress>,
            _cancel: CancellationToken,
        ) -> tiller_runtime::error::Result<()> {
            Ok(())
        }
        async fn delete(&self, _name: &str) -> tiller_runtime::error::Result<()> {
            Ok(())
        }
        async fn health(&self) -> tiller_runtime::error::Result<()> {
            Ok(())
        }
    }

    fn memory_fixture() -> SemanticMemory {
        let store = Store::open_in_memory().unwrap();
        store.ensure_vec_tables(4).unwrap();
        seed_session(&store, "u1", "s1");
        let embedder = Arc::new(EmbeddingService::new(
            Arc::new(KeywordRuntime),
            "nomic-embed-text",
            Some(4),
        ));
        SemanticMemory::new(store, embedder)
    }

    fn seed_session(store: &Store, user_id: &str, session_id: &str) {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = store.lock();
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, created_at, updated_at)
             VALUES (?1, ?1, ?1 || '@x.io', 'h', ?2, ?2)",
            rusqlite::params![user_id, now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO sessions (id, user_id, title, created_at, updated_at)
             VALUES (?1, ?2, 't', ?3, ?3)",
            rusqlite::params![session_id, user_id, now],
        )
        .unwrap();
    }

    fn seed_message(memory: &SemanticMemory, id: &str, session: &str, content: &str, at: &str) {
        memory
            .store
            .lock()
            .execute(
                "INSERT INTO messages (id, session_id, role, content, created_at)
                 VALUES (?1, ?2, 'user', ?3, ?4)",
                rusqlite::params![id, session, content, at],
            )
            .unwrap();
    }

    #[tokio::test]
    async fn indexed_message_is_found_by_meaning() {
        let memory = memory_fixture();
        let now = chrono::Utc::now().to_rfc3339();
        seed_message(&memory, "m1", "s1", "tell me about foo", &now);
        seed_message(&memory, "m2", "s1", "unrelated chatter", &now);
        memory.index("m1", "tell me about foo").await.unwrap();
        memory.index("m2", "unrelated chatter").await.unwrap();

        let hits = memory
            .search("what was that foo thing", &SearchFilters::default(), 3)
            .await
            .unwrap();
        assert_eq!(hits[0].message_id, "m1");
        assert!(hits[0].similarity > 0.5);
    }

    #[tokio::test]
    async fn reindexing_same_message_keeps_one_vector() {
        let memory = memory_fixture();
        let now = chrono::Utc::now().to_rfc3339();
        seed_message(&memory, "m1", "s1", "foo", &now);
        memory.index("m1", "foo").await.unwrap();
        memory.index("m1", "foo").await.unwrap();

        let count: i64 = memory
            .store
            .lock()
            .query_row("SELECT COUNT(*) FROM message_embeddings", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn search_respects_owner_filter() {
        let memory = memory_fixture();
        seed_session(&memory.store, "u2", "s2");
        let now = chrono::Utc::now().to_rfc3339();
        seed_message(&memory, "m1", "s1", "foo from alice", &now);
        seed_message(&memory, "m2", "s2", "foo from bob", &now);
        memory.index("m1", "foo from alice").await.unwrap();
        memory.index("m2", "foo from bob").await.unwrap();

        let filters = SearchFilters {
            user_id: Some("u2".into()),
            ..Default::default()
        };
        let hits = memory.search("foo", &filters, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message_id, "m2");
    }

    #[tokio::test]
    async fn gap_detection_finds_the_one_silence() {
        let memory = memory_fixture();
        let base = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap();
        // t=0, t=10s, t=10m, t=10m5s; threshold 1m yields exactly one gap.
        let times = [0, 10, 600, 605];
        for (i, secs) in times.iter().enumerate() {
            let at = (base + chrono::Duration::seconds(*secs)).to_rfc3339();
            seed_message(&memory, &format!("m{i}"), "s1", "hi", &at);
        }

        let gaps = memory
            .detect_gaps("s1", chrono::Duration::minutes(1))
            .unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].gap_type, GapType::Temporal);
        assert_eq!(gaps[0].duration_secs, 590);
    }

    #[tokio::test]
    async fn summaries_list_newest_first_and_filter_by_type() {
        let memory = memory_fixture();
        memory
            .create_summary(NewSummary {
                session_id: Some("s1".into()),
                summary_type: SummaryType::Manual,
                title: Some("first".into()),
                content: "foo happened".into(),
                message_count: 2,
            })
            .await
            .unwrap();
        memory
            .create_summary(NewSummary {
                session_id: Some("s1".into()),
                summary_type: SummaryType::Auto,
                title: None,
                content: "then bar".into(),
                message_count: 3,
            })
            .await
            .unwrap();

        let all = memory.list_summaries(Some("s1"), None).unwrap();
        assert_eq!(all.len(), 2);

        let manual = memory
            .list_summaries(Some("s1"), Some(SummaryType::Manual))
            .unwrap();
        assert_eq!(manual.len(), 1);
        assert_eq!(manual[0].title.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn empty_summary_content_is_rejected() {
        let memory = memory_fixture();
        let err = memory
            .create_summary(NewSummary {
                session_id: None,
                summary_type: SummaryType::Manual,
                title: None,
                content: "   ".into(),
                message_count: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
    }
}
