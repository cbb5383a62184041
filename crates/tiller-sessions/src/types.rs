use serde::Serialize;
use tiller_core::Role;

/// A persisted conversation session. Lazy-created on the first chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// UUIDv7 — time-sortable.
    pub id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A grouping of sessions. Deleting a project detaches its sessions.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// One stored message, ordered by `created_at` within its session.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub model_name: Option<String>,
    pub tokens_used: Option<u32>,
    pub created_at: String,
}
