use serde::Serialize;

/// A registered account. The password hash never leaves this crate and is
/// never serialized.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    /// UUIDv7 — time-sortable.
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: String,
    #[serde(skip)]
    pub(crate) password_hash: String,
}
