use serde::{Deserialize, Serialize};
use tiller_core::Role;

/// One semantic search result, ordered by ascending cosine distance.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub message_id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
    /// `1 − cosine distance`, clipped to [0, 1]. Higher is closer.
    pub similarity: f32,
}

/// Optional narrowing of a semantic search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryType {
    Conversation,
    Manual,
    Auto,
}

impl std::fmt::Display for SummaryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummaryType::Conversation => write!(f, "conversation"),
            SummaryType::Manual => write!(f, "manual"),
            SummaryType::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for SummaryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(SummaryType::Conversation),
            "manual" => Ok(SummaryType::Manual),
            "auto" => Ok(SummaryType::Auto),
            other => Err(format!("unknown summary type: {}", other)),
        }
    }
}

/// A stored memory summary, optionally scoped to a session.
#[derive(Debug, Clone, Serialize)]
pub struct MemorySummary {
    pub id: String,
    pub session_id: Option<String>,
    pub summary_type: SummaryType,
    pub title: Option<String>,
    pub content: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub message_count: u32,
    pub created_at: String,
}

/// Input for `create_summary`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSummary {
    pub session_id: Option<String>,
    pub summary_type: SummaryType,
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub message_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GapType {
    Temporal,
    /// Present in the data model but no detector exists for it.
    Topical,
}

/// A detected silence in a session's timeline. Recomputed from messages on
/// demand, never the source of truth.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryGap {
    pub session_id: String,
    pub gap_start: String,
    pub gap_end: String,
    pub gap_type: GapType,
    pub duration_secs: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn summary_type_round_trips() {
        for t in [SummaryType::Conversation, SummaryType::Manual, SummaryType::Auto] {
            assert_eq!(SummaryType::from_str(&t.to_string()).unwrap(), t);
        }
    }
}
