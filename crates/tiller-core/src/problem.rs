use serde::Serialize;

use crate::error::Error;

/// RFC 7807-style problem payload returned by every error response.
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    /// URN identifying the error class, e.g. `urn:tiller:error:validation`.
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    /// Request path that produced the error.
    pub instance: String,
    /// RFC3339 timestamp of when the error was produced.
    pub timestamp: String,
}

impl Problem {
    pub fn from_error(err: &Error, instance: &str) -> Self {
        Self {
            problem_type: format!("urn:tiller:error:{}", err.code()),
            title: err.title().to_string(),
            status: err.status(),
            detail: err.to_string(),
            instance: instance.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_carries_status_and_type() {
        let p = Problem::from_error(&Error::NotFound("session s-1".into()), "/v1/sessions/s-1");
        assert_eq!(p.status, 404);
        assert_eq!(p.problem_type, "urn:tiller:error:not-found");
        assert_eq!(p.instance, "/v1/sessions/s-1");
        assert!(p.detail.contains("s-1"));
    }
}
