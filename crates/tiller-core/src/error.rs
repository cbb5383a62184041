use thiserror::Error;

/// Workspace-wide error taxonomy. Subsystem crates define their own error
/// enums and convert into this one at the service boundary; the gateway maps
/// it onto an HTTP status and a problem payload.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("embedding dimension mismatch: schema {expected}, model produced {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status the gateway reports for this error.
    pub fn status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::RuntimeUnavailable(_) => 503,
            Error::DimensionMismatch { .. } => 500,
            Error::Storage(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in problem `type` URNs and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not-found",
            Error::Conflict(_) => "conflict",
            Error::RuntimeUnavailable(_) => "runtime-unavailable",
            Error::DimensionMismatch { .. } => "dimension-mismatch",
            Error::Storage(_) => "storage",
            Error::Internal(_) => "internal",
        }
    }

    /// Human title for the problem payload.
    pub fn title(&self) -> &'static str {
        match self {
            Error::Validation(_) => "Validation Error",
            Error::Unauthorized(_) => "Unauthorized",
            Error::Forbidden(_) => "Forbidden",
            Error::NotFound(_) => "Not Found",
            Error::Conflict(_) => "Conflict",
            Error::RuntimeUnavailable(_) => "Runtime Unavailable",
            Error::DimensionMismatch { .. } => "Embedding Dimension Mismatch",
            Error::Storage(_) => "Storage Error",
            Error::Internal(_) => "Internal Error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_http_families() {
        assert_eq!(Error::Validation("x".into()).status(), 400);
        assert_eq!(Error::Unauthorized("x".into()).status(), 401);
        assert_eq!(Error::Forbidden("x".into()).status(), 403);
        assert_eq!(Error::NotFound("x".into()).status(), 404);
        assert_eq!(Error::Conflict("x".into()).status(), 409);
        assert_eq!(Error::RuntimeUnavailable("x".into()).status(), 503);
        assert_eq!(
            Error::DimensionMismatch {
                expected: 768,
                actual: 384
            }
            .status(),
            500
        );
    }
}
