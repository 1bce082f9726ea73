use thiserror::Error;

/// Errors the HTTP boundary needs to map to a status code.
///
/// Internal plumbing (store I/O, analyzer/RCA passes) propagates `anyhow::Error`
/// as usual; this type exists only where a caller needs to distinguish
/// "not found" and "bad request" from an opaque failure.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
