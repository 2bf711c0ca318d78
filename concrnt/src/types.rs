//! Error types shared across the server
//!
//! Every service returns `ConcrntError`; the HTTP layer maps the kind to a
//! status code. Cache layers never produce these - a cache failure is a
//! miss and the caller falls through to durable storage.

use hyper::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConcrntError>;

#[derive(Debug, Error)]
pub enum ConcrntError {
    /// Repository miss
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-key violation
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Policy summary was not allow
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Bad or missing JWT / passport
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed document, wrong domain, bad signature
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Peer RPC or DNS failure; retry may help
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// DB or cache infrastructure failure
    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ConcrntError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ConcrntError::NotFound(_) => StatusCode::NOT_FOUND,
            ConcrntError::AlreadyExists(_) => StatusCode::CONFLICT,
            ConcrntError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ConcrntError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ConcrntError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ConcrntError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ConcrntError::Database(_) | ConcrntError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<mongodb::error::Error> for ConcrntError {
    fn from(e: mongodb::error::Error) -> Self {
        use mongodb::error::{ErrorKind, WriteFailure};
        // E11000: duplicate key
        if let ErrorKind::Write(WriteFailure::WriteError(ref we)) = *e.kind {
            if we.code == 11000 {
                return ConcrntError::AlreadyExists("duplicate key".into());
            }
        }
        ConcrntError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for ConcrntError {
    fn from(e: serde_json::Error) -> Self {
        ConcrntError::InvalidInput(format!("malformed document: {e}"))
    }
}

impl From<reqwest::Error> for ConcrntError {
    fn from(e: reqwest::Error) -> Self {
        ConcrntError::Upstream(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ConcrntError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ConcrntError::AlreadyExists("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ConcrntError::PermissionDenied("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ConcrntError::Upstream("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
