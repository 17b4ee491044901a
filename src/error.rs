use axum::{http::StatusCode, Json};
use thiserror::Error;

use crate::db::StoreError;
use crate::models::ErrorResponse;

/// Errors surfaced by the collaboration core.
///
/// Every variant is recoverable from the point of view of a document actor: a bad request is
/// rejected, the actor keeps running. Only transport failures and liveness eviction end a session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollabError {
    /// Missing, malformed or expired credential.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// No collaborator grant and the document is not public.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A viewer attempted a write.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The live state moved on. The client should resynchronize.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Document '{0}' not found")]
    NotFound(String),

    /// Storage failed after the retry budget was spent.
    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Document '{0}' is no longer open")]
    DocumentClosed(String),
}

impl CollabError {
    /// Stable identifier sent to clients in `error` messages.
    pub fn code(&self) -> &'static str {
        match self {
            CollabError::Unauthenticated(_) => "unauthenticated",
            CollabError::Forbidden(_) => "forbidden",
            CollabError::PermissionDenied(_) => "permission_denied",
            CollabError::InvalidOperation(_) => "invalid_operation",
            CollabError::Conflict(_) => "conflict",
            CollabError::NotFound(_) => "not_found",
            CollabError::Storage(_) => "storage",
            CollabError::DocumentClosed(_) => "document_closed",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CollabError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            CollabError::Forbidden(_) | CollabError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            CollabError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            CollabError::Conflict(_) => StatusCode::CONFLICT,
            CollabError::NotFound(_) => StatusCode::NOT_FOUND,
            CollabError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            CollabError::DocumentClosed(_) => StatusCode::GONE,
        }
    }

    /// Websocket close code used when a handshake is refused.
    pub fn close_code(&self) -> u16 {
        match self {
            CollabError::Unauthenticated(_) => 4401,
            CollabError::Forbidden(_) | CollabError::PermissionDenied(_) => 4403,
            CollabError::NotFound(_) => 4404,
            CollabError::InvalidOperation(_) | CollabError::Conflict(_) => 4400,
            CollabError::Storage(_) | CollabError::DocumentClosed(_) => 4500,
        }
    }

    /// Render as the JSON error body used by the REST handlers.
    pub fn to_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        let status = self.status_code();
        (status, Json(ErrorResponse {
            code: status.as_u16(),
            status: status.to_string(),
            error: self.to_string(),
        }))
    }
}

impl From<StoreError> for CollabError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => CollabError::NotFound(id.to_string()),
            e @ StoreError::VersionConflict { .. } => CollabError::Conflict(e.to_string()),
            StoreError::Transient(msg) | StoreError::Fatal(msg) => CollabError::Storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(CollabError::PermissionDenied("x".into()).code(), "permission_denied");
        assert_eq!(CollabError::Conflict("x".into()).code(), "conflict");
        assert_eq!(CollabError::InvalidOperation("x".into()).code(), "invalid_operation");
    }

    #[test]
    fn test_store_error_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(CollabError::from(StoreError::NotFound(id)), CollabError::NotFound(id.to_string()));

        let conflict = CollabError::from(StoreError::VersionConflict { stored: 4, expected: 3 });
        assert!(matches!(conflict, CollabError::Conflict(_)));

        let transient = CollabError::from(StoreError::Transient("pool timed out".into()));
        assert_eq!(transient, CollabError::Storage("pool timed out".into()));
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(CollabError::Unauthenticated("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(CollabError::Forbidden("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(CollabError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(CollabError::NotFound("x".into()).close_code(), 4404);
    }
}
