pub mod memstore;
pub mod pgstore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Document, DocumentSave, Role};

pub use memstore::MemoryStore;
pub use pgstore::PgStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Document '{0}' not found")]
    NotFound(Uuid),

    #[error("Stored version {stored} does not match expected version {expected}")]
    VersionConflict { stored: i64, expected: i64 },

    /// Worth retrying: pool exhaustion, dropped connections.
    #[error("Transient storage failure: {0}")]
    Transient(String),

    #[error("Storage failure: {0}")]
    Fatal(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
                StoreError::Transient(err.to_string())
            }
            other => StoreError::Fatal(other.to_string()),
        }
    }
}

/// Durable storage for documents and collaborator grants.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load_document(&self, id: Uuid) -> Result<Document, StoreError>;

    /// The explicit grant of `user_id` on the document, if any.
    async fn collaborator_role(&self, document_id: Uuid, user_id: &str) -> Result<Option<Role>, StoreError>;

    /// Persist a save and return the stored version.
    ///
    /// Succeeds when storage holds `expected_version`, or already holds `version` (a retried
    /// save). Fails with `VersionConflict` otherwise.
    async fn save_document(&self, save: &DocumentSave) -> Result<i64, StoreError>;
}
