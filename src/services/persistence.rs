use std::future::Future;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::RetryPolicy;
use crate::db::{DocumentStore, StoreError};
use crate::error::CollabError;
use crate::models::{Document, DocumentSave, Role};

/// The only path from the collaboration core to durable storage.
///
/// Transient store failures are retried with linear backoff. Saves carry the full payload,
/// so a retry never re-derives content.
pub struct PersistenceAdapter {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl PersistenceAdapter {
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub async fn load(&self, id: Uuid) -> Result<Document, CollabError> {
        self.with_retry("load", id, || self.store.load_document(id)).await
    }

    pub async fn collaborator_role(&self, id: Uuid, user_id: &str) -> Result<Option<Role>, CollabError> {
        self.with_retry("role lookup", id, || self.store.collaborator_role(id, user_id))
            .await
    }

    /// Persist a save and return the stored version.
    pub async fn save(&self, save: &DocumentSave) -> Result<i64, CollabError> {
        self.with_retry("save", save.id, || self.store.save_document(save)).await
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, id: Uuid, mut call: F) -> Result<T, CollabError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(StoreError::Transient(e)) if attempt < self.retry.attempts => {
                    warn!(
                        "Transient {} failure for document {} (attempt {}/{}): {}",
                        what, id, attempt, self.retry.attempts, e
                    );
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    if matches!(e, StoreError::Transient(_)) {
                        error!("Giving up on {} for document {} after {} attempts: {}", what, id, attempt, e);
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use std::time::Duration;

    fn adapter(store: Arc<MemoryStore>, attempts: u32) -> PersistenceAdapter {
        PersistenceAdapter::new(store, RetryPolicy { attempts, backoff: Duration::from_millis(10) })
    }

    fn save_for(doc: &Document) -> DocumentSave {
        DocumentSave {
            id: doc.id,
            title: doc.title.clone(),
            content: "persisted".to_string(),
            is_public: false,
            version: doc.version + 1,
            expected_version: doc.version,
            last_editor: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let store = Arc::new(MemoryStore::new());
        let doc = Document::new(Uuid::new_v4(), "Draft", "alice");
        store.insert_document(doc.clone()).await;
        store.inject_transient_save_failures(2);

        let persistence = adapter(store.clone(), 3);
        assert_eq!(persistence.save(&save_for(&doc)).await, Ok(2));
        assert_eq!(persistence.load(doc.id).await.unwrap().content, "persisted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_storage_error() {
        let store = Arc::new(MemoryStore::new());
        let doc = Document::new(Uuid::new_v4(), "Draft", "alice");
        store.insert_document(doc.clone()).await;
        store.inject_transient_save_failures(5);

        let persistence = adapter(store.clone(), 3);
        assert!(matches!(persistence.save(&save_for(&doc)).await, Err(CollabError::Storage(_))));
        assert_eq!(persistence.load(doc.id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_conflicts_are_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let doc = Document::new(Uuid::new_v4(), "Draft", "alice").with_version(4);
        store.insert_document(doc.clone()).await;

        let persistence = adapter(store, 3);
        let mut stale = save_for(&doc);
        stale.expected_version = 2;
        stale.version = 9;
        assert!(matches!(persistence.save(&stale).await, Err(CollabError::Conflict(_))));
    }
}
