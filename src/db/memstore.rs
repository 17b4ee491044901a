use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::{DocumentStore, StoreError};
use crate::models::{Collaborator, Document, DocumentSave, Role};

/// In-process document store.
///
/// Used when no database is configured and by the test suites. Keeps the one-owner-per-document
/// rule the relational schema enforces.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<Uuid, Document>>,
    collaborators: RwLock<HashMap<(Uuid, String), Collaborator>>,
    failing_saves: AtomicU32,
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    documents: Vec<SeedDocument>,
    #[serde(default)]
    collaborators: Vec<SeedCollaborator>,
}

#[derive(Debug, Deserialize)]
struct SeedDocument {
    id: Uuid,
    title: String,
    #[serde(default)]
    content: String,
    owner: String,
    #[serde(default)]
    is_public: bool,
    #[serde(default = "default_seed_version")]
    version: i64,
}

fn default_seed_version() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
struct SeedCollaborator {
    document_id: Uuid,
    user_id: String,
    role: Role,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a JSON seed file of documents and collaborators.
    pub async fn from_seed_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::Fatal(format!("Failed to read seed file {}: {}", path.display(), e)))?;
        let seed: SeedFile = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Fatal(format!("Failed to parse seed file {}: {}", path.display(), e)))?;

        let store = Self::new();
        for doc in seed.documents {
            let document = Document::new(doc.id, doc.title, doc.owner)
                .with_content(doc.content)
                .with_public(doc.is_public)
                .with_version(doc.version);
            store.insert_document(document).await;
        }
        for grant in seed.collaborators {
            store.add_collaborator(grant.document_id, &grant.user_id, grant.role).await?;
        }
        info!(
            "Seeded in-memory store from {} ({} documents)",
            path.display(),
            store.documents.read().await.len()
        );
        Ok(store)
    }

    /// Insert or replace a document. Its owner is granted the owner role.
    pub async fn insert_document(&self, document: Document) {
        let owner = Collaborator {
            document_id: document.id,
            user_id: document.owner.clone(),
            role: Role::Owner,
            joined_at: document.created_at,
        };
        let mut collaborators = self.collaborators.write().await;
        collaborators.retain(|(doc, _), c| *doc != document.id || c.role != Role::Owner);
        collaborators.insert((document.id, owner.user_id.clone()), owner);
        self.documents.write().await.insert(document.id, document);
    }

    /// Grant `role` to `user_id`. The owner grant cannot be reassigned this way.
    pub async fn add_collaborator(&self, document_id: Uuid, user_id: &str, role: Role) -> Result<(), StoreError> {
        if !self.documents.read().await.contains_key(&document_id) {
            return Err(StoreError::NotFound(document_id));
        }
        let mut collaborators = self.collaborators.write().await;
        let key = (document_id, user_id.to_string());
        let current = collaborators.get(&key).map(|c| c.role);
        if current == Some(Role::Owner) || role == Role::Owner {
            if current == Some(role) {
                return Ok(());
            }
            return Err(StoreError::Fatal(format!(
                "Document {} has exactly one owner; ownership transfer is not supported",
                document_id
            )));
        }
        collaborators.insert(
            key,
            Collaborator {
                document_id,
                user_id: user_id.to_string(),
                role,
                joined_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Revoke a non-owner grant. Returns whether a grant was removed.
    pub async fn remove_collaborator(&self, document_id: Uuid, user_id: &str) -> bool {
        let mut collaborators = self.collaborators.write().await;
        let key = (document_id, user_id.to_string());
        match collaborators.get(&key) {
            Some(c) if c.role != Role::Owner => collaborators.remove(&key).is_some(),
            _ => false,
        }
    }

    /// Make the next `count` saves fail with a transient error.
    pub fn inject_transient_save_failures(&self, count: u32) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load_document(&self, id: Uuid) -> Result<Document, StoreError> {
        self.documents
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn collaborator_role(&self, document_id: Uuid, user_id: &str) -> Result<Option<Role>, StoreError> {
        Ok(self
            .collaborators
            .read()
            .await
            .get(&(document_id, user_id.to_string()))
            .map(|c| c.role))
    }

    async fn save_document(&self, save: &DocumentSave) -> Result<i64, StoreError> {
        let pending = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(StoreError::Transient("injected save failure".to_string()));
        }

        let mut documents = self.documents.write().await;
        let stored = documents.get_mut(&save.id).ok_or(StoreError::NotFound(save.id))?;
        if stored.version != save.expected_version && stored.version != save.version {
            return Err(StoreError::VersionConflict {
                stored: stored.version,
                expected: save.expected_version,
            });
        }
        stored.title = save.title.clone();
        stored.content = save.content.clone();
        stored.is_public = save.is_public;
        stored.version = save.version;
        stored.last_editor = save.last_editor.clone();
        stored.updated_at = Utc::now();
        Ok(stored.version)
    }
}
