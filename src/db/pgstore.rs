use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{DocumentStore, StoreError};
use crate::models::{Document, DocumentSave, Role};

const SCHEMA_SQL: [&str; 2] = [
    r#"
        CREATE TABLE IF NOT EXISTS documents (
            id UUID PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            owner TEXT NOT NULL,
            is_public BOOLEAN NOT NULL DEFAULT FALSE,
            version BIGINT NOT NULL DEFAULT 1,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_editor TEXT
        )
    "#,
    r#"
        CREATE TABLE IF NOT EXISTS document_collaborators (
            document UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('owner', 'editor', 'viewer')),
            joined_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (document, user_id)
        )
    "#,
];

/// Document row from database
#[derive(Debug, Clone, sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    title: String,
    content: String,
    owner: String,
    is_public: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_editor: Option<String>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: row.id,
            title: row.title,
            content: row.content,
            owner: row.owner,
            is_public: row.is_public,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_editor: row.last_editor,
        }
    }
}

/// Postgres-backed document store
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Create the tables this service relies on when they are missing
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA_SQL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema verified");
        Ok(())
    }

    fn log_pool(&self, action: &str, document_id: Uuid) {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        info!(
            "{} document {}. Pool connections: {} idle, {} in use",
            action,
            document_id,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn load_document(&self, id: Uuid) -> Result<Document, StoreError> {
        self.log_pool("Loading", id);

        let query_sql = r#"
            SELECT id, title, content, owner, is_public, version, created_at, updated_at, last_editor
            FROM documents
            WHERE id = $1
        "#;

        let row = sqlx::query_as::<_, DocumentRow>(query_sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to load document {}: {}", id, e);
                StoreError::from(e)
            })?;

        match row {
            Some(row) => Ok(row.into()),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn collaborator_role(&self, document_id: Uuid, user_id: &str) -> Result<Option<Role>, StoreError> {
        let query_sql = r#"
            SELECT role FROM document_collaborators
            WHERE document = $1 AND user_id = $2
        "#;

        let row = sqlx::query(query_sql)
            .bind(document_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let role: String = row.try_get("role")?;
        match role.parse::<Role>() {
            Ok(role) => Ok(Some(role)),
            Err(e) => {
                warn!("Ignoring collaborator row for {} on {}: {}", user_id, document_id, e);
                Ok(None)
            }
        }
    }

    async fn save_document(&self, save: &DocumentSave) -> Result<i64, StoreError> {
        self.log_pool("Saving", save.id);

        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(
                    "Failed to acquire connection from pool for document {}: {}. Pool state: {} idle, {} total",
                    save.id,
                    e,
                    self.pool.num_idle(),
                    self.pool.size()
                );
                return Err(e.into());
            }
        };

        // Compare-and-swap on version. A retry of an already applied save matches on $5.
        let update_sql = r#"
            UPDATE documents
            SET title = $2,
                content = $3,
                is_public = $4,
                version = $5,
                last_editor = $6,
                updated_at = NOW()
            WHERE id = $1
                AND (version = $7 OR version = $5)
            RETURNING version;
        "#;
        let updated = sqlx::query(update_sql)
            .bind(save.id)
            .bind(&save.title)
            .bind(&save.content)
            .bind(save.is_public)
            .bind(save.version)
            .bind(&save.last_editor)
            .bind(save.expected_version)
            .fetch_optional(&mut *tx)
            .await?;

        let result = match updated {
            Some(row) => Ok(row.try_get::<i64, _>("version")?),
            None => {
                let current = sqlx::query("SELECT version FROM documents WHERE id = $1")
                    .bind(save.id)
                    .fetch_optional(&mut *tx)
                    .await?;
                match current {
                    Some(row) => Err(StoreError::VersionConflict {
                        stored: row.try_get("version")?,
                        expected: save.expected_version,
                    }),
                    None => Err(StoreError::NotFound(save.id)),
                }
            }
        };

        tx.commit().await?;

        match &result {
            Ok(version) => info!("Document {} saved at version {}", save.id, version),
            Err(e) => error!("Failed to save document {}: {}", save.id, e),
        }
        result
    }
}
