use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A collaboratively edited document.
///
/// While a document is open, its `content` and `version` are owned by its document actor.
/// `version` starts at 1 and grows by exactly one per accepted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub owner: String,
    pub is_public: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_editor: Option<String>,
}

impl Document {
    /// A fresh document at version 1.
    pub fn new(id: Uuid, title: impl Into<String>, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            content: String::new(),
            owner: owner.into(),
            is_public: false,
            version: 1,
            created_at: now,
            updated_at: now,
            last_editor: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_public(mut self, is_public: bool) -> Self {
        self.is_public = is_public;
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Content length in characters, the unit operation positions are expressed in.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Values written by an explicit or automatic save.
///
/// `expected_version` is the version the writer believes storage holds. `version` is the
/// live version being persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSave {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub is_public: bool,
    pub version: i64,
    pub expected_version: i64,
    pub last_editor: Option<String>,
}

/// Client-supplied checkpoint request. Only `title` and `is_public` are honored. The content
/// always comes from the live state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
}
