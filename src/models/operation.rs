use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CollabError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Delete,
    Replace,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Insert => write!(f, "insert"),
            OperationKind::Delete => write!(f, "delete"),
            OperationKind::Replace => write!(f, "replace"),
        }
    }
}

impl FromStr for OperationKind {
    type Err = CollabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(OperationKind::Insert),
            "delete" => Ok(OperationKind::Delete),
            "replace" => Ok(OperationKind::Replace),
            other => Err(CollabError::InvalidOperation(format!("Unknown operation kind '{}'", other))),
        }
    }
}

/// An edit as sent by a client.
///
/// `kind` stays a raw string so an unknown kind is reported as an invalid operation
/// instead of a malformed frame. `position` is signed for the same reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub kind: String,
    pub position: i64,
    #[serde(default)]
    pub content: String,
    /// Text a `replace` expects to overwrite at `position`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_content: Option<String>,
}

/// An accepted edit, stamped with the version it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: String,
    pub kind: OperationKind,
    pub position: i64,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_content: Option<String>,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
}
