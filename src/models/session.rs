use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Role;

/// Public view of a live session, as listed in `active_sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub user_id: String,
    pub role: Role,
    pub cursor_position: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}
