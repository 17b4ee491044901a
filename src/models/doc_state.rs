use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Document, Role, SessionInfo};

/// Response for reading a document's current state over REST
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DocumentStateResponse {
    pub document: Document,
    pub role: Role,
    pub can_edit: bool,
    /// True when the state comes from an open document rather than storage
    pub live: bool,
    pub sessions: Vec<SessionInfo>,
}
