use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// JSON body returned by the REST handlers on failure
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: u16,
    pub status: String,
    pub error: String,
}