use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use tracing::{debug, error};

use crate::error::CollabError;
use crate::models::{DocumentStateResponse, ErrorResponse};
use crate::routes::auth_middleware::AuthUser;
use crate::state::AppState;

/// Read a document's current state.
///
/// Open documents answer from their live state, others from storage.
pub async fn doc_state(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(doc_id): Path<String>,
) -> Result<(StatusCode, Json<DocumentStateResponse>), (StatusCode, Json<ErrorResponse>)> {
    let (admission, stored) = state.gate.grant(&doc_id, &user.user_id).await.map_err(|e| {
        debug!("Document state for {} refused to {}: {}", doc_id, user.user_id, e);
        e.to_response()
    })?;

    let (document, live, sessions) = match state.registry.room(admission.document_id).await {
        Some(room) => match room.handle().snapshot().await {
            Ok(doc) => (doc, true, room.sessions().await),
            // Closed between lookup and snapshot; storage holds the flushed state.
            Err(CollabError::DocumentClosed(_)) => {
                let doc = state.persistence.load(admission.document_id).await.map_err(|e| {
                    error!("Failed to reload document {}: {}", admission.document_id, e);
                    e.to_response()
                })?;
                (doc, false, Vec::new())
            }
            Err(e) => return Err(e.to_response()),
        },
        None => (stored, false, Vec::new()),
    };

    Ok((
        StatusCode::OK,
        Json(DocumentStateResponse {
            document,
            role: admission.role,
            can_edit: admission.role.can_edit(),
            live,
            sessions,
        }),
    ))
}
