use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use tracing::{debug, warn};

use crate::error::CollabError;
use crate::models::ErrorResponse;
use crate::services::auth_service::get_auth_token;
use crate::state::AppState;

/// The authenticated caller, set into request extensions for downstream handlers
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    /// Service-level roles from the token, e.g. `admin`
    pub roles: Vec<String>,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    // 1. Get the auth token from the request
    let token = get_auth_token(req.headers(), None).map_err(|e| {
        debug!("No credentials on {}: {}", req.uri().path(), e);
        CollabError::Unauthenticated(e).to_response()
    })?;

    // 2. Validate the token
    let claims = state.gate.authenticate(Some(&token)).map_err(|e| {
        warn!("Rejected token on {}: {}", req.uri().path(), e);
        e.to_response()
    })?;

    // 3. Hand the caller to the handlers
    req.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        roles: claims.roles,
    });

    Ok(next.run(req).await)
}
