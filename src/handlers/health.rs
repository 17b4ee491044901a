use axum::{extract::State, Json};
use tracing::debug;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
        open_documents: state.registry.open_documents().await,
    })
}

/// Readiness check endpoint
pub async fn ready_check(State(state): State<AppState>) -> Json<HealthResponse> {
    debug!("Readiness check requested");
    let message = if state.config.auth_jwt_secret.is_some() {
        "Service is ready"
    } else {
        "Service is up but cannot authenticate connections"
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        message: message.to_string(),
        open_documents: state.registry.open_documents().await,
    })
}
