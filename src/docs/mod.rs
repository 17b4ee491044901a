use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Current state of a document, live if it is open
#[utoipa::path(
    get,
    path = "/api/v1/documents/{doc_id}",
    params(
        ("doc_id" = String, Path, description = "Document id")
    ),
    responses(
        (status = 200, description = "Document state", body = DocumentStateResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "No access to the document", body = ErrorResponse),
        (status = 404, description = "Document not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn doc_state_doc() {}

/// Service diagnostics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Diagnostics", body = DiagnosticsResponse),
        (status = 403, description = "Admin access required", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        doc_state_doc,
        diagnostics_doc,
    ),
    components(
        schemas(HealthResponse, DocumentStateResponse, DiagnosticsResponse, ErrorResponse, Document, Role, SessionInfo)
    ),
    tags(
        (name = "api", description = "Collaborative document API")
    )
)]
pub struct ApiDoc;
