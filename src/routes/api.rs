use axum::{http::HeaderValue, middleware, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::docs::ApiDoc;
use crate::handlers::{diagnostics, doc_state, health_check, ready_check};
use crate::routes::auth_middleware::auth_middleware;
use crate::state::AppState;
use crate::ws::websocket_handler;

/// Create API routes
pub fn create_api_routes(state: AppState) -> Router<AppState> {
    Router::<AppState>::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/documents/:doc_id", get(doc_state))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware)) // Applies to all routes added above
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
}

/// The full application: REST API, document websockets and Swagger UI
pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state);
    Router::new()
        .nest("/api", create_api_routes(state.clone()))
        // Websockets authenticate during the handshake
        .route("/ws/documents/:doc_id", get(websocket_handler))
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| match o.parse() {
            Ok(origin) => Some(origin),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();

    if origins.is_empty() && state.config.is_development() {
        return CorsLayer::permissive();
    }
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
