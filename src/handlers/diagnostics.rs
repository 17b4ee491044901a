use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

use crate::auth::auth;
use crate::models::{DiagnosticsResponse, ErrorResponse};
use crate::routes::auth_middleware::AuthUser;
use crate::state::AppState;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Service diagnostics, admins only
pub async fn diagnostics(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), (StatusCode, Json<ErrorResponse>)> {
    auth::ensure_admin(&user.roles)?;

    let n_open_docs = state.registry.open_documents().await as u32;
    let n_sessions = state.registry.session_count().await as u32;
    let n_role_cache = state.gate.cached_roles() as u32;
    let uptime_secs = state.started_at.elapsed().as_secs();

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Docs: {}, Sessions: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_open_docs,
        n_sessions
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_open_docs,
            n_sessions,
            n_role_cache,
            uptime_secs,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}
