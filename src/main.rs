use paper_collab::config::Config;
use paper_collab::db::{DocumentStore, MemoryStore, PgStore};
use paper_collab::{create_app, AppState};
use std::panic;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}, using defaults");
        Config::default()
    });

    // Initialize tracing
    let default_filter = format!(
        "paper_collab={},tower_http=debug,axum::rejection=trace,info",
        config.log_level
    );
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    info!("Starting {} ({})", config.service_name, config.environment);

    let store = match open_store(&config).await {
        Some(store) => store,
        None => {
            error!("No document store available, shutting down");
            std::process::exit(1);
        }
    };

    let address = config.server_address();
    let app = create_app(AppState::new(config, store));

    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", address, e);
            std::process::exit(1);
        }
    };

    info!("🚀 Server running on http://{}", address);
    info!("📡 WebSocket available at ws://{}/ws/documents/{{doc_id}}", address);
    info!("📚 Swagger UI available at http://{}/swagger", address);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
    }
}

/// Postgres when a database URL is configured, otherwise the in-memory store.
async fn open_store(config: &Config) -> Option<Arc<dyn DocumentStore>> {
    if let Some(db_url) = &config.db_url {
        let store = match PgStore::connect(db_url).await {
            Ok(store) => store,
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                return None;
            }
        };
        if let Err(e) = store.ensure_schema().await {
            error!("Failed to prepare database schema: {}", e);
            return None;
        }
        info!("Database initialized successfully");
        return Some(Arc::new(store));
    }

    warn!("No database URL configured - documents live in memory only");
    match &config.seed_file {
        Some(path) => match MemoryStore::from_seed_file(path).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                error!("{}", e);
                None
            }
        },
        None => Some(Arc::new(MemoryStore::new())),
    }
}
