use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::db::DocumentStore;
use crate::services::PersistenceAdapter;
use crate::ws::{ConnectionGate, SessionRegistry};

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub gate: Arc<ConnectionGate>,
    pub persistence: Arc<PersistenceAdapter>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the collaboration core on top of a document store.
    pub fn new(config: Config, store: Arc<dyn DocumentStore>) -> Self {
        let persistence = Arc::new(PersistenceAdapter::new(store, config.retry_policy()));
        let registry = Arc::new(SessionRegistry::new(persistence.clone(), config.actor_settings()));
        let gate = Arc::new(ConnectionGate::new(
            config.auth_jwt_secret.clone(),
            persistence.clone(),
            config.role_cache_ttl(),
        ));
        Self {
            config: Arc::new(config),
            registry,
            gate,
            persistence,
            started_at: Instant::now(),
        }
    }
}
