use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// HS256 secret used to validate bearer tokens
    pub auth_jwt_secret: Option<String>,

    /// Database URL. Without one the in-memory store is used.
    pub db_url: Option<String>,

    /// JSON file seeding the in-memory store
    pub seed_file: Option<String>,

    /// Keep-alive probe cadence per session
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Inactivity after which a session is evicted
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,

    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    #[serde(default = "default_save_retry_attempts")]
    pub save_retry_attempts: u32,

    #[serde(default = "default_save_retry_backoff_ms")]
    pub save_retry_backoff_ms: u64,

    /// Periodic save of dirty documents, 0 disables
    #[serde(default = "default_autosave_interval_secs")]
    pub autosave_interval_secs: u64,

    #[serde(default = "default_role_cache_ttl_secs")]
    pub role_cache_ttl_secs: u64,
}

/// Probe cadence and eviction deadline for live sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessSettings {
    pub ping_interval: Duration,
    pub timeout: Duration,
    pub outbox_capacity: usize,
}

/// Retry budget for transient storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

/// Per-document actor tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorSettings {
    pub autosave_interval: Option<Duration>,
    pub broadcast_capacity: usize,
    pub command_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                config.validate()?;
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval_ms == 0 || self.liveness_timeout_ms == 0 {
            return Err(ConfigError::Invalid("liveness intervals must be positive".to_string()));
        }
        if self.liveness_timeout_ms < self.ping_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "liveness timeout ({} ms) is shorter than the ping interval ({} ms)",
                self.liveness_timeout_ms, self.ping_interval_ms
            )));
        }
        if self.broadcast_capacity == 0 || self.outbox_capacity == 0 {
            return Err(ConfigError::Invalid("channel capacities must be positive".to_string()));
        }
        Ok(())
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    pub fn liveness(&self) -> LivenessSettings {
        LivenessSettings {
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            timeout: Duration::from_millis(self.liveness_timeout_ms),
            outbox_capacity: self.outbox_capacity,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.save_retry_attempts.max(1),
            backoff: Duration::from_millis(self.save_retry_backoff_ms),
        }
    }

    pub fn actor_settings(&self) -> ActorSettings {
        ActorSettings {
            autosave_interval: match self.autosave_interval_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            broadcast_capacity: self.broadcast_capacity,
            command_capacity: 64,
        }
    }

    pub fn role_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.role_cache_ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            service_name: default_service_name(),
            auth_jwt_secret: None,
            db_url: None,
            seed_file: None,
            ping_interval_ms: default_ping_interval_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            broadcast_capacity: default_broadcast_capacity(),
            outbox_capacity: default_outbox_capacity(),
            save_retry_attempts: default_save_retry_attempts(),
            save_retry_backoff_ms: default_save_retry_backoff_ms(),
            autosave_interval_secs: default_autosave_interval_secs(),
            role_cache_ttl_secs: default_role_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "paper-collab".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_ping_interval_ms() -> u64 {
    10_000
}

fn default_liveness_timeout_ms() -> u64 {
    60_000
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_outbox_capacity() -> usize {
    256
}

fn default_save_retry_attempts() -> u32 {
    3
}

fn default_save_retry_backoff_ms() -> u64 {
    200
}

fn default_autosave_interval_secs() -> u64 {
    30
}

fn default_role_cache_ttl_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_cadence() {
        let config = Config::default();
        let liveness = config.liveness();
        assert_eq!(liveness.ping_interval, Duration::from_secs(10));
        assert_eq!(liveness.timeout, Duration::from_secs(60));
        assert_eq!(config.actor_settings().autosave_interval, Some(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_autosave_can_be_disabled() {
        let config = Config {
            autosave_interval_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.actor_settings().autosave_interval, None);
    }

    #[test]
    fn test_rejects_timeout_shorter_than_ping() {
        let config = Config {
            ping_interval_ms: 5_000,
            liveness_timeout_ms: 1_000,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
