//! Application configuration module
//!
//! Configuration is loaded from environment variables with the `LIFELINE`
//! prefix; nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use lifeline_sync::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod error;
mod processing;
mod server;
mod storage;
mod webhook;

pub use error::{ConfigError, ValidationError};
pub use processing::ProcessingConfig;
pub use server::{Environment, ServerConfig};
pub use storage::{StorageBackend, StorageConfig};
pub use webhook::WebhookConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Only the webhook signing secret is required; every other section has
/// defaults suitable for local development.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// Provider webhook verification
    pub webhook: WebhookConfig,

    /// Latency budgets and safety durations
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Subscription store and dedup cache
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `LIFELINE` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    ///
    /// - `LIFELINE__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `LIFELINE__WEBHOOK__SIGNING_SECRET=whsec_...` -> `webhook.signing_secret`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or values
    /// cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("LIFELINE")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.webhook.validate()?;
        self.processing.validate()?;
        self.storage.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
