//! Application configuration module
//!
//! Type-safe configuration loading from environment variables using the
//! `config` and `dotenvy` crates. Values are read with the `CHATHUB` prefix
//! and `__` (double underscore) separating nested fields:
//!
//! - `CHATHUB__SERVER__PORT=8080` → `server.port`
//! - `CHATHUB__DATABASE__URL=postgres://…` → `database.url`
//! - `CHATHUB__AI__PROVIDER=mock` → `ai.provider`

mod ai;
mod auth;
mod database;
mod error;
mod server;
mod timeouts;

pub use ai::{AiConfig, AiProviderKind};
pub use auth::{AuthConfig, AuthMode};
pub use database::{DatabaseConfig, StoreEngine};
pub use error::{ConfigError, ValidationError};
pub use server::{Environment, ServerConfig};
pub use timeouts::TimeoutsConfig;

use serde::Deserialize;

/// Root application configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub ai: AiConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

impl AppConfig {
    /// Loads configuration from environment variables (and `.env` in
    /// development).
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("CHATHUB")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Semantic validation across all sections.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.auth.validate(&self.server.environment)?;
        self.ai.validate()?;
        self.timeouts.validate()?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
