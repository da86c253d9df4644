//! Persistent store configuration.

use serde::Deserialize;

use super::error::ValidationError;

/// Which `ChatStore` implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreEngine {
    /// PostgreSQL via sqlx (production).
    Postgres,
    /// In-memory maps (development, tests). State is lost on restart.
    Memory,
}

impl Default for StoreEngine {
    fn default() -> Self {
        StoreEngine::Postgres
    }
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub engine: StoreEngine,

    /// PostgreSQL connection URL; required for the postgres engine.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: StoreEngine::default(),
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_connections == 0 {
            return Err(ValidationError::new(
                "database.max_connections",
                "must be at least 1",
            ));
        }
        if self.engine == StoreEngine::Postgres {
            match &self.url {
                None => {
                    return Err(ValidationError::new(
                        "database.url",
                        "required for the postgres engine",
                    ))
                }
                Some(url) if !url.starts_with("postgres://") && !url.starts_with("postgresql://") => {
                    return Err(ValidationError::new(
                        "database.url",
                        "must be a postgres:// or postgresql:// URL",
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_requires_url() {
        assert!(DatabaseConfig::default().validate().is_err());

        let config = DatabaseConfig {
            url: Some("postgresql://localhost/chathub".into()),
            ..DatabaseConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn memory_engine_needs_no_url() {
        let config = DatabaseConfig {
            engine: StoreEngine::Memory,
            ..DatabaseConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_non_postgres_scheme() {
        let config = DatabaseConfig {
            url: Some("mysql://localhost/chathub".into()),
            ..DatabaseConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
