//! Server listen and environment configuration.

use serde::Deserialize;
use std::net::SocketAddr;

use super::error::ValidationError;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

/// HTTP/WebSocket listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub environment: Environment,

    /// Origins allowed to open WebSocket connections. Empty means any
    /// origin (development only).
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Per-socket bounded outbound queue depth.
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: Environment::default(),
            allowed_origins: Vec::new(),
            outbound_queue_capacity: default_queue_capacity(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ValidationError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ValidationError::new("server.host", "not a valid bind address"))
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.socket_addr()?;
        if self.outbound_queue_capacity == 0 {
            return Err(ValidationError::new(
                "server.outbound_queue_capacity",
                "must be at least 1",
            ));
        }
        if self.is_production() && self.allowed_origins.is_empty() {
            return Err(ValidationError::new(
                "server.allowed_origins",
                "production requires an explicit origin list",
            ));
        }
        Ok(())
    }
}
