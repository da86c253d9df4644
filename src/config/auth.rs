//! Identity provider configuration.

use serde::Deserialize;

use super::error::ValidationError;
use super::server::Environment;

/// Which `IdentityVerifier` to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// JWKS-validating OIDC verifier (production).
    Oidc,
    /// `mock:<user>` tokens; development and tests only.
    Mock,
}

impl Default for AuthMode {
    fn default() -> Self {
        AuthMode::Oidc
    }
}

/// Token verification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,

    /// OIDC issuer URL (`tokenIssuer`); required in oidc mode.
    #[serde(default)]
    pub issuer_url: Option<String>,

    /// Expected audience claim; required in oidc mode.
    #[serde(default)]
    pub audience: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            issuer_url: None,
            audience: None,
        }
    }
}

impl AuthConfig {
    pub fn validate(&self, environment: &Environment) -> Result<(), ValidationError> {
        match self.mode {
            AuthMode::Mock => {
                if *environment == Environment::Production {
                    return Err(ValidationError::new(
                        "auth.mode",
                        "mock verification is not allowed in production",
                    ));
                }
            }
            AuthMode::Oidc => {
                let issuer = self.issuer_url.as_deref().ok_or_else(|| {
                    ValidationError::new("auth.issuer_url", "required in oidc mode")
                })?;
                if !issuer.starts_with("https://") && !issuer.starts_with("http://") {
                    return Err(ValidationError::new(
                        "auth.issuer_url",
                        "must be an http(s) URL",
                    ));
                }
                if self.audience.as_deref().map_or(true, str::is_empty) {
                    return Err(ValidationError::new("auth.audience", "required in oidc mode"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oidc_requires_issuer_and_audience() {
        let config = AuthConfig::default();
        assert!(config.validate(&Environment::Development).is_err());

        let config = AuthConfig {
            issuer_url: Some("https://auth.example.com".into()),
            audience: Some("chathub".into()),
            ..AuthConfig::default()
        };
        assert!(config.validate(&Environment::Production).is_ok());
    }

    #[test]
    fn mock_mode_is_rejected_in_production() {
        let config = AuthConfig {
            mode: AuthMode::Mock,
            ..AuthConfig::default()
        };
        assert!(config.validate(&Environment::Development).is_ok());
        assert!(config.validate(&Environment::Production).is_err());
    }
}
