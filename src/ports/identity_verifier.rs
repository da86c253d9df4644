//! IdentityVerifier port - bearer-token verification at handshake.
//!
//! Verification happens once per connection, before the WebSocket upgrade
//! completes; it is never invoked per frame. Failure rejects the connection
//! with the unauthenticated close path.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::foundation::UserId;

/// Claims extracted from a verified token.
#[derive(Debug, Clone)]
pub struct Claims {
    pub user_id: UserId,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

impl Claims {
    /// The user's display name, falling back to email, then to the raw id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or_else(|| self.user_id.as_str())
    }
}

/// Token verification failures.
#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    /// The token is missing, malformed, or has an invalid signature.
    #[error("invalid token")]
    InvalidToken,

    /// The token's expiry is in the past.
    #[error("token expired")]
    TokenExpired,

    /// The identity provider could not be reached or answered abnormally.
    #[error("identity provider unavailable: {0}")]
    ServiceUnavailable(String),
}

impl IdentityError {
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Transient failures may succeed on a client retry; token failures
    /// require a fresh token.
    pub fn is_transient(&self) -> bool {
        matches!(self, IdentityError::ServiceUnavailable(_))
    }
}

/// Port for the external identity provider.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verifies a bearer token and returns the stable identity and profile
    /// claims it carries.
    async fn verify(&self, token: &str) -> Result<Claims, IdentityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_through_claims() {
        let full = Claims {
            user_id: UserId::new("u1").unwrap(),
            email: Some("a@example.com".into()),
            name: Some("Alice".into()),
            avatar_url: None,
        };
        assert_eq!(full.display_name(), "Alice");

        let email_only = Claims {
            user_id: UserId::new("u1").unwrap(),
            email: Some("a@example.com".into()),
            name: None,
            avatar_url: None,
        };
        assert_eq!(email_only.display_name(), "a@example.com");

        let bare = Claims {
            user_id: UserId::new("u1").unwrap(),
            email: None,
            name: None,
            avatar_url: None,
        };
        assert_eq!(bare.display_name(), "u1");
    }

    #[test]
    fn only_provider_outages_are_transient() {
        assert!(IdentityError::service_unavailable("down").is_transient());
        assert!(!IdentityError::InvalidToken.is_transient());
        assert!(!IdentityError::TokenExpired.is_transient());
    }
}
