//! Mock identity verifier for tests and local development.
//!
//! Accepts tokens of the form `mock:<user-id>` and optionally
//! `mock:<user-id>:<display-name>`; everything else is rejected. Never
//! enable outside development.

use async_trait::async_trait;

use crate::domain::foundation::UserId;
use crate::ports::{Claims, IdentityError, IdentityVerifier};

/// Verifier that trusts `mock:` tokens.
#[derive(Debug, Default, Clone)]
pub struct MockIdentityVerifier;

impl MockIdentityVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Builds a token this verifier accepts (test helper).
    pub fn token_for(user_id: &str) -> String {
        format!("mock:{}", user_id)
    }
}

#[async_trait]
impl IdentityVerifier for MockIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, IdentityError> {
        let rest = token.strip_prefix("mock:").ok_or(IdentityError::InvalidToken)?;
        let (id, name) = match rest.split_once(':') {
            Some((id, name)) => (id, Some(name.to_string())),
            None => (rest, None),
        };
        let user_id = UserId::new(id).map_err(|_| IdentityError::InvalidToken)?;
        Ok(Claims {
            email: Some(format!("{}@mock.local", user_id)),
            name,
            avatar_url: None,
            user_id,
        })
    }
}
