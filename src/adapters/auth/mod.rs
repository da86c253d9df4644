//! Identity verifier adapters.

mod mock;
mod oidc;

pub use mock::MockIdentityVerifier;
pub use oidc::{OidcConfig, OidcIdentityVerifier};
