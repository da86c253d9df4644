//! Authenticated connection session.

use crate::domain::foundation::{SocketId, UserId};
use crate::ports::Claims;

/// The authenticated identity and connection handle every handler receives.
///
/// Replaces per-connection closures: handlers are plain functions over
/// `(session, payload)`.
#[derive(Debug, Clone)]
pub struct Session {
    pub socket_id: SocketId,
    pub claims: Claims,
}

impl Session {
    pub fn new(socket_id: SocketId, claims: Claims) -> Self {
        Self { socket_id, claims }
    }

    pub fn user_id(&self) -> &UserId {
        &self.claims.user_id
    }

    pub fn display_name(&self) -> &str {
        self.claims.display_name()
    }
}
