//! Authorization gate: membership and role checks before dispatch.
//!
//! Every conversation-scoped event passes through here before any handler
//! runs. Violations answer the originating socket with an error envelope and
//! never mutate state.

use std::sync::Arc;

use crate::adapters::websocket::ClientError;
use crate::domain::conversation::Membership;
use crate::domain::foundation::{ConversationId, UserId};
use crate::ports::ChatStore;

/// Membership/role checker backed by the store.
#[derive(Clone)]
pub struct Gate {
    store: Arc<dyn ChatStore>,
}

impl Gate {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// The acting user must be a member of the conversation.
    ///
    /// Distinguishes a missing conversation (`not_found`) from a
    /// non-membership (`unauthorized`).
    pub async fn require_member(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<Membership, ClientError> {
        if let Some(membership) = self.store.membership(conversation, user).await? {
            return Ok(membership);
        }
        if self.store.get_conversation(conversation).await?.is_none() {
            return Err(ClientError::not_found(format!(
                "conversation {}",
                conversation
            )));
        }
        Err(ClientError::unauthorized("not a member of this conversation"))
    }

    /// The acting user must hold a moderator role (OWNER or ADMIN).
    pub async fn require_moderator(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<Membership, ClientError> {
        let membership = self.require_member(conversation, user).await?;
        if membership.role.can_moderate() {
            Ok(membership)
        } else {
            Err(ClientError::unauthorized("owner or admin role required"))
        }
    }
}
