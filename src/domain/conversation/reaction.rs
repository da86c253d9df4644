//! Emoji reactions on messages.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{MessageId, Timestamp, UserId, ValidationError};

/// A single user's emoji reaction to a message.
///
/// The `(message_id, user_id, emoji)` triple is unique; reacting again with
/// the same emoji removes it (toggle semantics, enforced by the store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: Timestamp,
}

impl Reaction {
    const MAX_EMOJI_LEN: usize = 32;

    /// Creates a reaction, validating the emoji payload.
    pub fn new(
        message_id: MessageId,
        user_id: UserId,
        emoji: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let emoji = emoji.into();
        if emoji.is_empty() {
            return Err(ValidationError::empty_field("emoji"));
        }
        if emoji.len() > Self::MAX_EMOJI_LEN {
            return Err(ValidationError::too_long("emoji", Self::MAX_EMOJI_LEN, emoji.len()));
        }
        Ok(Self {
            message_id,
            user_id,
            emoji,
            created_at: Timestamp::now(),
        })
    }

    /// Whether this reaction is the same `(user, emoji)` pair as another.
    pub fn same_key(&self, user_id: &UserId, emoji: &str) -> bool {
        &self.user_id == user_id && self.emoji == emoji
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_emoji() {
        let r = Reaction::new(MessageId::new(), UserId::new("u1").unwrap(), "");
        assert!(r.is_err());
    }

    #[test]
    fn rejects_oversized_emoji() {
        let r = Reaction::new(MessageId::new(), UserId::new("u1").unwrap(), "x".repeat(33));
        assert!(r.is_err());
    }

    #[test]
    fn same_key_matches_user_and_emoji() {
        let user = UserId::new("u1").unwrap();
        let r = Reaction::new(MessageId::new(), user.clone(), "👍").unwrap();
        assert!(r.same_key(&user, "👍"));
        assert!(!r.same_key(&user, "👎"));
        assert!(!r.same_key(&UserId::new("u2").unwrap(), "👍"));
    }
}
