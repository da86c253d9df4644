//! Conversation entity and per-kind membership invariants.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{ConversationId, Timestamp, UserId, ValidationError};

/// What kind of container a conversation is.
///
/// The kind fixes the membership shape: a direct conversation has exactly two
/// members, an AI chat has exactly one (its creator, plus the implicit AI
/// participant which has no user id), and a group has at least one member
/// with exactly one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationKind {
    Direct,
    Group,
    AiChat,
}

impl ConversationKind {
    /// Validates the member count allowed at creation for this kind.
    pub fn validate_member_count(&self, count: usize) -> Result<(), ValidationError> {
        let ok = match self {
            ConversationKind::Direct => count == 2,
            ConversationKind::AiChat => count == 1,
            ConversationKind::Group => count >= 1,
        };
        if ok {
            Ok(())
        } else {
            Err(ValidationError::invalid_format(
                "members",
                format!("{:?} conversation cannot have {} members", self, count),
            ))
        }
    }

    /// Whether every message in this conversation implies an AI turn.
    pub fn always_ai(&self) -> bool {
        matches!(self, ConversationKind::AiChat)
    }
}

/// A conversation: direct chat, group, or AI chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub created_by: UserId,
    /// Steering prompt forwarded to the AI provider for AI turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Conversation {
    const MAX_TITLE_LEN: usize = 256;

    /// Creates a new conversation with a fresh id and current timestamps.
    pub fn new(
        kind: ConversationKind,
        created_by: UserId,
        title: Option<String>,
        system_prompt: Option<String>,
    ) -> Result<Self, ValidationError> {
        if let Some(ref t) = title {
            if t.is_empty() {
                return Err(ValidationError::empty_field("title"));
            }
            if t.len() > Self::MAX_TITLE_LEN {
                return Err(ValidationError::too_long("title", Self::MAX_TITLE_LEN, t.len()));
            }
        }
        let now = Timestamp::now();
        Ok(Self {
            id: ConversationId::new(),
            kind,
            title,
            created_by,
            system_prompt,
            created_at: now,
            updated_at: now,
        })
    }

    /// Bumps the activity timestamp (new message, membership change).
    pub fn touch(&mut self, at: Timestamp) {
        if at > self.updated_at {
            self.updated_at = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    #[test]
    fn direct_requires_exactly_two_members() {
        assert!(ConversationKind::Direct.validate_member_count(2).is_ok());
        assert!(ConversationKind::Direct.validate_member_count(1).is_err());
        assert!(ConversationKind::Direct.validate_member_count(3).is_err());
    }

    #[test]
    fn ai_chat_requires_exactly_one_member() {
        assert!(ConversationKind::AiChat.validate_member_count(1).is_ok());
        assert!(ConversationKind::AiChat.validate_member_count(2).is_err());
    }

    #[test]
    fn group_requires_at_least_one_member() {
        assert!(ConversationKind::Group.validate_member_count(1).is_ok());
        assert!(ConversationKind::Group.validate_member_count(50).is_ok());
        assert!(ConversationKind::Group.validate_member_count(0).is_err());
    }

    #[test]
    fn new_rejects_empty_title() {
        let result = Conversation::new(
            ConversationKind::Group,
            user("u1"),
            Some(String::new()),
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn touch_never_moves_updated_at_backwards() {
        let mut conv =
            Conversation::new(ConversationKind::Direct, user("u1"), None, None).unwrap();
        let later = conv.updated_at.plus_seconds(10);
        conv.touch(later);
        assert_eq!(conv.updated_at, later);
        conv.touch(later.minus_seconds(60));
        assert_eq!(conv.updated_at, later);
    }

    #[test]
    fn kind_serializes_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&ConversationKind::AiChat).unwrap(),
            "\"AI_CHAT\""
        );
        assert_eq!(
            serde_json::to_string(&ConversationKind::Direct).unwrap(),
            "\"DIRECT\""
        );
    }
}
