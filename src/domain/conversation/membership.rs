//! Membership: a user's relationship to a conversation.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{ConversationId, Timestamp, UserId};

/// Role of a member within a conversation.
///
/// A group has exactly one owner; admins may moderate but not delete the
/// conversation or demote the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

impl MemberRole {
    /// Whether this role may perform moderator actions (remove members,
    /// delete foreign messages, promote).
    pub fn can_moderate(&self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Admin)
    }
}

/// A user's membership in a conversation, carrying role and read-state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub joined_at: Timestamp,
    pub last_read_at: Option<Timestamp>,
    pub is_pinned: bool,
    pub is_muted: bool,
}

impl Membership {
    /// Creates a fresh membership with no read-state.
    pub fn new(conversation_id: ConversationId, user_id: UserId, role: MemberRole) -> Self {
        Self {
            conversation_id,
            user_id,
            role,
            joined_at: Timestamp::now(),
            last_read_at: None,
            is_pinned: false,
            is_muted: false,
        }
    }

    /// Advances `last_read_at` monotonically. Returns true if it moved.
    pub fn advance_last_read(&mut self, up_to: Timestamp) -> bool {
        match self.last_read_at {
            Some(current) if current >= up_to => false,
            _ => {
                self.last_read_at = Some(up_to);
                true
            }
        }
    }

    /// Whether this member has read everything at or before the given instant.
    pub fn has_read(&self, at: Timestamp) -> bool {
        self.last_read_at.is_some_and(|r| r >= at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn membership() -> Membership {
        Membership::new(
            ConversationId::new(),
            UserId::new("u1").unwrap(),
            MemberRole::Member,
        )
    }

    #[test]
    fn only_owner_and_admin_moderate() {
        assert!(MemberRole::Owner.can_moderate());
        assert!(MemberRole::Admin.can_moderate());
        assert!(!MemberRole::Member.can_moderate());
    }

    #[test]
    fn advance_last_read_is_monotonic() {
        let mut m = membership();
        let t1 = Timestamp::now();
        let t0 = t1.minus_seconds(60);

        assert!(m.advance_last_read(t1));
        assert!(!m.advance_last_read(t0), "must not regress");
        assert_eq!(m.last_read_at, Some(t1));
        assert!(m.advance_last_read(t1.plus_seconds(1)));
    }

    #[test]
    fn has_read_compares_against_last_read() {
        let mut m = membership();
        let t = Timestamp::now();
        assert!(!m.has_read(t));
        m.advance_last_read(t);
        assert!(m.has_read(t));
        assert!(m.has_read(t.minus_seconds(5)));
        assert!(!m.has_read(t.plus_seconds(5)));
    }
}
