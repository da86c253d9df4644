//! ChatStore port - the conversation store facade.
//!
//! The only component allowed to touch persistence. The realtime core calls
//! these operations and never sees the engine behind them; implementations
//! exist for PostgreSQL (production) and in-memory maps (tests, local dev).
//!
//! # Contract highlights
//!
//! - `append_message` and the conversation `updated_at` bump are one atomic
//!   unit, and the append is rejected when the sender is not a current
//!   member.
//! - `transition_call` is a compare-and-set: the state moves only if the
//!   stored state equals `expected`, which serializes racing socket events.
//! - `mark_read` advances `last_read_at` monotonically and reports which
//!   messages newly became READ for everyone.
//! - `delete_message` is a tombstone (content cleared, row kept).

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::call::{Call, CallState};
use crate::domain::conversation::{
    Conversation, ConversationKind, MemberRole, Membership, Message, Reaction,
};
use crate::domain::foundation::{CallId, ConversationId, MessageId, Timestamp, UserId};
use crate::domain::notification::Notification;
use crate::domain::user::UserProfile;

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Referenced entity does not exist (or is deleted).
    #[error("not found: {0}")]
    NotFound(String),

    /// The actor is not allowed to perform this operation on this entity.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Compare-and-set on a call state found a different current state.
    #[error("invalid call state: expected {expected}, found {actual}")]
    InvalidCallState {
        expected: CallState,
        actual: CallState,
    },

    /// A uniqueness or structural constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Engine-level failure (connection, query, serialization).
    #[error("storage failure: {0}")]
    Database(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound(what.into())
    }

    pub fn forbidden(why: impl Into<String>) -> Self {
        StoreError::Forbidden(why.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        StoreError::Conflict(what.into())
    }

    pub fn database(err: impl std::fmt::Display) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Input for conversation creation.
///
/// `members` must include the creator; the creator receives the OWNER role,
/// everyone else MEMBER. Member counts are validated against the kind.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub kind: ConversationKind,
    pub created_by: UserId,
    pub members: Vec<UserId>,
    pub title: Option<String>,
    pub system_prompt: Option<String>,
}

/// Result of a `mark_read` call.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    /// The member's new (possibly unchanged) `last_read_at`.
    pub last_read_at: Timestamp,
    /// Messages whose aggregate status newly advanced to READ.
    pub newly_read: Vec<MessageId>,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    // ============================================
    // Users
    // ============================================

    /// Inserts or refreshes the profile mirror for a user.
    async fn upsert_user(&self, profile: &UserProfile) -> Result<(), StoreError>;

    /// Looks up a profile mirror.
    async fn get_user(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError>;

    /// Writes the derived presence flag and last-seen instant.
    async fn set_presence(
        &self,
        id: &UserId,
        online: bool,
        last_seen: Timestamp,
    ) -> Result<(), StoreError>;

    // ============================================
    // Conversations & membership
    // ============================================

    /// Creates a conversation and its memberships, enforcing per-kind member
    /// counts. The creator becomes OWNER.
    async fn create_conversation(&self, new: NewConversation) -> Result<Conversation, StoreError>;

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError>;

    /// The acting user's membership in a conversation, if any.
    async fn membership(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<Option<Membership>, StoreError>;

    async fn members_of(&self, conversation: &ConversationId)
        -> Result<Vec<Membership>, StoreError>;

    /// Ids of every conversation the user belongs to.
    async fn conversations_of(&self, user: &UserId) -> Result<Vec<ConversationId>, StoreError>;

    /// Adds a member (groups only; uniqueness on the pair).
    async fn add_member(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        role: MemberRole,
    ) -> Result<Membership, StoreError>;

    /// Removes a member. The last OWNER cannot leave.
    async fn remove_member(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<(), StoreError>;

    /// Changes a member's role (explicit promotion path for OWNER transfer).
    async fn promote_member(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        role: MemberRole,
    ) -> Result<Membership, StoreError>;

    /// Whether two users share any conversation (direct or group).
    async fn shares_conversation(&self, a: &UserId, b: &UserId) -> Result<bool, StoreError>;

    // ============================================
    // Messages
    // ============================================

    /// Persists a message and bumps the conversation's `updated_at` in one
    /// atomic unit. Fails `Forbidden` when the sender is not a member, and
    /// `NotFound` when a `reply_to_id` does not exist in the conversation.
    async fn append_message(&self, message: &Message) -> Result<(), StoreError>;

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, StoreError>;

    /// Replaces content; only the original sender may edit.
    async fn edit_message(
        &self,
        id: &MessageId,
        actor: &UserId,
        content: &str,
    ) -> Result<Message, StoreError>;

    /// Tombstones a message; allowed for the sender, or OWNER/ADMIN of the
    /// conversation.
    async fn delete_message(&self, id: &MessageId, actor: &UserId) -> Result<Message, StoreError>;

    /// Internal tombstone without an actor check, used when the system
    /// retracts its own AI responses during regeneration.
    async fn tombstone_message(&self, id: &MessageId) -> Result<Message, StoreError>;

    /// Idempotent toggle; returns the full aggregated reaction list.
    async fn toggle_reaction(
        &self,
        message: &MessageId,
        user: &UserId,
        emoji: &str,
    ) -> Result<Vec<Reaction>, StoreError>;

    /// Advances the member's `last_read_at` (monotonic) and recomputes
    /// aggregate message statuses.
    async fn mark_read(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        up_to: Timestamp,
    ) -> Result<ReadOutcome, StoreError>;

    /// SENT → DELIVERED. Returns true when the status actually moved.
    async fn mark_delivered(&self, message: &MessageId) -> Result<bool, StoreError>;

    /// Messages ordered by `created_at` ascending within the page; `before`
    /// pages backwards from the end. Tombstones are included.
    async fn list_history(
        &self,
        conversation: &ConversationId,
        before: Option<Timestamp>,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError>;

    /// The most recent non-deleted AI response in a conversation.
    async fn last_ai_response(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<Message>, StoreError>;

    // ============================================
    // Calls
    // ============================================

    async fn create_call(&self, call: &Call) -> Result<(), StoreError>;

    async fn get_call(&self, id: &CallId) -> Result<Option<Call>, StoreError>;

    /// Atomic compare-and-set on the call state. On success the transition
    /// timestamp is stamped and the updated call returned; when the stored
    /// state differs from `expected`, `InvalidCallState` is returned and
    /// nothing changes.
    async fn transition_call(
        &self,
        id: &CallId,
        expected: CallState,
        next: CallState,
    ) -> Result<Call, StoreError>;

    // ============================================
    // Notifications
    // ============================================

    async fn create_notification(&self, notification: &Notification) -> Result<(), StoreError>;
}
