//! Message entity: text/attachment payloads, edit and tombstone rules.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    ConversationId, MessageId, StateMachine, Timestamp, UserId, ValidationError,
};

/// Upper bound on message content, in bytes.
pub const MAX_CONTENT_LEN: usize = 8 * 1024;

/// Payload kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    File,
    System,
    AiResponse,
}

/// Aggregate delivery status of a message.
///
/// Advances SENT → DELIVERED → READ and never regresses; the derived `Ord`
/// encodes that progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl StateMachine for MessageStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        target > self
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use MessageStatus::*;
        match self {
            Sent => vec![Delivered, Read],
            Delivered => vec![Read],
            Read => vec![],
        }
    }
}

/// A message in a conversation.
///
/// AI responses carry no `sender_id`. Deletion is a tombstone: the row is
/// kept, content cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: Option<UserId>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    pub status: MessageStatus,
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<Timestamp>,
    pub is_deleted: bool,
    pub created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
}

impl Message {
    /// Creates a user-authored message.
    pub fn from_user(
        conversation_id: ConversationId,
        sender_id: UserId,
        kind: MessageKind,
        content: impl Into<String>,
        reply_to_id: Option<MessageId>,
    ) -> Result<Self, ValidationError> {
        let content = content.into();
        Self::validate_content(&content)?;
        Ok(Self {
            id: MessageId::new(),
            conversation_id,
            sender_id: Some(sender_id),
            kind,
            content,
            reply_to_id,
            status: MessageStatus::Sent,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            created_at: Timestamp::now(),
            token_count: None,
        })
    }

    /// Creates an AI response under a pre-assigned id, so stream chunks and
    /// the final message broadcast share the same identifier.
    pub fn ai_response(
        id: MessageId,
        conversation_id: ConversationId,
        content: impl Into<String>,
        token_count: Option<u32>,
    ) -> Result<Self, ValidationError> {
        let content = content.into();
        Self::validate_content(&content)?;
        Ok(Self {
            id,
            conversation_id,
            sender_id: None,
            kind: MessageKind::AiResponse,
            content,
            reply_to_id: None,
            status: MessageStatus::Sent,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            created_at: Timestamp::now(),
            token_count,
        })
    }

    fn validate_content(content: &str) -> Result<(), ValidationError> {
        if content.trim().is_empty() {
            return Err(ValidationError::empty_field("content"));
        }
        if content.len() > MAX_CONTENT_LEN {
            return Err(ValidationError::too_long("content", MAX_CONTENT_LEN, content.len()));
        }
        Ok(())
    }

    /// Replaces the content, marking the message edited. `created_at` is
    /// preserved; only `edited_at` moves.
    pub fn apply_edit(&mut self, content: impl Into<String>) -> Result<(), ValidationError> {
        let content = content.into();
        Self::validate_content(&content)?;
        self.content = content;
        self.is_edited = true;
        self.edited_at = Some(Timestamp::now());
        Ok(())
    }

    /// Soft delete: clears content, keeps the row.
    pub fn tombstone(&mut self) {
        self.content.clear();
        self.is_deleted = true;
    }

    /// Advances the aggregate status monotonically. Returns true if it moved.
    pub fn advance_status(&mut self, to: MessageStatus) -> bool {
        if to > self.status {
            self.status = to;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(content: &str) -> Result<Message, ValidationError> {
        Message::from_user(
            ConversationId::new(),
            UserId::new("u1").unwrap(),
            MessageKind::Text,
            content,
            None,
        )
    }

    #[test]
    fn rejects_empty_and_whitespace_content() {
        assert!(text_message("").is_err());
        assert!(text_message("   ").is_err());
        assert!(text_message("hi").is_ok());
    }

    #[test]
    fn rejects_oversized_content() {
        let big = "x".repeat(MAX_CONTENT_LEN + 1);
        assert!(text_message(&big).is_err());
    }

    #[test]
    fn ai_response_has_no_sender() {
        let id = MessageId::new();
        let m = Message::ai_response(id, ConversationId::new(), "ok", Some(2)).unwrap();
        assert_eq!(m.id, id);
        assert!(m.sender_id.is_none());
        assert_eq!(m.kind, MessageKind::AiResponse);
    }

    #[test]
    fn edit_preserves_created_at_and_sets_edited_at() {
        let mut m = text_message("before").unwrap();
        let created = m.created_at;
        m.apply_edit("after").unwrap();
        assert_eq!(m.content, "after");
        assert!(m.is_edited);
        assert!(m.edited_at.is_some());
        assert_eq!(m.created_at, created);
    }

    #[test]
    fn tombstone_clears_content_keeps_row() {
        let mut m = text_message("secret").unwrap();
        m.tombstone();
        assert!(m.is_deleted);
        assert!(m.content.is_empty());
        assert_eq!(m.kind, MessageKind::Text);
    }

    #[test]
    fn status_never_regresses() {
        let mut m = text_message("hi").unwrap();
        assert!(m.advance_status(MessageStatus::Read));
        assert!(!m.advance_status(MessageStatus::Delivered));
        assert_eq!(m.status, MessageStatus::Read);
    }

    #[test]
    fn status_state_machine_matches_ordering() {
        assert!(MessageStatus::Sent.can_transition_to(&MessageStatus::Read));
        assert!(!MessageStatus::Read.can_transition_to(&MessageStatus::Sent));
        assert!(MessageStatus::Read.is_terminal());
    }

    #[test]
    fn wire_shape_uses_type_and_camel_case() {
        let m = text_message("hi").unwrap();
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "TEXT");
        assert_eq!(json["status"], "SENT");
        assert!(json.get("conversationId").is_some());
        assert!(json.get("senderId").is_some());
    }
}
