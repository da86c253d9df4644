//! In-app notification records for recipients away from the conversation.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{NotificationId, Timestamp, UserId};

/// What prompted the notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    NewMessage,
    Mention,
    CallMissed,
    AiComplete,
}

/// A persisted notification, surfaced live when the recipient has a socket
/// and fetched on next connect otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    /// Opaque navigation payload (conversation id, message id, call id).
    pub data: serde_json::Value,
    pub is_read: bool,
    pub created_at: Timestamp,
}

impl Notification {
    /// Creates an unread notification.
    pub fn new(
        user_id: UserId,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            user_id,
            kind,
            title: title.into(),
            body: body.into(),
            data,
            is_read: false,
            created_at: Timestamp::now(),
        }
    }
}
