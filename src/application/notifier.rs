//! Notification fan-out for recipients away from the conversation.
//!
//! A recipient counts as away when none of their sockets is subscribed to
//! the conversation's room. Records are persisted first (so they survive for
//! the next connect) and then pushed to any live sockets via the personal
//! fan-out.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::adapters::websocket::{ConnectionRegistry, ServerEvent};
use crate::domain::call::Call;
use crate::domain::conversation::{Conversation, Message};
use crate::domain::foundation::UserId;
use crate::domain::notification::{Notification, NotificationKind};
use crate::ports::ChatStore;

/// Case-insensitive `@AI` on a word boundary, not embedded in a word
/// (so `user@aide.com` does not trigger).
static AI_TRIGGER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(^|[^\w@])@ai\b").expect("static regex"));

/// Whether the text invokes the AI participant.
pub fn mentions_ai(content: &str) -> bool {
    AI_TRIGGER.is_match(content)
}

/// Whether the text mentions a user by `@name` (case-insensitive, word
/// boundary).
fn mentions_name(content: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let pattern = format!(r"(?i)@{}\b", regex::escape(name));
    Regex::new(&pattern).map(|re| re.is_match(content)).unwrap_or(false)
}

fn preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let cut: String = content.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}

/// Produces in-app notification events and records them.
pub struct Notifier {
    store: Arc<dyn ChatStore>,
    registry: Arc<ConnectionRegistry>,
}

impl Notifier {
    pub fn new(store: Arc<dyn ChatStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    async fn record_and_push(&self, notification: Notification) {
        if let Err(e) = self.store.create_notification(&notification).await {
            tracing::error!(user_id = %notification.user_id, "failed to record notification: {}", e);
            return;
        }
        self.registry
            .emit_to_user(
                &notification.user_id.clone(),
                ServerEvent::NewNotification(notification),
            )
            .await;
    }

    /// Fan-out for a freshly appended message: every member who is neither
    /// the sender nor viewing the conversation gets NEW_MESSAGE, or MENTION
    /// when addressed by `@name`. Muted memberships are skipped.
    pub async fn message_fanout(
        &self,
        conversation: &Conversation,
        message: &Message,
        sender_name: &str,
    ) {
        let members = match self.store.members_of(&conversation.id).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(conversation_id = %conversation.id, "fan-out member lookup failed: {}", e);
                return;
            }
        };

        for member in members {
            if Some(&member.user_id) == message.sender_id.as_ref() || member.is_muted {
                continue;
            }
            if self
                .registry
                .is_user_in_room(&conversation.id, &member.user_id)
                .await
            {
                continue;
            }

            let display_name = match self.store.get_user(&member.user_id).await {
                Ok(Some(profile)) => profile.display_name,
                _ => String::new(),
            };
            let kind = if mentions_name(&message.content, &display_name) {
                NotificationKind::Mention
            } else {
                NotificationKind::NewMessage
            };

            let notification = Notification::new(
                member.user_id.clone(),
                kind,
                sender_name,
                preview(&message.content, 140),
                serde_json::json!({
                    "conversationId": conversation.id,
                    "messageId": message.id,
                }),
            );
            self.record_and_push(notification).await;
        }
    }

    /// CALL_MISSED for the callee on a MISSED transition.
    pub async fn call_missed(&self, call: &Call) {
        let caller_name = match self.store.get_user(&call.caller_id).await {
            Ok(Some(profile)) => profile.display_name,
            _ => call.caller_id.to_string(),
        };
        let notification = Notification::new(
            call.callee_id.clone(),
            NotificationKind::CallMissed,
            caller_name,
            "Missed call",
            serde_json::json!({
                "callId": call.id,
                "conversationId": call.conversation_id,
            }),
        );
        self.record_and_push(notification).await;
    }

    /// AI_COMPLETE for the invoker when a stream finishes a conversation
    /// they are no longer viewing.
    pub async fn ai_complete(&self, invoker: &UserId, conversation: &Conversation, message: &Message) {
        let notification = Notification::new(
            invoker.clone(),
            NotificationKind::AiComplete,
            conversation.title.clone().unwrap_or_else(|| "AI reply".to_string()),
            preview(&message.content, 140),
            serde_json::json!({
                "conversationId": conversation.id,
                "messageId": message.id,
            }),
        );
        self.record_and_push(notification).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_trigger_is_case_insensitive_and_word_bound() {
        assert!(mentions_ai("@AI what do you think?"));
        assert!(mentions_ai("hey @ai, help"));
        assert!(mentions_ai("hey (@ai) help"));
        assert!(!mentions_ai("mail me at x@aide.com"));
        assert!(!mentions_ai("@aid please"));
        assert!(!mentions_ai("plain message"));
    }

    #[test]
    fn name_mention_matches_word_boundary() {
        assert!(mentions_name("ping @Alice now", "alice"));
        assert!(mentions_name("@alice", "Alice"));
        assert!(!mentions_name("@alicesmith", "alice"));
        assert!(!mentions_name("alice without at", "alice"));
        assert!(!mentions_name("anything", ""));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("short", 140), "short");
        let long = "x".repeat(200);
        let p = preview(&long, 140);
        assert_eq!(p.chars().count(), 141);
        assert!(p.ends_with('…'));
        // Multibyte content must not split a char.
        let emoji = "🎉".repeat(150);
        let p = preview(&emoji, 140);
        assert!(p.ends_with('…'));
    }
}
