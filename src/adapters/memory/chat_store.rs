//! In-memory implementation of the `ChatStore` port.
//!
//! Backs the integration test suites and local development without a
//! database. All operations run under one mutex; atomicity contracts
//! (append + `updated_at` bump, call CAS) hold trivially.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::call::{Call, CallState};
use crate::domain::conversation::{
    Conversation, ConversationKind, MemberRole, Membership, Message, MessageKind, MessageStatus,
    Reaction,
};
use crate::domain::foundation::{CallId, ConversationId, MessageId, Timestamp, UserId};
use crate::domain::notification::Notification;
use crate::domain::user::UserProfile;
use crate::ports::{ChatStore, NewConversation, ReadOutcome, StoreError};

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, UserProfile>,
    conversations: HashMap<ConversationId, Conversation>,
    memberships: HashMap<ConversationId, Vec<Membership>>,
    messages: HashMap<ConversationId, Vec<Message>>,
    message_index: HashMap<MessageId, ConversationId>,
    reactions: HashMap<MessageId, Vec<Reaction>>,
    calls: HashMap<CallId, Call>,
    notifications: Vec<Notification>,
}

impl Inner {
    fn membership_of(&self, conversation: &ConversationId, user: &UserId) -> Option<&Membership> {
        self.memberships
            .get(conversation)?
            .iter()
            .find(|m| &m.user_id == user)
    }

    fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        let conversation = self.message_index.get(id)?.to_owned();
        self.messages
            .get_mut(&conversation)?
            .iter_mut()
            .find(|m| &m.id == id)
    }

    /// Recomputes which not-yet-READ messages are now read by every
    /// non-sender member, advancing their status.
    fn recompute_read(&mut self, conversation: &ConversationId) -> Vec<MessageId> {
        let members = match self.memberships.get(conversation) {
            Some(m) => m.clone(),
            None => return Vec::new(),
        };
        let mut newly_read = Vec::new();
        if let Some(messages) = self.messages.get_mut(conversation) {
            for message in messages.iter_mut() {
                if message.status == MessageStatus::Read {
                    continue;
                }
                let all_read = members
                    .iter()
                    .filter(|m| Some(&m.user_id) != message.sender_id.as_ref())
                    .all(|m| m.has_read(message.created_at));
                if all_read && message.advance_status(MessageStatus::Read) {
                    newly_read.push(message.id);
                }
            }
        }
        newly_read
    }
}

/// Mutexed-map store.
#[derive(Default)]
pub struct MemoryChatStore {
    inner: Mutex<Inner>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications recorded for a user (test inspection).
    pub fn notifications_of(&self, user: &UserId) -> Vec<Notification> {
        let inner = self.inner.lock().unwrap();
        inner
            .notifications
            .iter()
            .filter(|n| &n.user_id == user)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn upsert_user(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.users.insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.get(id).cloned())
    }

    async fn set_presence(
        &self,
        id: &UserId,
        online: bool,
        last_seen: Timestamp,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.get_mut(id) {
            user.is_online = online;
            user.last_seen_at = Some(last_seen);
        }
        Ok(())
    }

    async fn create_conversation(&self, new: NewConversation) -> Result<Conversation, StoreError> {
        new.kind
            .validate_member_count(new.members.len())
            .map_err(|e| StoreError::conflict(e.to_string()))?;
        if !new.members.contains(&new.created_by) {
            return Err(StoreError::conflict("creator must be a member"));
        }
        let mut distinct = new.members.clone();
        distinct.sort();
        distinct.dedup();
        if distinct.len() != new.members.len() {
            return Err(StoreError::conflict("duplicate members"));
        }

        let conversation =
            Conversation::new(new.kind, new.created_by.clone(), new.title, new.system_prompt)
                .map_err(|e| StoreError::conflict(e.to_string()))?;

        let memberships: Vec<Membership> = new
            .members
            .iter()
            .map(|user| {
                let role = if user == &new.created_by {
                    MemberRole::Owner
                } else {
                    MemberRole::Member
                };
                Membership::new(conversation.id, user.clone(), role)
            })
            .collect();

        let mut inner = self.inner.lock().unwrap();
        inner.conversations.insert(conversation.id, conversation.clone());
        inner.memberships.insert(conversation.id, memberships);
        inner.messages.insert(conversation.id, Vec::new());
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.conversations.get(id).cloned())
    }

    async fn membership(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<Option<Membership>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.membership_of(conversation, user).cloned())
    }

    async fn members_of(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Membership>, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .memberships
            .get(conversation)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("conversation {}", conversation)))
    }

    async fn conversations_of(&self, user: &UserId) -> Result<Vec<ConversationId>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .memberships
            .iter()
            .filter(|(_, members)| members.iter().any(|m| &m.user_id == user))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn add_member(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        role: MemberRole,
    ) -> Result<Membership, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let kind = inner
            .conversations
            .get(conversation)
            .ok_or_else(|| StoreError::not_found(format!("conversation {}", conversation)))?
            .kind;
        if kind != ConversationKind::Group {
            return Err(StoreError::conflict("membership is fixed for this conversation kind"));
        }
        let members = inner.memberships.entry(*conversation).or_default();
        if members.iter().any(|m| &m.user_id == user) {
            return Err(StoreError::conflict("already a member"));
        }
        let membership = Membership::new(*conversation, user.clone(), role);
        members.push(membership.clone());
        Ok(membership)
    }

    async fn remove_member(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let members = inner
            .memberships
            .get_mut(conversation)
            .ok_or_else(|| StoreError::not_found(format!("conversation {}", conversation)))?;
        let position = members
            .iter()
            .position(|m| &m.user_id == user)
            .ok_or_else(|| StoreError::not_found(format!("membership of {}", user)))?;
        let is_owner = members[position].role == MemberRole::Owner;
        let owner_count = members.iter().filter(|m| m.role == MemberRole::Owner).count();
        if is_owner && owner_count == 1 {
            return Err(StoreError::forbidden("the last owner cannot leave"));
        }
        members.remove(position);
        Ok(())
    }

    async fn promote_member(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        role: MemberRole,
    ) -> Result<Membership, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let members = inner
            .memberships
            .get_mut(conversation)
            .ok_or_else(|| StoreError::not_found(format!("conversation {}", conversation)))?;
        if !members.iter().any(|m| &m.user_id == user) {
            return Err(StoreError::not_found(format!("membership of {}", user)));
        }
        // Ownership transfers: the previous owner steps down to admin.
        if role == MemberRole::Owner {
            for m in members.iter_mut() {
                if m.role == MemberRole::Owner {
                    m.role = MemberRole::Admin;
                }
            }
        }
        let member = members
            .iter_mut()
            .find(|m| &m.user_id == user)
            .expect("membership checked above");
        member.role = role;
        Ok(member.clone())
    }

    async fn shares_conversation(&self, a: &UserId, b: &UserId) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.memberships.values().any(|members| {
            members.iter().any(|m| &m.user_id == a) && members.iter().any(|m| &m.user_id == b)
        }))
    }

    async fn append_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.conversations.contains_key(&message.conversation_id) {
            return Err(StoreError::not_found(format!(
                "conversation {}",
                message.conversation_id
            )));
        }
        if let Some(sender) = &message.sender_id {
            if inner.membership_of(&message.conversation_id, sender).is_none() {
                return Err(StoreError::forbidden("sender is not a member"));
            }
        }
        if let Some(reply_to) = &message.reply_to_id {
            match inner.message_index.get(reply_to) {
                Some(conv) if conv == &message.conversation_id => {}
                _ => {
                    return Err(StoreError::not_found(format!(
                        "reply target {} in conversation",
                        reply_to
                    )))
                }
            }
        }

        inner
            .message_index
            .insert(message.id, message.conversation_id);
        inner
            .messages
            .entry(message.conversation_id)
            .or_default()
            .push(message.clone());
        let created_at = message.created_at;
        if let Some(conversation) = inner.conversations.get_mut(&message.conversation_id) {
            conversation.touch(created_at);
        }
        Ok(())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.message_mut(id).map(|m| m.clone()))
    }

    async fn edit_message(
        &self,
        id: &MessageId,
        actor: &UserId,
        content: &str,
    ) -> Result<Message, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let message = inner
            .message_mut(id)
            .filter(|m| !m.is_deleted)
            .ok_or_else(|| StoreError::not_found(format!("message {}", id)))?;
        if message.sender_id.as_ref() != Some(actor) {
            return Err(StoreError::forbidden("only the sender may edit"));
        }
        message
            .apply_edit(content)
            .map_err(|e| StoreError::conflict(e.to_string()))?;
        Ok(message.clone())
    }

    async fn delete_message(&self, id: &MessageId, actor: &UserId) -> Result<Message, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let conversation = *inner
            .message_index
            .get(id)
            .ok_or_else(|| StoreError::not_found(format!("message {}", id)))?;
        let sender = inner
            .message_mut(id)
            .filter(|m| !m.is_deleted)
            .ok_or_else(|| StoreError::not_found(format!("message {}", id)))?
            .sender_id
            .clone();

        let is_sender = sender.as_ref() == Some(actor);
        let can_moderate = inner
            .membership_of(&conversation, actor)
            .is_some_and(|m| m.role.can_moderate());
        if !is_sender && !can_moderate {
            return Err(StoreError::forbidden("sender or moderator required"));
        }

        let message = inner.message_mut(id).expect("message checked above");
        message.tombstone();
        Ok(message.clone())
    }

    async fn tombstone_message(&self, id: &MessageId) -> Result<Message, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let message = inner
            .message_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("message {}", id)))?;
        message.tombstone();
        Ok(message.clone())
    }

    async fn toggle_reaction(
        &self,
        message: &MessageId,
        user: &UserId,
        emoji: &str,
    ) -> Result<Vec<Reaction>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.message_mut(message).filter(|m| !m.is_deleted).is_none() {
            return Err(StoreError::not_found(format!("message {}", message)));
        }
        let reactions = inner.reactions.entry(*message).or_default();
        if let Some(position) = reactions.iter().position(|r| r.same_key(user, emoji)) {
            reactions.remove(position);
        } else {
            let reaction = Reaction::new(*message, user.clone(), emoji)
                .map_err(|e| StoreError::conflict(e.to_string()))?;
            reactions.push(reaction);
        }
        Ok(reactions.clone())
    }

    async fn mark_read(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        up_to: Timestamp,
    ) -> Result<ReadOutcome, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let members = inner
            .memberships
            .get_mut(conversation)
            .ok_or_else(|| StoreError::not_found(format!("conversation {}", conversation)))?;
        let member = members
            .iter_mut()
            .find(|m| &m.user_id == user)
            .ok_or_else(|| StoreError::forbidden("not a member"))?;
        member.advance_last_read(up_to);
        let last_read_at = member.last_read_at.expect("set above");
        let newly_read = inner.recompute_read(conversation);
        Ok(ReadOutcome {
            last_read_at,
            newly_read,
        })
    }

    async fn mark_delivered(&self, message: &MessageId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let message = inner
            .message_mut(message)
            .ok_or_else(|| StoreError::not_found("message"))?;
        if message.status != MessageStatus::Sent {
            return Ok(false);
        }
        Ok(message.advance_status(MessageStatus::Delivered))
    }

    async fn list_history(
        &self,
        conversation: &ConversationId,
        before: Option<Timestamp>,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let messages = inner
            .messages
            .get(conversation)
            .ok_or_else(|| StoreError::not_found(format!("conversation {}", conversation)))?;
        let mut page: Vec<Message> = messages
            .iter()
            .filter(|m| before.map_or(true, |b| m.created_at < b))
            .cloned()
            .collect();
        page.sort_by_key(|m| m.created_at);
        let skip = page.len().saturating_sub(limit as usize);
        Ok(page.split_off(skip))
    }

    async fn last_ai_response(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.messages.get(conversation).and_then(|messages| {
            messages
                .iter()
                .rev()
                .find(|m| m.kind == MessageKind::AiResponse && !m.is_deleted)
                .cloned()
        }))
    }

    async fn create_call(&self, call: &Call) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.calls.contains_key(&call.id) {
            return Err(StoreError::conflict(format!("call {} exists", call.id)));
        }
        inner.calls.insert(call.id, call.clone());
        Ok(())
    }

    async fn get_call(&self, id: &CallId) -> Result<Option<Call>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.calls.get(id).cloned())
    }

    async fn transition_call(
        &self,
        id: &CallId,
        expected: CallState,
        next: CallState,
    ) -> Result<Call, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let call = inner
            .calls
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("call {}", id)))?;
        if call.state != expected {
            return Err(StoreError::InvalidCallState {
                expected,
                actual: call.state,
            });
        }
        call.apply_transition(next)
            .map_err(|e| StoreError::conflict(e.to_string()))?;
        Ok(call.clone())
    }

    async fn create_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.notifications.push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    async fn direct_conversation(store: &MemoryChatStore, a: &str, b: &str) -> Conversation {
        store
            .create_conversation(NewConversation {
                kind: ConversationKind::Direct,
                created_by: user(a),
                members: vec![user(a), user(b)],
                title: None,
                system_prompt: None,
            })
            .await
            .unwrap()
    }

    fn text(conv: &Conversation, sender: &str, content: &str) -> Message {
        Message::from_user(conv.id, user(sender), MessageKind::Text, content, None).unwrap()
    }

    #[tokio::test]
    async fn direct_conversation_enforces_two_members() {
        let store = MemoryChatStore::new();
        let result = store
            .create_conversation(NewConversation {
                kind: ConversationKind::Direct,
                created_by: user("a"),
                members: vec![user("a")],
                title: None,
                system_prompt: None,
            })
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn append_rejects_non_member_sender() {
        let store = MemoryChatStore::new();
        let conv = direct_conversation(&store, "a", "b").await;
        let msg = text(&conv, "stranger", "hi");
        assert!(matches!(
            store.append_message(&msg).await,
            Err(StoreError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn append_bumps_conversation_updated_at() {
        let store = MemoryChatStore::new();
        let conv = direct_conversation(&store, "a", "b").await;
        let msg = text(&conv, "a", "hi");
        store.append_message(&msg).await.unwrap();
        let reloaded = store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(reloaded.updated_at, msg.created_at);
    }

    #[tokio::test]
    async fn reply_target_must_live_in_same_conversation() {
        let store = MemoryChatStore::new();
        let conv1 = direct_conversation(&store, "a", "b").await;
        let conv2 = direct_conversation(&store, "a", "c").await;
        let original = text(&conv1, "a", "root");
        store.append_message(&original).await.unwrap();

        let cross_reply = Message::from_user(
            conv2.id,
            user("a"),
            MessageKind::Text,
            "reply",
            Some(original.id),
        )
        .unwrap();
        assert!(matches!(
            store.append_message(&cross_reply).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn only_sender_may_edit() {
        let store = MemoryChatStore::new();
        let conv = direct_conversation(&store, "a", "b").await;
        let msg = text(&conv, "a", "original");
        store.append_message(&msg).await.unwrap();

        assert!(matches!(
            store.edit_message(&msg.id, &user("b"), "hijack").await,
            Err(StoreError::Forbidden(_))
        ));
        let edited = store.edit_message(&msg.id, &user("a"), "fixed").await.unwrap();
        assert!(edited.is_edited);
        assert_eq!(edited.content, "fixed");
        assert_eq!(edited.created_at, msg.created_at);
    }

    #[tokio::test]
    async fn moderator_may_delete_foreign_message() {
        let store = MemoryChatStore::new();
        let conv = store
            .create_conversation(NewConversation {
                kind: ConversationKind::Group,
                created_by: user("owner"),
                members: vec![user("owner"), user("member")],
                title: Some("general".into()),
                system_prompt: None,
            })
            .await
            .unwrap();
        let msg = text(&conv, "member", "spam");
        store.append_message(&msg).await.unwrap();

        assert!(matches!(
            store.delete_message(&msg.id, &user("member2")).await,
            Err(StoreError::Forbidden(_)) | Err(StoreError::NotFound(_))
        ));
        let deleted = store.delete_message(&msg.id, &user("owner")).await.unwrap();
        assert!(deleted.is_deleted);
        assert!(deleted.content.is_empty());
    }

    #[tokio::test]
    async fn reaction_toggle_is_an_involution() {
        let store = MemoryChatStore::new();
        let conv = direct_conversation(&store, "a", "b").await;
        let msg = text(&conv, "a", "react to me");
        store.append_message(&msg).await.unwrap();

        let after_one = store.toggle_reaction(&msg.id, &user("b"), "👍").await.unwrap();
        assert_eq!(after_one.len(), 1);
        let after_two = store.toggle_reaction(&msg.id, &user("b"), "👍").await.unwrap();
        assert!(after_two.is_empty());
        let after_three = store.toggle_reaction(&msg.id, &user("b"), "👍").await.unwrap();
        assert_eq!(after_three.len(), 1);
    }

    #[tokio::test]
    async fn mark_read_reports_newly_read_messages() {
        let store = MemoryChatStore::new();
        let conv = direct_conversation(&store, "a", "b").await;
        let msg = text(&conv, "a", "hi");
        store.append_message(&msg).await.unwrap();

        let outcome = store
            .mark_read(&conv.id, &user("b"), msg.created_at)
            .await
            .unwrap();
        assert_eq!(outcome.newly_read, vec![msg.id]);

        // Second read of the same point reports nothing new.
        let again = store
            .mark_read(&conv.id, &user("b"), msg.created_at)
            .await
            .unwrap();
        assert!(again.newly_read.is_empty());
    }

    #[tokio::test]
    async fn last_read_never_regresses() {
        let store = MemoryChatStore::new();
        let conv = direct_conversation(&store, "a", "b").await;
        let now = Timestamp::now();
        let outcome = store.mark_read(&conv.id, &user("b"), now).await.unwrap();
        assert_eq!(outcome.last_read_at, now);
        let earlier = store
            .mark_read(&conv.id, &user("b"), now.minus_seconds(60))
            .await
            .unwrap();
        assert_eq!(earlier.last_read_at, now);
    }

    #[tokio::test]
    async fn history_pages_backwards_in_ascending_order() {
        let store = MemoryChatStore::new();
        let conv = direct_conversation(&store, "a", "b").await;
        let mut ids = Vec::new();
        for i in 0..5 {
            let msg = text(&conv, "a", &format!("m{}", i));
            store.append_message(&msg).await.unwrap();
            ids.push(msg.id);
        }

        let latest = store.list_history(&conv.id, None, 2).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].id, ids[3]);
        assert_eq!(latest[1].id, ids[4]);
        assert!(latest[0].created_at <= latest[1].created_at);

        let earlier = store
            .list_history(&conv.id, Some(latest[0].created_at), 10)
            .await
            .unwrap();
        assert_eq!(earlier.len(), 3);
        assert_eq!(earlier.last().unwrap().id, ids[2]);
    }

    #[tokio::test]
    async fn call_cas_rejects_stale_expectations() {
        let store = MemoryChatStore::new();
        let call = Call::new(ConversationId::new(), user("a"), user("b"), crate::domain::call::CallKind::Audio);
        store.create_call(&call).await.unwrap();

        store
            .transition_call(&call.id, CallState::Initiated, CallState::Ringing)
            .await
            .unwrap();
        store
            .transition_call(&call.id, CallState::Ringing, CallState::Rejected)
            .await
            .unwrap();

        // A racing accept loses the CAS.
        let result = store
            .transition_call(&call.id, CallState::Ringing, CallState::Active)
            .await;
        assert!(matches!(result, Err(StoreError::InvalidCallState { .. })));
    }

    #[tokio::test]
    async fn last_owner_cannot_leave_group() {
        let store = MemoryChatStore::new();
        let conv = store
            .create_conversation(NewConversation {
                kind: ConversationKind::Group,
                created_by: user("owner"),
                members: vec![user("owner"), user("m1")],
                title: None,
                system_prompt: None,
            })
            .await
            .unwrap();

        assert!(matches!(
            store.remove_member(&conv.id, &user("owner")).await,
            Err(StoreError::Forbidden(_))
        ));

        // After promotion the old owner may leave.
        store
            .promote_member(&conv.id, &user("m1"), MemberRole::Owner)
            .await
            .unwrap();
        store.remove_member(&conv.id, &user("owner")).await.unwrap();
    }

    #[tokio::test]
    async fn promotion_to_owner_demotes_previous_owner() {
        let store = MemoryChatStore::new();
        let conv = store
            .create_conversation(NewConversation {
                kind: ConversationKind::Group,
                created_by: user("owner"),
                members: vec![user("owner"), user("m1")],
                title: None,
                system_prompt: None,
            })
            .await
            .unwrap();

        store
            .promote_member(&conv.id, &user("m1"), MemberRole::Owner)
            .await
            .unwrap();
        let old = store.membership(&conv.id, &user("owner")).await.unwrap().unwrap();
        assert_eq!(old.role, MemberRole::Admin);
        let owners = store
            .members_of(&conv.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.role == MemberRole::Owner)
            .count();
        assert_eq!(owners, 1);
    }

    #[tokio::test]
    async fn last_ai_response_skips_tombstones() {
        let store = MemoryChatStore::new();
        let creator = user("a");
        let conv = store
            .create_conversation(NewConversation {
                kind: ConversationKind::AiChat,
                created_by: creator.clone(),
                members: vec![creator.clone()],
                title: None,
                system_prompt: None,
            })
            .await
            .unwrap();

        let first = Message::ai_response(MessageId::new(), conv.id, "one", None).unwrap();
        store.append_message(&first).await.unwrap();
        let second = Message::ai_response(MessageId::new(), conv.id, "two", None).unwrap();
        store.append_message(&second).await.unwrap();

        store.tombstone_message(&second.id).await.unwrap();
        let last = store.last_ai_response(&conv.id).await.unwrap().unwrap();
        assert_eq!(last.id, first.id);
    }
}
