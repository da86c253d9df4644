//! PostgreSQL implementation of the `ChatStore` port.
//!
//! Message append and the conversation `updated_at` bump share one
//! transaction; the call-state compare-and-set is a conditional UPDATE so
//! racing socket events serialize in the database. Schema management is
//! external; this adapter only issues DML.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::domain::call::{Call, CallKind, CallState};
use crate::domain::conversation::{
    Conversation, ConversationKind, MemberRole, Membership, Message, MessageKind, MessageStatus,
    Reaction,
};
use crate::domain::foundation::{CallId, ConversationId, MessageId, Timestamp, UserId};
use crate::domain::notification::Notification;
use crate::domain::user::UserProfile;
use crate::ports::{ChatStore, NewConversation, ReadOutcome, StoreError};

/// sqlx-backed store.
#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ============================================
// Enum <-> text codecs
// ============================================

fn kind_to_str(kind: ConversationKind) -> &'static str {
    match kind {
        ConversationKind::Direct => "DIRECT",
        ConversationKind::Group => "GROUP",
        ConversationKind::AiChat => "AI_CHAT",
    }
}

fn kind_from_str(s: &str) -> Result<ConversationKind, StoreError> {
    match s {
        "DIRECT" => Ok(ConversationKind::Direct),
        "GROUP" => Ok(ConversationKind::Group),
        "AI_CHAT" => Ok(ConversationKind::AiChat),
        other => Err(StoreError::database(format!("unknown conversation kind {other}"))),
    }
}

fn role_to_str(role: MemberRole) -> &'static str {
    match role {
        MemberRole::Owner => "OWNER",
        MemberRole::Admin => "ADMIN",
        MemberRole::Member => "MEMBER",
    }
}

fn role_from_str(s: &str) -> Result<MemberRole, StoreError> {
    match s {
        "OWNER" => Ok(MemberRole::Owner),
        "ADMIN" => Ok(MemberRole::Admin),
        "MEMBER" => Ok(MemberRole::Member),
        other => Err(StoreError::database(format!("unknown member role {other}"))),
    }
}

fn message_kind_to_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "TEXT",
        MessageKind::Image => "IMAGE",
        MessageKind::Video => "VIDEO",
        MessageKind::Audio => "AUDIO",
        MessageKind::File => "FILE",
        MessageKind::System => "SYSTEM",
        MessageKind::AiResponse => "AI_RESPONSE",
    }
}

fn message_kind_from_str(s: &str) -> Result<MessageKind, StoreError> {
    match s {
        "TEXT" => Ok(MessageKind::Text),
        "IMAGE" => Ok(MessageKind::Image),
        "VIDEO" => Ok(MessageKind::Video),
        "AUDIO" => Ok(MessageKind::Audio),
        "FILE" => Ok(MessageKind::File),
        "SYSTEM" => Ok(MessageKind::System),
        "AI_RESPONSE" => Ok(MessageKind::AiResponse),
        other => Err(StoreError::database(format!("unknown message kind {other}"))),
    }
}

fn status_to_str(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Sent => "SENT",
        MessageStatus::Delivered => "DELIVERED",
        MessageStatus::Read => "READ",
    }
}

fn status_from_str(s: &str) -> Result<MessageStatus, StoreError> {
    match s {
        "SENT" => Ok(MessageStatus::Sent),
        "DELIVERED" => Ok(MessageStatus::Delivered),
        "READ" => Ok(MessageStatus::Read),
        other => Err(StoreError::database(format!("unknown message status {other}"))),
    }
}

fn call_state_to_str(state: CallState) -> &'static str {
    match state {
        CallState::Initiated => "INITIATED",
        CallState::Ringing => "RINGING",
        CallState::Active => "ACTIVE",
        CallState::Ended => "ENDED",
        CallState::Rejected => "REJECTED",
        CallState::Missed => "MISSED",
    }
}

fn call_state_from_str(s: &str) -> Result<CallState, StoreError> {
    match s {
        "INITIATED" => Ok(CallState::Initiated),
        "RINGING" => Ok(CallState::Ringing),
        "ACTIVE" => Ok(CallState::Active),
        "ENDED" => Ok(CallState::Ended),
        "REJECTED" => Ok(CallState::Rejected),
        "MISSED" => Ok(CallState::Missed),
        other => Err(StoreError::database(format!("unknown call state {other}"))),
    }
}

fn call_kind_to_str(kind: CallKind) -> &'static str {
    match kind {
        CallKind::Audio => "AUDIO",
        CallKind::Video => "VIDEO",
    }
}

fn call_kind_from_str(s: &str) -> Result<CallKind, StoreError> {
    match s {
        "AUDIO" => Ok(CallKind::Audio),
        "VIDEO" => Ok(CallKind::Video),
        other => Err(StoreError::database(format!("unknown call kind {other}"))),
    }
}

// ============================================
// Row mapping
// ============================================

fn opt_timestamp(
    row: &PgRow,
    column: &str,
) -> Result<Option<Timestamp>, StoreError> {
    let value: Option<chrono::DateTime<chrono::Utc>> =
        row.try_get(column).map_err(StoreError::database)?;
    Ok(value.map(Timestamp::from_datetime))
}

fn timestamp(row: &PgRow, column: &str) -> Result<Timestamp, StoreError> {
    let value: chrono::DateTime<chrono::Utc> =
        row.try_get(column).map_err(StoreError::database)?;
    Ok(Timestamp::from_datetime(value))
}

fn user_id(row: &PgRow, column: &str) -> Result<UserId, StoreError> {
    let value: String = row.try_get(column).map_err(StoreError::database)?;
    UserId::new(value).map_err(StoreError::database)
}

fn row_to_conversation(row: &PgRow) -> Result<Conversation, StoreError> {
    let kind: String = row.try_get("kind").map_err(StoreError::database)?;
    Ok(Conversation {
        id: ConversationId::from_uuid(row.try_get("id").map_err(StoreError::database)?),
        kind: kind_from_str(&kind)?,
        title: row.try_get("title").map_err(StoreError::database)?,
        created_by: user_id(row, "created_by")?,
        system_prompt: row.try_get("system_prompt").map_err(StoreError::database)?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn row_to_membership(row: &PgRow) -> Result<Membership, StoreError> {
    let role: String = row.try_get("role").map_err(StoreError::database)?;
    Ok(Membership {
        conversation_id: ConversationId::from_uuid(
            row.try_get("conversation_id").map_err(StoreError::database)?,
        ),
        user_id: user_id(row, "user_id")?,
        role: role_from_str(&role)?,
        joined_at: timestamp(row, "joined_at")?,
        last_read_at: opt_timestamp(row, "last_read_at")?,
        is_pinned: row.try_get("is_pinned").map_err(StoreError::database)?,
        is_muted: row.try_get("is_muted").map_err(StoreError::database)?,
    })
}

fn row_to_message(row: &PgRow) -> Result<Message, StoreError> {
    let kind: String = row.try_get("kind").map_err(StoreError::database)?;
    let status: String = row.try_get("status").map_err(StoreError::database)?;
    let sender: Option<String> = row.try_get("sender_id").map_err(StoreError::database)?;
    let reply_to: Option<uuid::Uuid> =
        row.try_get("reply_to_id").map_err(StoreError::database)?;
    let token_count: Option<i32> = row.try_get("token_count").map_err(StoreError::database)?;
    Ok(Message {
        id: MessageId::from_uuid(row.try_get("id").map_err(StoreError::database)?),
        conversation_id: ConversationId::from_uuid(
            row.try_get("conversation_id").map_err(StoreError::database)?,
        ),
        sender_id: sender
            .map(UserId::new)
            .transpose()
            .map_err(StoreError::database)?,
        kind: message_kind_from_str(&kind)?,
        content: row.try_get("content").map_err(StoreError::database)?,
        reply_to_id: reply_to.map(MessageId::from_uuid),
        status: status_from_str(&status)?,
        is_edited: row.try_get("is_edited").map_err(StoreError::database)?,
        edited_at: opt_timestamp(row, "edited_at")?,
        is_deleted: row.try_get("is_deleted").map_err(StoreError::database)?,
        created_at: timestamp(row, "created_at")?,
        token_count: token_count.map(|t| t as u32),
    })
}

fn row_to_reaction(row: &PgRow) -> Result<Reaction, StoreError> {
    Ok(Reaction {
        message_id: MessageId::from_uuid(row.try_get("message_id").map_err(StoreError::database)?),
        user_id: user_id(row, "user_id")?,
        emoji: row.try_get("emoji").map_err(StoreError::database)?,
        created_at: timestamp(row, "created_at")?,
    })
}

fn row_to_call(row: &PgRow) -> Result<Call, StoreError> {
    let kind: String = row.try_get("kind").map_err(StoreError::database)?;
    let state: String = row.try_get("state").map_err(StoreError::database)?;
    Ok(Call {
        id: CallId::from_uuid(row.try_get("id").map_err(StoreError::database)?),
        conversation_id: ConversationId::from_uuid(
            row.try_get("conversation_id").map_err(StoreError::database)?,
        ),
        caller_id: user_id(row, "caller_id")?,
        callee_id: user_id(row, "callee_id")?,
        kind: call_kind_from_str(&kind)?,
        state: call_state_from_str(&state)?,
        initiated_at: timestamp(row, "initiated_at")?,
        ringing_at: opt_timestamp(row, "ringing_at")?,
        connected_at: opt_timestamp(row, "connected_at")?,
        ended_at: opt_timestamp(row, "ended_at")?,
    })
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn upsert_user(&self, profile: &UserProfile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, avatar_url, bio, is_online, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                avatar_url = COALESCE(EXCLUDED.avatar_url, users.avatar_url)
            "#,
        )
        .bind(profile.id.as_str())
        .bind(&profile.display_name)
        .bind(&profile.avatar_url)
        .bind(&profile.bio)
        .bind(profile.is_online)
        .bind(profile.last_seen_at.map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(StoreError::database)?;
        Ok(())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query(
            "SELECT id, display_name, avatar_url, bio, is_online, last_seen_at FROM users WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::database)?;

        row.map(|row| {
            Ok(UserProfile {
                id: user_id(&row, "id")?,
                display_name: row.try_get("display_name").map_err(StoreError::database)?,
                avatar_url: row.try_get("avatar_url").map_err(StoreError::database)?,
                bio: row.try_get("bio").map_err(StoreError::database)?,
                is_online: row.try_get("is_online").map_err(StoreError::database)?,
                last_seen_at: opt_timestamp(&row, "last_seen_at")?,
            })
        })
        .transpose()
    }

    async fn set_presence(
        &self,
        id: &UserId,
        online: bool,
        last_seen: Timestamp,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET is_online = $2, last_seen_at = $3 WHERE id = $1")
            .bind(id.as_str())
            .bind(online)
            .bind(*last_seen.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(StoreError::database)?;
        Ok(())
    }

    async fn create_conversation(&self, new: NewConversation) -> Result<Conversation, StoreError> {
        new.kind
            .validate_member_count(new.members.len())
            .map_err(|e| StoreError::conflict(e.to_string()))?;
        if !new.members.contains(&new.created_by) {
            return Err(StoreError::conflict("creator must be a member"));
        }

        let conversation =
            Conversation::new(new.kind, new.created_by.clone(), new.title, new.system_prompt)
                .map_err(|e| StoreError::conflict(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(StoreError::database)?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, kind, title, created_by, system_prompt, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(conversation.id.as_uuid())
        .bind(kind_to_str(conversation.kind))
        .bind(&conversation.title)
        .bind(conversation.created_by.as_str())
        .bind(&conversation.system_prompt)
        .bind(*conversation.created_at.as_datetime())
        .bind(*conversation.updated_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::database)?;

        for member in &new.members {
            let role = if member == &new.created_by {
                MemberRole::Owner
            } else {
                MemberRole::Member
            };
            sqlx::query(
                r#"
                INSERT INTO memberships (conversation_id, user_id, role, joined_at, is_pinned, is_muted)
                VALUES ($1, $2, $3, $4, FALSE, FALSE)
                "#,
            )
            .bind(conversation.id.as_uuid())
            .bind(member.as_str())
            .bind(role_to_str(role))
            .bind(*conversation.created_at.as_datetime())
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    StoreError::conflict("duplicate members")
                }
                other => StoreError::database(other),
            })?;
        }

        tx.commit().await.map_err(StoreError::database)?;
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query(
            "SELECT id, kind, title, created_by, system_prompt, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::database)?;
        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn membership(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<Option<Membership>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT conversation_id, user_id, role, joined_at, last_read_at, is_pinned, is_muted
            FROM memberships WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(conversation.as_uuid())
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::database)?;
        row.as_ref().map(row_to_membership).transpose()
    }

    async fn members_of(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Membership>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT conversation_id, user_id, role, joined_at, last_read_at, is_pinned, is_muted
            FROM memberships WHERE conversation_id = $1 ORDER BY joined_at
            "#,
        )
        .bind(conversation.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::database)?;
        rows.iter().map(row_to_membership).collect()
    }

    async fn conversations_of(&self, user: &UserId) -> Result<Vec<ConversationId>, StoreError> {
        let rows = sqlx::query("SELECT conversation_id FROM memberships WHERE user_id = $1")
            .bind(user.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::database)?;
        rows.iter()
            .map(|row| {
                Ok(ConversationId::from_uuid(
                    row.try_get("conversation_id").map_err(StoreError::database)?,
                ))
            })
            .collect()
    }

    async fn add_member(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        role: MemberRole,
    ) -> Result<Membership, StoreError> {
        let existing = self
            .get_conversation(conversation)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("conversation {}", conversation)))?;
        if existing.kind != ConversationKind::Group {
            return Err(StoreError::conflict("membership is fixed for this conversation kind"));
        }

        let membership = Membership::new(*conversation, user.clone(), role);
        sqlx::query(
            r#"
            INSERT INTO memberships (conversation_id, user_id, role, joined_at, is_pinned, is_muted)
            VALUES ($1, $2, $3, $4, FALSE, FALSE)
            "#,
        )
        .bind(conversation.as_uuid())
        .bind(user.as_str())
        .bind(role_to_str(role))
        .bind(*membership.joined_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::conflict("already a member")
            }
            other => StoreError::database(other),
        })?;
        Ok(membership)
    }

    async fn remove_member(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::database)?;

        let row = sqlx::query(
            "SELECT role FROM memberships WHERE conversation_id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(conversation.as_uuid())
        .bind(user.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::database)?
        .ok_or_else(|| StoreError::not_found(format!("membership of {}", user)))?;
        let role: String = row.try_get("role").map_err(StoreError::database)?;

        if role_from_str(&role)? == MemberRole::Owner {
            let owners: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM memberships WHERE conversation_id = $1 AND role = 'OWNER'",
            )
            .bind(conversation.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::database)?;
            if owners.0 <= 1 {
                return Err(StoreError::forbidden("the last owner cannot leave"));
            }
        }

        sqlx::query("DELETE FROM memberships WHERE conversation_id = $1 AND user_id = $2")
            .bind(conversation.as_uuid())
            .bind(user.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::database)?;

        tx.commit().await.map_err(StoreError::database)?;
        Ok(())
    }

    async fn promote_member(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        role: MemberRole,
    ) -> Result<Membership, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::database)?;

        if role == MemberRole::Owner {
            sqlx::query(
                "UPDATE memberships SET role = 'ADMIN' WHERE conversation_id = $1 AND role = 'OWNER'",
            )
            .bind(conversation.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::database)?;
        }

        let row = sqlx::query(
            r#"
            UPDATE memberships SET role = $3
            WHERE conversation_id = $1 AND user_id = $2
            RETURNING conversation_id, user_id, role, joined_at, last_read_at, is_pinned, is_muted
            "#,
        )
        .bind(conversation.as_uuid())
        .bind(user.as_str())
        .bind(role_to_str(role))
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::database)?
        .ok_or_else(|| StoreError::not_found(format!("membership of {}", user)))?;

        tx.commit().await.map_err(StoreError::database)?;
        row_to_membership(&row)
    }

    async fn shares_conversation(&self, a: &UserId, b: &UserId) -> Result<bool, StoreError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM memberships ma
            JOIN memberships mb ON ma.conversation_id = mb.conversation_id
            WHERE ma.user_id = $1 AND mb.user_id = $2
            "#,
        )
        .bind(a.as_str())
        .bind(b.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::database)?;
        Ok(row.0 > 0)
    }

    async fn append_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::database)?;

        if let Some(sender) = &message.sender_id {
            let member: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM memberships WHERE conversation_id = $1 AND user_id = $2",
            )
            .bind(message.conversation_id.as_uuid())
            .bind(sender.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::database)?;
            if member.0 == 0 {
                return Err(StoreError::forbidden("sender is not a member"));
            }
        }

        if let Some(reply_to) = &message.reply_to_id {
            let target: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM messages WHERE id = $1 AND conversation_id = $2",
            )
            .bind(reply_to.as_uuid())
            .bind(message.conversation_id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::database)?;
            if target.0 == 0 {
                return Err(StoreError::not_found("reply target in conversation"));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, conversation_id, sender_id, kind, content, reply_to_id,
                status, is_edited, edited_at, is_deleted, created_at, token_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(message.id.as_uuid())
        .bind(message.conversation_id.as_uuid())
        .bind(message.sender_id.as_ref().map(|u| u.as_str()))
        .bind(message_kind_to_str(message.kind))
        .bind(&message.content)
        .bind(message.reply_to_id.as_ref().map(|m| *m.as_uuid()))
        .bind(status_to_str(message.status))
        .bind(message.is_edited)
        .bind(message.edited_at.map(|t| *t.as_datetime()))
        .bind(message.is_deleted)
        .bind(*message.created_at.as_datetime())
        .bind(message.token_count.map(|t| t as i32))
        .execute(&mut *tx)
        .await
        .map_err(StoreError::database)?;

        let bumped = sqlx::query(
            "UPDATE conversations SET updated_at = GREATEST(updated_at, $2) WHERE id = $1",
        )
        .bind(message.conversation_id.as_uuid())
        .bind(*message.created_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::database)?;
        if bumped.rows_affected() == 0 {
            return Err(StoreError::not_found(format!(
                "conversation {}",
                message.conversation_id
            )));
        }

        tx.commit().await.map_err(StoreError::database)?;
        Ok(())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::database)?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn edit_message(
        &self,
        id: &MessageId,
        actor: &UserId,
        content: &str,
    ) -> Result<Message, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE messages SET content = $3, is_edited = TRUE, edited_at = NOW()
            WHERE id = $1 AND sender_id = $2 AND NOT is_deleted
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(actor.as_str())
        .bind(content)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::database)?;

        match row {
            Some(row) => row_to_message(&row),
            // Distinguish a missing message from a foreign one.
            None => match self.get_message(id).await? {
                Some(m) if !m.is_deleted => Err(StoreError::forbidden("only the sender may edit")),
                _ => Err(StoreError::not_found(format!("message {}", id))),
            },
        }
    }

    async fn delete_message(&self, id: &MessageId, actor: &UserId) -> Result<Message, StoreError> {
        let message = self
            .get_message(id)
            .await?
            .filter(|m| !m.is_deleted)
            .ok_or_else(|| StoreError::not_found(format!("message {}", id)))?;

        let is_sender = message.sender_id.as_ref() == Some(actor);
        if !is_sender {
            let moderator = self
                .membership(&message.conversation_id, actor)
                .await?
                .is_some_and(|m| m.role.can_moderate());
            if !moderator {
                return Err(StoreError::forbidden("sender or moderator required"));
            }
        }

        self.tombstone_message(id).await
    }

    async fn tombstone_message(&self, id: &MessageId) -> Result<Message, StoreError> {
        let row = sqlx::query(
            "UPDATE messages SET content = '', is_deleted = TRUE WHERE id = $1 RETURNING *",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::database)?
        .ok_or_else(|| StoreError::not_found(format!("message {}", id)))?;
        row_to_message(&row)
    }

    async fn toggle_reaction(
        &self,
        message: &MessageId,
        user: &UserId,
        emoji: &str,
    ) -> Result<Vec<Reaction>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::database)?;

        let removed = sqlx::query(
            "DELETE FROM reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
        )
        .bind(message.as_uuid())
        .bind(user.as_str())
        .bind(emoji)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::database)?;

        if removed.rows_affected() == 0 {
            let reaction = Reaction::new(*message, user.clone(), emoji)
                .map_err(|e| StoreError::conflict(e.to_string()))?;
            sqlx::query(
                "INSERT INTO reactions (message_id, user_id, emoji, created_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(message.as_uuid())
            .bind(user.as_str())
            .bind(&reaction.emoji)
            .bind(*reaction.created_at.as_datetime())
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                    StoreError::not_found(format!("message {}", message))
                }
                other => StoreError::database(other),
            })?;
        }

        let rows = sqlx::query(
            "SELECT message_id, user_id, emoji, created_at FROM reactions WHERE message_id = $1 ORDER BY created_at",
        )
        .bind(message.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(StoreError::database)?;

        tx.commit().await.map_err(StoreError::database)?;
        rows.iter().map(row_to_reaction).collect()
    }

    async fn mark_read(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        up_to: Timestamp,
    ) -> Result<ReadOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::database)?;

        let row = sqlx::query(
            r#"
            UPDATE memberships
            SET last_read_at = GREATEST(COALESCE(last_read_at, 'epoch'::timestamptz), $3)
            WHERE conversation_id = $1 AND user_id = $2
            RETURNING last_read_at
            "#,
        )
        .bind(conversation.as_uuid())
        .bind(user.as_str())
        .bind(*up_to.as_datetime())
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::database)?
        .ok_or_else(|| StoreError::forbidden("not a member"))?;
        let last_read_at = timestamp(&row, "last_read_at")?;

        // A message is READ once every member other than its sender has
        // last_read_at at or past its created_at.
        let rows = sqlx::query(
            r#"
            UPDATE messages SET status = 'READ'
            WHERE conversation_id = $1
              AND status <> 'READ'
              AND NOT EXISTS (
                  SELECT 1 FROM memberships m
                  WHERE m.conversation_id = messages.conversation_id
                    AND (messages.sender_id IS NULL OR m.user_id <> messages.sender_id)
                    AND (m.last_read_at IS NULL OR m.last_read_at < messages.created_at)
              )
            RETURNING id
            "#,
        )
        .bind(conversation.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(StoreError::database)?;

        tx.commit().await.map_err(StoreError::database)?;

        let newly_read = rows
            .iter()
            .map(|row| {
                Ok(MessageId::from_uuid(
                    row.try_get("id").map_err(StoreError::database)?,
                ))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(ReadOutcome {
            last_read_at,
            newly_read,
        })
    }

    async fn mark_delivered(&self, message: &MessageId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET status = 'DELIVERED' WHERE id = $1 AND status = 'SENT'",
        )
        .bind(message.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(StoreError::database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_history(
        &self,
        conversation: &ConversationId,
        before: Option<Timestamp>,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT * FROM messages
                WHERE conversation_id = $1 AND ($2::timestamptz IS NULL OR created_at < $2)
                ORDER BY created_at DESC
                LIMIT $3
            ) page ORDER BY created_at ASC
            "#,
        )
        .bind(conversation.as_uuid())
        .bind(before.map(|t| *t.as_datetime()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::database)?;
        rows.iter().map(row_to_message).collect()
    }

    async fn last_ai_response(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1 AND kind = 'AI_RESPONSE' AND NOT is_deleted
            ORDER BY created_at DESC LIMIT 1
            "#,
        )
        .bind(conversation.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::database)?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn create_call(&self, call: &Call) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO calls (
                id, conversation_id, caller_id, callee_id, kind, state,
                initiated_at, ringing_at, connected_at, ended_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(call.id.as_uuid())
        .bind(call.conversation_id.as_uuid())
        .bind(call.caller_id.as_str())
        .bind(call.callee_id.as_str())
        .bind(call_kind_to_str(call.kind))
        .bind(call_state_to_str(call.state))
        .bind(*call.initiated_at.as_datetime())
        .bind(call.ringing_at.map(|t| *t.as_datetime()))
        .bind(call.connected_at.map(|t| *t.as_datetime()))
        .bind(call.ended_at.map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(StoreError::database)?;
        Ok(())
    }

    async fn get_call(&self, id: &CallId) -> Result<Option<Call>, StoreError> {
        let row = sqlx::query("SELECT * FROM calls WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::database)?;
        row.as_ref().map(row_to_call).transpose()
    }

    async fn transition_call(
        &self,
        id: &CallId,
        expected: CallState,
        next: CallState,
    ) -> Result<Call, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE calls SET
                state = $3,
                ringing_at = CASE WHEN $3 = 'RINGING' THEN NOW() ELSE ringing_at END,
                connected_at = CASE WHEN $3 = 'ACTIVE' THEN NOW() ELSE connected_at END,
                ended_at = CASE WHEN $3 IN ('ENDED', 'REJECTED', 'MISSED') THEN NOW() ELSE ended_at END
            WHERE id = $1 AND state = $2
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(call_state_to_str(expected))
        .bind(call_state_to_str(next))
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::database)?;

        match row {
            Some(row) => row_to_call(&row),
            None => {
                let current = self
                    .get_call(id)
                    .await?
                    .ok_or_else(|| StoreError::not_found(format!("call {}", id)))?;
                Err(StoreError::InvalidCallState {
                    expected,
                    actual: current.state,
                })
            }
        }
    }

    async fn create_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let kind = match notification.kind {
            crate::domain::notification::NotificationKind::NewMessage => "NEW_MESSAGE",
            crate::domain::notification::NotificationKind::Mention => "MENTION",
            crate::domain::notification::NotificationKind::CallMissed => "CALL_MISSED",
            crate::domain::notification::NotificationKind::AiComplete => "AI_COMPLETE",
        };
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, title, body, data, is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(notification.id.as_uuid())
        .bind(notification.user_id.as_str())
        .bind(kind)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(&notification.data)
        .bind(notification.is_read)
        .bind(*notification.created_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(StoreError::database)?;
        Ok(())
    }
}
