//! Wire protocol: event envelopes, error kinds, and ack bookkeeping.
//!
//! Every frame is UTF-8 JSON `{type, data, messageId?}`. Both directions are
//! statically declared unions decoded/encoded in one serde step at the edge;
//! a frame that does not match the union is answered with
//! `invalid_argument` and otherwise ignored.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::domain::call::{Call, CallKind, CallState};
use crate::domain::conversation::{Conversation, MemberRole, Message, MessageKind, MessageStatus, Reaction};
use crate::domain::foundation::{
    AckId, CallId, ConversationId, MessageId, Timestamp, UserId, ValidationError,
};
use crate::domain::notification::Notification;
use crate::ports::StoreError;

// ============================================
// Errors surfaced to clients
// ============================================

/// Client-visible error kinds, serialized snake_case on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthenticated,
    Unauthorized,
    NotFound,
    InvalidArgument,
    InvalidCallState,
    UserBusy,
    AiStreamBusy,
    RateLimited,
    Internal,
}

/// An error envelope sent as an `error` event or inside an ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn invalid_call_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidCallState, message)
    }

    pub fn user_busy() -> Self {
        Self::new(ErrorKind::UserBusy, "user is already in a call")
    }

    pub fn ai_stream_busy() -> Self {
        Self::new(ErrorKind::AiStreamBusy, "a response is already streaming")
    }

    pub fn rate_limited() -> Self {
        Self::new(ErrorKind::RateLimited, "too many events, slow down")
    }

    /// Internal fault; the wire message stays generic.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ClientError {}

impl From<ValidationError> for ClientError {
    fn from(err: ValidationError) -> Self {
        ClientError::invalid_argument(err.to_string())
    }
}

impl From<StoreError> for ClientError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ClientError::not_found(what),
            StoreError::Forbidden(why) => ClientError::unauthorized(why),
            StoreError::InvalidCallState { expected, actual } => ClientError::invalid_call_state(
                format!("expected {}, call is {}", expected, actual),
            ),
            StoreError::Conflict(what) => ClientError::invalid_argument(what),
            StoreError::Database(detail) => {
                tracing::error!("store failure: {}", detail);
                ClientError::internal("internal error")
            }
        }
    }
}

// ============================================
// Client → Server events
// ============================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub conversation_id: ConversationId,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: Option<MessageKind>,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessagePayload {
    pub message_id: MessageId,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRefPayload {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionTogglePayload {
    pub message_id: MessageId,
    pub emoji: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadPayload {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub up_to: Option<Timestamp>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInitiatePayload {
    pub conversation_id: ConversationId,
    pub callee_id: UserId,
    #[serde(rename = "type")]
    pub kind: CallKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRefPayload {
    pub call_id: CallId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOfferPayload {
    pub call_id: CallId,
    /// Opaque SDP blob, forwarded by value.
    pub offer: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAnswerPayload {
    pub call_id: CallId,
    pub answer: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallIcePayload {
    pub call_id: CallId,
    pub candidate: serde_json::Value,
}

/// Every event a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinConversation(ConversationRef),
    LeaveConversation(ConversationRef),
    SendMessage(SendMessagePayload),
    EditMessage(EditMessagePayload),
    DeleteMessage(MessageRefPayload),
    MessageReaction(ReactionTogglePayload),
    MessageRead(MessageReadPayload),
    MessageDelivered(MessageRefPayload),
    TypingStart(ConversationRef),
    TypingStop(ConversationRef),
    StopGeneration(ConversationRef),
    RegenerateResponse(ConversationRef),
    CallInitiate(CallInitiatePayload),
    CallAccept(CallRefPayload),
    CallReject(CallRefPayload),
    CallEnd(CallRefPayload),
    CallOffer(CallOfferPayload),
    CallAnswer(CallAnswerPayload),
    CallIceCandidate(CallIcePayload),
}

// ============================================
// Server → Client events
// ============================================

/// Every event the server may emit.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    NewMessage(Message),
    MessageUpdated(Message),
    #[serde(rename_all = "camelCase")]
    MessageDeleted {
        message_id: MessageId,
        conversation_id: ConversationId,
    },
    #[serde(rename_all = "camelCase")]
    MessageReactionUpdated {
        message_id: MessageId,
        conversation_id: ConversationId,
        reactions: Vec<Reaction>,
    },
    #[serde(rename_all = "camelCase")]
    MessageStatusUpdate {
        message_id: MessageId,
        conversation_id: ConversationId,
        status: MessageStatus,
    },
    #[serde(rename_all = "camelCase")]
    AiStreamStart {
        message_id: MessageId,
        conversation_id: ConversationId,
    },
    #[serde(rename_all = "camelCase")]
    AiStreamChunk {
        message_id: MessageId,
        conversation_id: ConversationId,
        chunk: String,
    },
    #[serde(rename_all = "camelCase")]
    AiStreamEnd {
        message_id: MessageId,
        conversation_id: ConversationId,
        full_content: String,
    },
    #[serde(rename_all = "camelCase")]
    AiStreamError {
        conversation_id: ConversationId,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
    #[serde(rename_all = "camelCase")]
    UserOnline { user_id: UserId },
    #[serde(rename_all = "camelCase")]
    UserOffline {
        user_id: UserId,
        last_seen_at: Timestamp,
    },
    ConversationUpdated(Conversation),
    #[serde(rename_all = "camelCase")]
    GroupMemberAdded {
        conversation_id: ConversationId,
        user_id: UserId,
        role: MemberRole,
    },
    #[serde(rename_all = "camelCase")]
    GroupMemberRemoved {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    GroupUpdated(Conversation),
    CallRinging(Call),
    #[serde(rename_all = "camelCase")]
    CallAccepted { call_id: CallId },
    #[serde(rename_all = "camelCase")]
    CallRejected { call_id: CallId },
    #[serde(rename_all = "camelCase")]
    CallEnded { call_id: CallId, state: CallState },
    #[serde(rename_all = "camelCase")]
    CallOffer {
        call_id: CallId,
        offer: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    CallAnswer {
        call_id: CallId,
        answer: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    CallIceCandidate {
        call_id: CallId,
        candidate: serde_json::Value,
    },
    NewNotification(Notification),
    Error(ClientError),
    #[serde(rename = "event:ack", rename_all = "camelCase")]
    Ack {
        message_id: AckId,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ClientError>,
    },
}

impl ServerEvent {
    /// Builds the ack for an outcome, replayable for duplicates.
    pub fn ack(message_id: AckId, outcome: &Result<(), ClientError>) -> Self {
        ServerEvent::Ack {
            message_id,
            success: outcome.is_ok(),
            error: outcome.as_ref().err().cloned(),
        }
    }
}

// ============================================
// Frame parsing
// ============================================

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub event: ClientEvent,
    /// Present when the client expects an `event:ack`.
    pub ack_id: Option<AckId>,
}

#[derive(Deserialize)]
struct FrameMeta {
    #[serde(rename = "messageId")]
    message_id: Option<String>,
}

/// Single decode step at the edge; anything malformed maps to
/// `invalid_argument`.
pub fn parse_frame(text: &str) -> Result<InboundFrame, ClientError> {
    let meta: FrameMeta = serde_json::from_str(text)
        .map_err(|e| ClientError::invalid_argument(format!("malformed frame: {}", e)))?;
    let ack_id = meta.message_id.map(AckId::new).transpose()?;
    let event: ClientEvent = serde_json::from_str(text)
        .map_err(|e| ClientError::invalid_argument(format!("unknown or malformed event: {}", e)))?;
    Ok(InboundFrame { event, ack_id })
}

// ============================================
// Ack dedupe cache
// ============================================

/// Bounded per-socket cache of recent ack outcomes.
///
/// Clients may retry an acknowledged event with the same `messageId`; the
/// recorded outcome is replayed instead of re-running the handler, which is
/// what makes retries idempotent.
#[derive(Debug)]
pub struct AckCache {
    capacity: usize,
    order: VecDeque<AckId>,
    outcomes: HashMap<AckId, Result<(), ClientError>>,
}

impl AckCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            outcomes: HashMap::new(),
        }
    }

    /// Records an outcome, evicting the oldest entry at capacity.
    pub fn insert(&mut self, id: AckId, outcome: Result<(), ClientError>) {
        if self.outcomes.insert(id.clone(), outcome).is_none() {
            self.order.push_back(id);
            if self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.outcomes.remove(&evicted);
                }
            }
        }
    }

    /// The recorded outcome for a duplicate, if still cached.
    pub fn get(&self, id: &AckId) -> Option<&Result<(), ClientError>> {
        self.outcomes.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_message_frame() {
        let conv = ConversationId::new();
        let text = format!(
            r#"{{"type":"send-message","data":{{"conversationId":"{}","content":"hi"}},"messageId":"req-1"}}"#,
            conv
        );
        let frame = parse_frame(&text).unwrap();
        assert_eq!(frame.ack_id.as_ref().unwrap().as_str(), "req-1");
        match frame.event {
            ClientEvent::SendMessage(p) => {
                assert_eq!(p.conversation_id, conv);
                assert_eq!(p.content, "hi");
                assert!(p.kind.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn parses_call_events_with_opaque_payloads() {
        let call = CallId::new();
        let text = format!(
            r#"{{"type":"call-offer","data":{{"callId":"{}","offer":{{"sdp":"v=0...","type":"offer"}}}}}}"#,
            call
        );
        let frame = parse_frame(&text).unwrap();
        match frame.event {
            ClientEvent::CallOffer(p) => {
                assert_eq!(p.call_id, call);
                assert_eq!(p.offer["type"], "offer");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_type_is_invalid_argument() {
        let err = parse_frame(r#"{"type":"launch-missiles","data":{}}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn non_json_frame_is_invalid_argument() {
        let err = parse_frame("hello").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn server_events_carry_type_and_data() {
        let event = ServerEvent::Typing {
            conversation_id: ConversationId::new(),
            user_id: UserId::new("u1").unwrap(),
            is_typing: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "typing");
        assert_eq!(json["data"]["isTyping"], true);
        assert_eq!(json["data"]["userId"], "u1");
    }

    #[test]
    fn ack_serializes_under_event_ack_type() {
        let ack = ServerEvent::ack(
            AckId::new("req-9").unwrap(),
            &Err(ClientError::user_busy()),
        );
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["type"], "event:ack");
        assert_eq!(json["data"]["messageId"], "req-9");
        assert_eq!(json["data"]["success"], false);
        assert_eq!(json["data"]["error"]["kind"], "user_busy");
    }

    #[test]
    fn store_errors_map_onto_wire_kinds() {
        assert_eq!(
            ClientError::from(StoreError::not_found("x")).kind,
            ErrorKind::NotFound
        );
        assert_eq!(
            ClientError::from(StoreError::forbidden("x")).kind,
            ErrorKind::Unauthorized
        );
        assert_eq!(
            ClientError::from(StoreError::InvalidCallState {
                expected: CallState::Ringing,
                actual: CallState::Rejected,
            })
            .kind,
            ErrorKind::InvalidCallState
        );
        let internal = ClientError::from(StoreError::Database("secret detail".into()));
        assert_eq!(internal.kind, ErrorKind::Internal);
        assert!(!internal.message.contains("secret"));
    }

    #[test]
    fn ack_cache_replays_and_evicts() {
        let mut cache = AckCache::new(2);
        let a = AckId::new("a").unwrap();
        let b = AckId::new("b").unwrap();
        let c = AckId::new("c").unwrap();

        cache.insert(a.clone(), Ok(()));
        cache.insert(b.clone(), Err(ClientError::user_busy()));
        assert!(cache.get(&a).unwrap().is_ok());
        assert!(cache.get(&b).unwrap().is_err());

        cache.insert(c.clone(), Ok(()));
        assert!(cache.get(&a).is_none(), "oldest entry evicted");
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn duplicate_insert_does_not_double_count() {
        let mut cache = AckCache::new(2);
        let a = AckId::new("a").unwrap();
        cache.insert(a.clone(), Ok(()));
        cache.insert(a.clone(), Ok(()));
        let b = AckId::new("b").unwrap();
        cache.insert(b, Ok(()));
        assert!(cache.get(&a).is_some(), "re-insert must not evict");
    }
}
