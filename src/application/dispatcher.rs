//! Inbound event dispatch.
//!
//! One handler table keyed by event type over `(session, payload)`: decode,
//! dedupe, rate-limit, authorize, route, and answer. Errors in a single
//! event are mapped to a wire error and returned to the originating socket
//! only; the connection stays open.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::adapters::websocket::{
    parse_frame, AckCache, ClientError, ClientEvent, ServerEvent, Session,
};
use crate::application::conversation_worker::ConvCommand;
use crate::application::App;
use crate::domain::conversation::MessageKind;
use crate::domain::foundation::{ConversationId, MessageId};
use crate::ports::RateDecision;

type Reply = Option<oneshot::Sender<Result<(), ClientError>>>;

/// Handles one raw inbound frame end to end.
pub async fn dispatch(app: &Arc<App>, session: &Session, text: &str, acks: &mut AckCache) {
    let frame = match parse_frame(text) {
        Ok(frame) => frame,
        Err(error) => {
            app.registry
                .emit_to_socket(&session.socket_id, ServerEvent::Error(error))
                .await;
            return;
        }
    };

    // Retried ack'd events replay their recorded outcome.
    if let Some(ack_id) = &frame.ack_id {
        if let Some(outcome) = acks.get(ack_id) {
            let ack = ServerEvent::ack(ack_id.clone(), outcome);
            app.registry.emit_to_socket(&session.socket_id, ack).await;
            return;
        }
    }

    let result = match app.limiter.check(session.user_id().as_str()).await {
        RateDecision::Limited { .. } => Err(ClientError::rate_limited()),
        RateDecision::Allowed => {
            route(app, session, frame.event, frame.ack_id.is_some()).await
        }
    };

    match frame.ack_id {
        Some(ack_id) => {
            acks.insert(ack_id.clone(), result.clone());
            let ack = ServerEvent::ack(ack_id, &result);
            app.registry.emit_to_socket(&session.socket_id, ack).await;
        }
        None => {
            if let Err(error) = result {
                app.registry
                    .emit_to_socket(&session.socket_id, ServerEvent::Error(error))
                    .await;
            }
        }
    }
}

async fn route(
    app: &Arc<App>,
    session: &Session,
    event: ClientEvent,
    wants_reply: bool,
) -> Result<(), ClientError> {
    match event {
        ClientEvent::JoinConversation(p) => {
            app.gate
                .require_member(&p.conversation_id, session.user_id())
                .await?;
            app.registry
                .join_room(&session.socket_id, &p.conversation_id)
                .await;
            Ok(())
        }
        ClientEvent::LeaveConversation(p) => {
            app.registry
                .leave_room(&session.socket_id, &p.conversation_id)
                .await;
            Ok(())
        }
        ClientEvent::SendMessage(p) => {
            let conversation = p.conversation_id;
            app.gate
                .require_member(&conversation, session.user_id())
                .await?;
            let sender = session.user_id().clone();
            let sender_name = session.display_name().to_string();
            let origin = session.socket_id;
            worker_call(app, &conversation, wants_reply, move |reply| {
                ConvCommand::Send {
                    origin,
                    sender,
                    sender_name,
                    kind: p.kind.unwrap_or(MessageKind::Text),
                    content: p.content,
                    reply_to_id: p.reply_to_id,
                    reply,
                }
            })
            .await
        }
        ClientEvent::EditMessage(p) => {
            let conversation = conversation_of(app, session, &p.message_id).await?;
            let actor = session.user_id().clone();
            let origin = session.socket_id;
            worker_call(app, &conversation, wants_reply, move |reply| {
                ConvCommand::Edit {
                    origin,
                    actor,
                    message_id: p.message_id,
                    content: p.content,
                    reply,
                }
            })
            .await
        }
        ClientEvent::DeleteMessage(p) => {
            let message = app
                .store
                .get_message(&p.message_id)
                .await?
                .filter(|m| !m.is_deleted)
                .ok_or_else(|| ClientError::not_found(format!("message {}", p.message_id)))?;
            let conversation = message.conversation_id;
            // Authors may delete their own messages; deleting a foreign one
            // is a moderator action.
            if message.sender_id.as_ref() == Some(session.user_id()) {
                app.gate
                    .require_member(&conversation, session.user_id())
                    .await?;
            } else {
                app.gate
                    .require_moderator(&conversation, session.user_id())
                    .await?;
            }
            let actor = session.user_id().clone();
            let origin = session.socket_id;
            worker_call(app, &conversation, wants_reply, move |reply| {
                ConvCommand::Delete {
                    origin,
                    actor,
                    message_id: p.message_id,
                    reply,
                }
            })
            .await
        }
        ClientEvent::MessageReaction(p) => {
            let conversation = conversation_of(app, session, &p.message_id).await?;
            let actor = session.user_id().clone();
            let origin = session.socket_id;
            worker_call(app, &conversation, wants_reply, move |reply| {
                ConvCommand::React {
                    origin,
                    actor,
                    message_id: p.message_id,
                    emoji: p.emoji,
                    reply,
                }
            })
            .await
        }
        ClientEvent::MessageRead(p) => {
            let conversation = p.conversation_id;
            app.gate
                .require_member(&conversation, session.user_id())
                .await?;
            let actor = session.user_id().clone();
            let origin = session.socket_id;
            worker_call(app, &conversation, wants_reply, move |reply| {
                ConvCommand::Read {
                    origin,
                    actor,
                    up_to: p.up_to,
                    reply,
                }
            })
            .await
        }
        ClientEvent::MessageDelivered(p) => {
            let conversation = conversation_of(app, session, &p.message_id).await?;
            let origin = session.socket_id;
            worker_call(app, &conversation, wants_reply, move |reply| {
                ConvCommand::Delivered {
                    origin,
                    message_id: p.message_id,
                    reply,
                }
            })
            .await
        }
        ClientEvent::TypingStart(p) => {
            app.gate
                .require_member(&p.conversation_id, session.user_id())
                .await?;
            let user = session.user_id().clone();
            app.chat
                .send(&p.conversation_id, ConvCommand::TypingStart { user })
                .await
        }
        ClientEvent::TypingStop(p) => {
            app.gate
                .require_member(&p.conversation_id, session.user_id())
                .await?;
            let user = session.user_id().clone();
            app.chat
                .send(&p.conversation_id, ConvCommand::TypingStop { user })
                .await
        }
        ClientEvent::StopGeneration(p) => {
            app.gate
                .require_member(&p.conversation_id, session.user_id())
                .await?;
            app.chat
                .send(
                    &p.conversation_id,
                    ConvCommand::StopGeneration {
                        origin: session.socket_id,
                        actor: session.user_id().clone(),
                    },
                )
                .await
        }
        ClientEvent::RegenerateResponse(p) => {
            app.gate
                .require_member(&p.conversation_id, session.user_id())
                .await?;
            let actor = session.user_id().clone();
            let origin = session.socket_id;
            worker_call(app, &p.conversation_id, wants_reply, move |reply| {
                ConvCommand::Regenerate {
                    origin,
                    actor,
                    reply,
                }
            })
            .await
        }
        ClientEvent::CallInitiate(p) => {
            app.calls
                .initiate(session, p.conversation_id, p.callee_id, p.kind)
                .await
        }
        ClientEvent::CallAccept(p) => app.calls.accept(session, p.call_id).await,
        ClientEvent::CallReject(p) => app.calls.reject(session, p.call_id).await,
        ClientEvent::CallEnd(p) => app.calls.end(session, p.call_id).await,
        ClientEvent::CallOffer(p) => app.calls.relay_offer(session, p.call_id, p.offer).await,
        ClientEvent::CallAnswer(p) => {
            app.calls.relay_answer(session, p.call_id, p.answer).await
        }
        ClientEvent::CallIceCandidate(p) => {
            app.calls
                .relay_ice_candidate(session, p.call_id, p.candidate)
                .await
        }
    }
}

/// Resolves a message's conversation and checks membership in one step.
async fn conversation_of(
    app: &Arc<App>,
    session: &Session,
    message_id: &MessageId,
) -> Result<ConversationId, ClientError> {
    let message = app
        .store
        .get_message(message_id)
        .await?
        .ok_or_else(|| ClientError::not_found(format!("message {}", message_id)))?;
    app.gate
        .require_member(&message.conversation_id, session.user_id())
        .await?;
    Ok(message.conversation_id)
}

/// Routes to the conversation worker. Acked events wait for the worker's
/// outcome (bounded by the ack timeout); fire-and-forget events return as
/// soon as the command is enqueued and the worker reports failures to the
/// socket itself.
async fn worker_call(
    app: &Arc<App>,
    conversation: &ConversationId,
    wants_reply: bool,
    make_command: impl FnOnce(Reply) -> ConvCommand,
) -> Result<(), ClientError> {
    if wants_reply {
        let (tx, rx) = oneshot::channel();
        app.chat.send(conversation, make_command(Some(tx))).await?;
        match tokio::time::timeout(app.timeouts.ack, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) | Err(_) => Err(ClientError::internal("operation timed out")),
        }
    } else {
        app.chat.send(conversation, make_command(None)).await
    }
}
