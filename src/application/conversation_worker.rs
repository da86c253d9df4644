//! Single-owner worker task per conversation.
//!
//! All conversation-scoped commands flow through one mailbox, which makes
//! the (persist, broadcast) pair mutually exclusive with itself per
//! conversation: `new-message` emission order always matches `created_at`
//! order. Concurrent conversations run in parallel on their own workers.
//!
//! The worker also owns the transient per-conversation state: the typing
//! set with its expiry sweep, and the single AI stream slot. Idle workers
//! exit and are respawned on demand.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::adapters::websocket::{ClientError, ConnectionRegistry, ServerEvent};
use crate::application::notifier::{mentions_ai, Notifier};
use crate::application::Timeouts;
use crate::domain::conversation::{Conversation, Message, MessageKind, MessageStatus};
use crate::domain::foundation::{MessageId, SocketId, Timestamp, UserId};
use crate::ports::{AiProvider, AiRequest, ChatStore, TurnMessage};

/// How many history turns are handed to the AI provider.
const AI_HISTORY_LIMIT: u32 = 64;

/// Flush streamed chunks at this batch size or on the flush tick,
/// whichever comes first.
const CHUNK_BATCH: usize = 32;
const CHUNK_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Workers with no typing entries, no stream, and no traffic exit after
/// this long and are reconstituted on demand.
const IDLE_EXIT: Duration = Duration::from_secs(300);

type Reply = Option<oneshot::Sender<Result<(), ClientError>>>;

/// Commands a conversation worker accepts.
pub enum ConvCommand {
    Send {
        origin: SocketId,
        sender: UserId,
        sender_name: String,
        kind: MessageKind,
        content: String,
        reply_to_id: Option<MessageId>,
        reply: Reply,
    },
    Edit {
        origin: SocketId,
        actor: UserId,
        message_id: MessageId,
        content: String,
        reply: Reply,
    },
    Delete {
        origin: SocketId,
        actor: UserId,
        message_id: MessageId,
        reply: Reply,
    },
    React {
        origin: SocketId,
        actor: UserId,
        message_id: MessageId,
        emoji: String,
        reply: Reply,
    },
    Read {
        origin: SocketId,
        actor: UserId,
        up_to: Option<Timestamp>,
        reply: Reply,
    },
    Delivered {
        origin: SocketId,
        message_id: MessageId,
        reply: Reply,
    },
    TypingStart {
        user: UserId,
    },
    TypingStop {
        user: UserId,
    },
    StopGeneration {
        origin: SocketId,
        actor: UserId,
    },
    Regenerate {
        origin: SocketId,
        actor: UserId,
        reply: Reply,
    },
    /// Internal: the stream task finished one way or another.
    StreamClosed {
        message_id: MessageId,
        outcome: StreamOutcome,
    },
}

/// Terminal outcome of one AI stream.
pub enum StreamOutcome {
    Done {
        content: String,
        completion_tokens: Option<u32>,
    },
    Cancelled,
    Failed(String),
}

struct ActiveStream {
    message_id: MessageId,
    invoker: UserId,
    cancel: CancellationToken,
}

/// One conversation's owner task.
pub struct ConversationWorker {
    conversation: Conversation,
    store: Arc<dyn ChatStore>,
    registry: Arc<ConnectionRegistry>,
    notifier: Arc<Notifier>,
    ai: Arc<dyn AiProvider>,
    timeouts: Timeouts,
    rx: mpsc::Receiver<ConvCommand>,
    self_tx: mpsc::Sender<ConvCommand>,
    typing: HashMap<UserId, Instant>,
    stream: Option<ActiveStream>,
    last_activity: Instant,
}

impl ConversationWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversation: Conversation,
        store: Arc<dyn ChatStore>,
        registry: Arc<ConnectionRegistry>,
        notifier: Arc<Notifier>,
        ai: Arc<dyn AiProvider>,
        timeouts: Timeouts,
        rx: mpsc::Receiver<ConvCommand>,
        self_tx: mpsc::Sender<ConvCommand>,
    ) -> Self {
        Self {
            conversation,
            store,
            registry,
            notifier,
            ai,
            timeouts,
            rx,
            self_tx,
            typing: HashMap::new(),
            stream: None,
            last_activity: Instant::now(),
        }
    }

    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(Duration::from_secs(1));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => {
                        self.last_activity = Instant::now();
                        self.handle(cmd).await;
                    }
                    None => break,
                },
                _ = sweep.tick() => {
                    self.reap_expired_typing().await;
                    let idle = self.typing.is_empty() && self.stream.is_none();
                    if idle && self.last_activity.elapsed() > IDLE_EXIT {
                        // Refuse new sends, then drain what already made it
                        // into the mailbox so nothing is lost.
                        self.rx.close();
                        while let Ok(cmd) = self.rx.try_recv() {
                            self.handle(cmd).await;
                        }
                        break;
                    }
                }
            }
        }
        tracing::debug!(conversation_id = %self.conversation.id, "conversation worker exiting");
    }

    async fn handle(&mut self, cmd: ConvCommand) {
        match cmd {
            ConvCommand::Send {
                origin,
                sender,
                sender_name,
                kind,
                content,
                reply_to_id,
                reply,
            } => {
                self.handle_send(origin, sender, sender_name, kind, content, reply_to_id, reply)
                    .await
            }
            ConvCommand::Edit {
                origin,
                actor,
                message_id,
                content,
                reply,
            } => {
                let result = self.store.edit_message(&message_id, &actor, &content).await;
                match result {
                    Ok(message) => {
                        self.emit(ServerEvent::MessageUpdated(message)).await;
                        self.respond(origin, reply, Ok(())).await;
                    }
                    Err(e) => self.respond(origin, reply, Err(e.into())).await,
                }
            }
            ConvCommand::Delete {
                origin,
                actor,
                message_id,
                reply,
            } => {
                let result = self.store.delete_message(&message_id, &actor).await;
                match result {
                    Ok(_) => {
                        self.emit(ServerEvent::MessageDeleted {
                            message_id,
                            conversation_id: self.conversation.id,
                        })
                        .await;
                        self.respond(origin, reply, Ok(())).await;
                    }
                    Err(e) => self.respond(origin, reply, Err(e.into())).await,
                }
            }
            ConvCommand::React {
                origin,
                actor,
                message_id,
                emoji,
                reply,
            } => {
                let result = self.store.toggle_reaction(&message_id, &actor, &emoji).await;
                match result {
                    Ok(reactions) => {
                        self.emit(ServerEvent::MessageReactionUpdated {
                            message_id,
                            conversation_id: self.conversation.id,
                            reactions,
                        })
                        .await;
                        self.respond(origin, reply, Ok(())).await;
                    }
                    Err(e) => self.respond(origin, reply, Err(e.into())).await,
                }
            }
            ConvCommand::Read {
                origin,
                actor,
                up_to,
                reply,
            } => {
                let up_to = up_to.unwrap_or_else(Timestamp::now);
                let result = self.store.mark_read(&self.conversation.id, &actor, up_to).await;
                match result {
                    Ok(outcome) => {
                        for message_id in outcome.newly_read {
                            self.emit(ServerEvent::MessageStatusUpdate {
                                message_id,
                                conversation_id: self.conversation.id,
                                status: MessageStatus::Read,
                            })
                            .await;
                        }
                        self.respond(origin, reply, Ok(())).await;
                    }
                    Err(e) => self.respond(origin, reply, Err(e.into())).await,
                }
            }
            ConvCommand::Delivered {
                origin,
                message_id,
                reply,
            } => {
                let result = self.store.mark_delivered(&message_id).await;
                match result {
                    Ok(advanced) => {
                        if advanced {
                            self.emit(ServerEvent::MessageStatusUpdate {
                                message_id,
                                conversation_id: self.conversation.id,
                                status: MessageStatus::Delivered,
                            })
                            .await;
                        }
                        self.respond(origin, reply, Ok(())).await;
                    }
                    Err(e) => self.respond(origin, reply, Err(e.into())).await,
                }
            }
            ConvCommand::TypingStart { user } => {
                let expiry = Instant::now() + self.timeouts.typing;
                let rising_edge = self.typing.insert(user.clone(), expiry).is_none();
                if rising_edge {
                    self.emit_typing(user, true).await;
                }
            }
            ConvCommand::TypingStop { user } => {
                if self.typing.remove(&user).is_some() {
                    self.emit_typing(user, false).await;
                }
            }
            ConvCommand::StopGeneration { origin: _, actor: _ } => {
                // Idempotent: stopping with nothing in flight is a no-op.
                if let Some(stream) = &self.stream {
                    stream.cancel.cancel();
                }
            }
            ConvCommand::Regenerate {
                origin,
                actor,
                reply,
            } => self.handle_regenerate(origin, actor, reply).await,
            ConvCommand::StreamClosed {
                message_id,
                outcome,
            } => self.handle_stream_closed(message_id, outcome).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_send(
        &mut self,
        origin: SocketId,
        sender: UserId,
        sender_name: String,
        kind: MessageKind,
        content: String,
        reply_to_id: Option<MessageId>,
        reply: Reply,
    ) {
        let message = match Message::from_user(
            self.conversation.id,
            sender.clone(),
            kind,
            content,
            reply_to_id,
        ) {
            Ok(message) => message,
            Err(e) => return self.respond(origin, reply, Err(e.into())).await,
        };

        if let Err(e) = self.store.append_message(&message).await {
            return self.respond(origin, reply, Err(e.into())).await;
        }

        // Sending is also an implicit typing-stop.
        if self.typing.remove(&sender).is_some() {
            self.emit_typing(sender.clone(), false).await;
        }

        self.emit(ServerEvent::NewMessage(message.clone())).await;
        self.respond(origin, reply, Ok(())).await;

        // Fan-out to members away from the room, off the hot path.
        {
            let notifier = self.notifier.clone();
            let conversation = self.conversation.clone();
            let message = message.clone();
            tokio::spawn(async move {
                notifier
                    .message_fanout(&conversation, &message, &sender_name)
                    .await;
            });
        }

        let wants_ai = message.kind == MessageKind::Text
            && (self.conversation.kind.always_ai() || mentions_ai(&message.content));
        if wants_ai {
            self.start_stream(origin, sender).await;
        }
    }

    async fn handle_regenerate(&mut self, origin: SocketId, actor: UserId, reply: Reply) {
        if self.stream.is_some() {
            return self
                .respond(origin, reply, Err(ClientError::ai_stream_busy()))
                .await;
        }
        let last = match self.store.last_ai_response(&self.conversation.id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                return self
                    .respond(
                        origin,
                        reply,
                        Err(ClientError::not_found("no AI response to regenerate")),
                    )
                    .await
            }
            Err(e) => return self.respond(origin, reply, Err(e.into())).await,
        };

        if let Err(e) = self.store.tombstone_message(&last.id).await {
            return self.respond(origin, reply, Err(e.into())).await;
        }
        self.emit(ServerEvent::MessageDeleted {
            message_id: last.id,
            conversation_id: self.conversation.id,
        })
        .await;

        self.respond(origin, reply, Ok(())).await;
        self.start_stream(origin, actor).await;
    }

    /// Opens the single stream slot, or rejects with `ai_stream_busy`.
    async fn start_stream(&mut self, origin: SocketId, invoker: UserId) {
        if self.stream.is_some() {
            self.registry
                .emit_to_socket(&origin, ServerEvent::Error(ClientError::ai_stream_busy()))
                .await;
            return;
        }

        let request = match self.build_ai_request().await {
            Ok(request) => request,
            Err(e) => {
                self.registry
                    .emit_to_socket(&origin, ServerEvent::Error(e))
                    .await;
                return;
            }
        };

        let message_id = MessageId::new();
        let cancel = CancellationToken::new();
        self.stream = Some(ActiveStream {
            message_id,
            invoker,
            cancel: cancel.clone(),
        });

        self.emit(ServerEvent::AiStreamStart {
            message_id,
            conversation_id: self.conversation.id,
        })
        .await;

        let ai = self.ai.clone();
        let registry = self.registry.clone();
        let conversation_id = self.conversation.id;
        let timeouts = self.timeouts;
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let outcome =
                run_stream(ai, registry, conversation_id, message_id, request, cancel, timeouts)
                    .await;
            let _ = self_tx
                .send(ConvCommand::StreamClosed {
                    message_id,
                    outcome,
                })
                .await;
        });
    }

    /// Ordered, non-deleted history mapped to provider turns, plus the
    /// conversation's steering prompt.
    async fn build_ai_request(&self) -> Result<AiRequest, ClientError> {
        let history = self
            .store
            .list_history(&self.conversation.id, None, AI_HISTORY_LIMIT)
            .await?;
        let turns: Vec<TurnMessage> = history
            .iter()
            .filter(|m| !m.is_deleted)
            .filter(|m| matches!(m.kind, MessageKind::Text | MessageKind::AiResponse))
            .map(|m| {
                if m.kind == MessageKind::AiResponse {
                    TurnMessage::assistant(&m.content)
                } else {
                    TurnMessage::user(&m.content)
                }
            })
            .collect();
        if turns.is_empty() {
            return Err(ClientError::invalid_argument("nothing to respond to"));
        }
        let mut request = AiRequest::new(turns);
        if let Some(prompt) = &self.conversation.system_prompt {
            request = request.with_system_prompt(prompt.clone());
        }
        Ok(request)
    }

    async fn handle_stream_closed(&mut self, message_id: MessageId, outcome: StreamOutcome) {
        let Some(active) = self.stream.take() else {
            return;
        };
        if active.message_id != message_id {
            // A stale task from a previous slot; keep the current one.
            self.stream = Some(active);
            return;
        }

        match outcome {
            StreamOutcome::Done {
                content,
                completion_tokens,
            } => {
                let message = match Message::ai_response(
                    message_id,
                    self.conversation.id,
                    content.clone(),
                    completion_tokens,
                ) {
                    Ok(message) => message,
                    Err(_) => {
                        self.emit_stream_error("empty completion").await;
                        return;
                    }
                };
                if let Err(e) = self.store.append_message(&message).await {
                    tracing::error!(
                        conversation_id = %self.conversation.id,
                        "failed to persist AI response: {}", e
                    );
                    self.emit_stream_error("internal error").await;
                    return;
                }
                self.emit(ServerEvent::AiStreamEnd {
                    message_id,
                    conversation_id: self.conversation.id,
                    full_content: content,
                })
                .await;
                self.emit(ServerEvent::NewMessage(message.clone())).await;

                if !self
                    .registry
                    .is_user_in_room(&self.conversation.id, &active.invoker)
                    .await
                {
                    let notifier = self.notifier.clone();
                    let conversation = self.conversation.clone();
                    tokio::spawn(async move {
                        notifier
                            .ai_complete(&active.invoker, &conversation, &message)
                            .await;
                    });
                }
            }
            StreamOutcome::Cancelled => {
                // Partial content is discarded; only the error event goes out.
                self.emit_stream_error("cancelled").await;
            }
            StreamOutcome::Failed(reason) => {
                tracing::warn!(
                    conversation_id = %self.conversation.id,
                    "AI stream failed: {}", reason
                );
                self.emit_stream_error(&reason).await;
            }
        }
    }

    async fn emit_stream_error(&self, error: &str) {
        self.emit(ServerEvent::AiStreamError {
            conversation_id: self.conversation.id,
            error: error.to_string(),
        })
        .await;
    }

    async fn reap_expired_typing(&mut self) {
        let now = Instant::now();
        let expired: Vec<UserId> = self
            .typing
            .iter()
            .filter(|(_, expiry)| **expiry <= now)
            .map(|(user, _)| user.clone())
            .collect();
        for user in expired {
            self.typing.remove(&user);
            self.emit_typing(user, false).await;
        }
    }

    async fn emit_typing(&self, user: UserId, is_typing: bool) {
        self.emit(ServerEvent::Typing {
            conversation_id: self.conversation.id,
            user_id: user,
            is_typing,
        })
        .await;
    }

    async fn emit(&self, event: ServerEvent) {
        self.registry.emit_to_room(&self.conversation.id, event).await;
    }

    /// Routes an outcome to the waiting dispatcher (acked events) or, for
    /// fire-and-forget events, reports failures to the originating socket.
    async fn respond(
        &self,
        origin: SocketId,
        reply: Reply,
        result: Result<(), ClientError>,
    ) {
        match reply {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => {
                if let Err(error) = result {
                    self.registry
                        .emit_to_socket(&origin, ServerEvent::Error(error))
                        .await;
                }
            }
        }
    }
}

/// Drives one provider stream: batches chunks, enforces the idle and
/// wall-clock guards, and reports the terminal outcome back to the worker.
async fn run_stream(
    ai: Arc<dyn AiProvider>,
    registry: Arc<ConnectionRegistry>,
    conversation_id: crate::domain::foundation::ConversationId,
    message_id: MessageId,
    request: AiRequest,
    cancel: CancellationToken,
    timeouts: Timeouts,
) -> StreamOutcome {
    let mut stream = match ai.stream(request, cancel.child_token()).await {
        Ok(stream) => stream,
        Err(e) => return StreamOutcome::Failed(e.to_string()),
    };

    let deadline = Instant::now() + timeouts.ai_wall_clock;
    let mut last_chunk = Instant::now();
    let mut flush_tick = tokio::time::interval(CHUNK_FLUSH_INTERVAL);
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut full = String::new();
    let mut pending = String::new();
    let mut pending_count = 0usize;
    let mut completion_tokens = None;

    macro_rules! flush {
        () => {
            if !pending.is_empty() {
                registry
                    .emit_to_room(
                        &conversation_id,
                        ServerEvent::AiStreamChunk {
                            message_id,
                            conversation_id,
                            chunk: std::mem::take(&mut pending),
                        },
                    )
                    .await;
                pending_count = 0;
            }
        };
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            chunk = stream.next() => match chunk {
                None => break,
                Some(Err(crate::ports::AiError::Cancelled)) => return StreamOutcome::Cancelled,
                Some(Err(e)) => return StreamOutcome::Failed(e.to_string()),
                Some(Ok(chunk)) => {
                    last_chunk = Instant::now();
                    if chunk.completion_tokens.is_some() {
                        completion_tokens = chunk.completion_tokens;
                    }
                    if !chunk.delta.is_empty() {
                        full.push_str(&chunk.delta);
                        pending.push_str(&chunk.delta);
                        pending_count += 1;
                        if pending_count >= CHUNK_BATCH {
                            flush!();
                        }
                    }
                }
            },
            _ = flush_tick.tick() => {
                flush!();
                if Instant::now() >= deadline {
                    return StreamOutcome::Failed("generation exceeded the time limit".to_string());
                }
                if last_chunk.elapsed() > timeouts.ai_idle {
                    return StreamOutcome::Failed("provider stopped responding".to_string());
                }
            }
        }
    }

    flush!();
    StreamOutcome::Done {
        content: full,
        completion_tokens,
    }
}
