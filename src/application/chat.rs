//! Worker lookup and lifecycle for conversation-scoped commands.
//!
//! Keeps one mailbox sender per live conversation. Workers garbage-collect
//! themselves when idle; a send into a closed mailbox respawns the worker
//! and retries once.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::adapters::websocket::{ClientError, ConnectionRegistry};
use crate::application::conversation_worker::{ConvCommand, ConversationWorker};
use crate::application::{Notifier, Timeouts};
use crate::domain::foundation::ConversationId;
use crate::ports::{AiProvider, ChatStore};

/// Bounded per-conversation mailbox depth.
const MAILBOX_CAPACITY: usize = 64;

/// Routes commands to per-conversation workers, spawning them on demand.
pub struct ChatService {
    store: Arc<dyn ChatStore>,
    registry: Arc<ConnectionRegistry>,
    notifier: Arc<Notifier>,
    ai: Arc<dyn AiProvider>,
    timeouts: Timeouts,
    workers: Mutex<HashMap<ConversationId, mpsc::Sender<ConvCommand>>>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        registry: Arc<ConnectionRegistry>,
        notifier: Arc<Notifier>,
        ai: Arc<dyn AiProvider>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            ai,
            timeouts,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Delivers a command to the conversation's worker.
    pub async fn send(
        &self,
        conversation: &ConversationId,
        command: ConvCommand,
    ) -> Result<(), ClientError> {
        let mut command = Some(command);
        for _ in 0..2 {
            let sender = self.worker_sender(conversation).await?;
            match sender.send(command.take().expect("command present")).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    // The worker idled out between lookup and send; drop the
                    // stale sender and retry against a fresh worker.
                    self.workers.lock().await.remove(conversation);
                    command = Some(returned);
                }
            }
        }
        Err(ClientError::internal("conversation worker unavailable"))
    }

    async fn worker_sender(
        &self,
        conversation: &ConversationId,
    ) -> Result<mpsc::Sender<ConvCommand>, ClientError> {
        let mut workers = self.workers.lock().await;
        if let Some(sender) = workers.get(conversation) {
            if !sender.is_closed() {
                return Ok(sender.clone());
            }
            workers.remove(conversation);
        }

        let loaded = self
            .store
            .get_conversation(conversation)
            .await?
            .ok_or_else(|| ClientError::not_found(format!("conversation {}", conversation)))?;

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let worker = ConversationWorker::new(
            loaded,
            self.store.clone(),
            self.registry.clone(),
            self.notifier.clone(),
            self.ai.clone(),
            self.timeouts,
            rx,
            tx.clone(),
        );
        tokio::spawn(worker.run());
        workers.insert(*conversation, tx.clone());
        Ok(tx)
    }
}
