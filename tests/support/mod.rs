#![allow(dead_code)] // each suite uses a different slice of the harness

//! Shared harness for the end-to-end flow suites.
//!
//! Drives the application layer exactly the way the WebSocket handler does:
//! channel-backed sockets registered with the connection registry, frames
//! fed through the dispatcher, server events read from each client's queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use chathub::adapters::ai::MockAiProvider;
use chathub::adapters::memory::MemoryChatStore;
use chathub::adapters::rate_limiter::InMemoryRateLimiter;
use chathub::adapters::websocket::{AckCache, ServerEvent, Session};
use chathub::application::{dispatcher, App, Timeouts};
use chathub::domain::conversation::ConversationKind;
use chathub::domain::foundation::{ConversationId, SocketId, UserId};
use chathub::domain::user::UserProfile;
use chathub::ports::{ChatStore, Claims, NewConversation};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub app: Arc<App>,
    pub store: Arc<MemoryChatStore>,
}

pub struct Client {
    pub session: Session,
    pub rx: mpsc::Receiver<ServerEvent>,
    acks: AckCache,
}

pub fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

impl Harness {
    pub async fn new(ai: MockAiProvider, timeouts: Timeouts) -> Self {
        let store = Arc::new(MemoryChatStore::new());
        let app = App::new(
            store.clone(),
            Arc::new(chathub::adapters::auth::MockIdentityVerifier::new()),
            Arc::new(ai),
            Arc::new(InMemoryRateLimiter::default()),
            timeouts,
            64,
        );
        Self { app, store }
    }

    pub async fn with_defaults() -> Self {
        Self::new(MockAiProvider::new(), Timeouts::default()).await
    }

    /// Registers a profile mirror and opens a fake socket for the user.
    pub async fn connect(&self, id: &str) -> Client {
        self.store
            .upsert_user(&UserProfile::new(user(id), id))
            .await
            .unwrap();

        let socket_id = SocketId::new();
        let (tx, rx) = mpsc::channel(64);
        let registration = self.app.registry.register(socket_id, user(id), tx).await;
        self.app
            .presence
            .socket_connected(&user(id), registration.first_for_user)
            .await;
        self.app.calls.user_reconnected(&user(id)).await;

        let claims = Claims {
            user_id: user(id),
            email: Some(format!("{}@mock.local", id)),
            name: Some(id.to_string()),
            avatar_url: None,
        };
        Client {
            session: Session::new(socket_id, claims),
            rx,
            acks: AckCache::new(256),
        }
    }

    /// Tears a client down the way the handler does on socket close.
    pub async fn disconnect(&self, client: &Client) {
        if let Some(unreg) = self.app.registry.unregister(&client.session.socket_id).await {
            if unreg.last_for_user {
                self.app.presence.socket_disconnected(&unreg.user_id).await;
                self.app.calls.user_disconnected(&unreg.user_id).await;
            }
        }
    }

    /// Feeds one raw frame through the dispatcher.
    pub async fn send(&self, client: &mut Client, frame: &str) {
        dispatcher::dispatch(&self.app, &client.session, frame, &mut client.acks).await;
    }

    pub async fn direct_conversation(&self, a: &str, b: &str) -> ConversationId {
        self.store
            .create_conversation(NewConversation {
                kind: ConversationKind::Direct,
                created_by: user(a),
                members: vec![user(a), user(b)],
                title: None,
                system_prompt: None,
            })
            .await
            .unwrap()
            .id
    }

    pub async fn ai_conversation(&self, creator: &str) -> ConversationId {
        self.store
            .create_conversation(NewConversation {
                kind: ConversationKind::AiChat,
                created_by: user(creator),
                members: vec![user(creator)],
                title: Some("assistant".into()),
                system_prompt: None,
            })
            .await
            .unwrap()
            .id
    }

    pub async fn join(&self, client: &mut Client, conversation: &ConversationId) {
        let frame = format!(
            r#"{{"type":"join-conversation","data":{{"conversationId":"{}"}}}}"#,
            conversation
        );
        self.send(client, &frame).await;
    }
}

impl Client {
    /// Next event, bounded by the receive timeout.
    pub async fn recv(&mut self) -> ServerEvent {
        tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a server event")
            .expect("socket channel closed")
    }

    /// Skips events until one matches, returning the mapped value.
    pub async fn recv_match<T>(&mut self, mut map: impl FnMut(&ServerEvent) -> Option<T>) -> T {
        for _ in 0..50 {
            let event = self.recv().await;
            if let Some(value) = map(&event) {
                return value;
            }
        }
        panic!("no matching event within 50 events");
    }

    /// Asserts that no event matching the predicate arrives within the
    /// given window (other events may).
    pub async fn expect_silence(
        &mut self,
        window: Duration,
        mut matches: impl FnMut(&ServerEvent) -> bool,
    ) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match tokio::time::timeout(remaining, self.rx.recv()).await {
                Ok(Some(event)) => {
                    assert!(!matches(&event), "unexpected event arrived: {:?}", event);
                }
                Ok(None) | Err(_) => return,
            }
        }
    }
}
