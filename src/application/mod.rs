//! Application layer: the realtime coordination core.
//!
//! Wires the ports and the connection registry into the services that hold
//! the protocol together: the authorization gate, the per-conversation
//! workers, presence, the call coordinator, and notification fan-out.

pub mod calls;
pub mod chat;
pub mod conversation_worker;
pub mod dispatcher;
pub mod gate;
pub mod notifier;
pub mod presence;

pub use calls::CallCoordinator;
pub use chat::ChatService;
pub use gate::Gate;
pub use notifier::Notifier;
pub use presence::PresenceTracker;

use std::sync::Arc;
use std::time::Duration;

use crate::adapters::websocket::ConnectionRegistry;
use crate::ports::{AiProvider, ChatStore, IdentityVerifier, RateLimiter};

/// Protocol timeouts, all configurable; defaults match the wire contract.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Handshake token verification limit.
    pub handshake: Duration,
    /// How long an acked event may take before the client gets `internal`.
    pub ack: Duration,
    /// Typing indicator expiry.
    pub typing: Duration,
    /// Offline transition grace after the last socket closes.
    pub presence_grace: Duration,
    /// Unanswered ring → MISSED.
    pub ring: Duration,
    /// ACTIVE call survives a disconnect this long.
    pub call_reconnect_grace: Duration,
    /// Whole-stream wall-clock cap for one AI response.
    pub ai_wall_clock: Duration,
    /// Maximum silence between provider chunks.
    pub ai_idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(5),
            ack: Duration::from_secs(5),
            typing: Duration::from_secs(5),
            presence_grace: Duration::from_secs(5),
            ring: Duration::from_secs(30),
            call_reconnect_grace: Duration::from_secs(10),
            ai_wall_clock: Duration::from_secs(120),
            ai_idle: Duration::from_secs(30),
        }
    }
}

/// Shared application context handed to the transport layer.
pub struct App {
    pub store: Arc<dyn ChatStore>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub registry: Arc<ConnectionRegistry>,
    pub limiter: Arc<dyn RateLimiter>,
    pub gate: Gate,
    pub chat: ChatService,
    pub presence: Arc<PresenceTracker>,
    pub calls: Arc<CallCoordinator>,
    pub notifier: Arc<Notifier>,
    pub timeouts: Timeouts,
}

impl App {
    pub fn new(
        store: Arc<dyn ChatStore>,
        verifier: Arc<dyn IdentityVerifier>,
        ai: Arc<dyn AiProvider>,
        limiter: Arc<dyn RateLimiter>,
        timeouts: Timeouts,
        outbound_queue_capacity: usize,
    ) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new(outbound_queue_capacity));
        let notifier = Arc::new(Notifier::new(store.clone(), registry.clone()));
        let presence = Arc::new(PresenceTracker::new(
            store.clone(),
            registry.clone(),
            timeouts.presence_grace,
        ));
        let calls = Arc::new(CallCoordinator::new(
            store.clone(),
            registry.clone(),
            notifier.clone(),
            timeouts,
        ));
        let chat = ChatService::new(
            store.clone(),
            registry.clone(),
            notifier.clone(),
            ai,
            timeouts,
        );
        let gate = Gate::new(store.clone());

        Arc::new(Self {
            store,
            verifier,
            registry,
            limiter,
            gate,
            chat,
            presence,
            calls,
            notifier,
            timeouts,
        })
    }
}
