//! Presence tracking: online/offline edges with a reconnect grace period.
//!
//! The rising edge fires on a user's first socket; the falling edge is
//! deferred by a grace period so that page reloads and flaky networks do not
//! flap presence. Transitions are serialized per user by an epoch counter:
//! a reconnect during grace invalidates the pending offline task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::adapters::websocket::{ConnectionRegistry, ServerEvent};
use crate::domain::foundation::{Timestamp, UserId};
use crate::ports::ChatStore;

/// Per-user online/offline tracker.
pub struct PresenceTracker {
    store: Arc<dyn ChatStore>,
    registry: Arc<ConnectionRegistry>,
    grace: Duration,
    /// Users with a pending offline transition, keyed to its epoch.
    pending_offline: Mutex<HashMap<UserId, u64>>,
    epochs: AtomicU64,
}

impl PresenceTracker {
    pub fn new(
        store: Arc<dyn ChatStore>,
        registry: Arc<ConnectionRegistry>,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            grace,
            pending_offline: Mutex::new(HashMap::new()),
            epochs: AtomicU64::new(0),
        }
    }

    /// Called for every socket registration with the rising-edge flag from
    /// the registry.
    pub async fn socket_connected(&self, user: &UserId, first_for_user: bool) {
        if !first_for_user {
            return;
        }
        // Reconnect within grace: cancel the pending offline, emit nothing.
        if self.pending_offline.lock().await.remove(user).is_some() {
            return;
        }
        let now = Timestamp::now();
        if let Err(e) = self.store.set_presence(user, true, now).await {
            tracing::error!(user_id = %user, "presence write failed: {}", e);
        }
        self.broadcast(user, ServerEvent::UserOnline { user_id: user.clone() })
            .await;
    }

    /// Called when a user's last socket unregisters. Schedules the offline
    /// transition after the grace period.
    pub async fn socket_disconnected(self: &Arc<Self>, user: &UserId) {
        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed);
        self.pending_offline.lock().await.insert(user.clone(), epoch);

        let this = self.clone();
        let user = user.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.grace).await;
            this.finalize_offline(user, epoch).await;
        });
    }

    async fn finalize_offline(&self, user: UserId, epoch: u64) {
        {
            let mut pending = self.pending_offline.lock().await;
            if pending.get(&user) != Some(&epoch) {
                return; // superseded by a reconnect or a newer disconnect
            }
            pending.remove(&user);
        }
        if self.registry.is_online(&user).await {
            return;
        }
        let last_seen = Timestamp::now();
        if let Err(e) = self.store.set_presence(&user, false, last_seen).await {
            tracing::error!(user_id = %user, "presence write failed: {}", e);
        }
        self.broadcast(
            &user,
            ServerEvent::UserOffline {
                user_id: user.clone(),
                last_seen_at: last_seen,
            },
        )
        .await;
    }

    /// Emits a presence event to every conversation the user belongs to.
    async fn broadcast(&self, user: &UserId, event: ServerEvent) {
        let conversations = match self.store.conversations_of(user).await {
            Ok(conversations) => conversations,
            Err(e) => {
                tracing::warn!(user_id = %user, "presence broadcast lookup failed: {}", e);
                return;
            }
        };
        for conversation in conversations {
            self.registry.emit_to_room(&conversation, event.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryChatStore;
    use crate::domain::conversation::ConversationKind;
    use crate::domain::foundation::SocketId;
    use crate::ports::NewConversation;
    use tokio::sync::mpsc;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    struct Fixture {
        store: Arc<MemoryChatStore>,
        registry: Arc<ConnectionRegistry>,
        presence: Arc<PresenceTracker>,
    }

    async fn fixture(grace_ms: u64) -> Fixture {
        let store = Arc::new(MemoryChatStore::new());
        let registry = Arc::new(ConnectionRegistry::new(16));
        let presence = Arc::new(PresenceTracker::new(
            store.clone(),
            registry.clone(),
            Duration::from_millis(grace_ms),
        ));
        for id in ["alice", "bob"] {
            store
                .upsert_user(&crate::domain::user::UserProfile::new(user(id), id))
                .await
                .unwrap();
        }
        store
            .create_conversation(NewConversation {
                kind: ConversationKind::Direct,
                created_by: user("alice"),
                members: vec![user("alice"), user("bob")],
                title: None,
                system_prompt: None,
            })
            .await
            .unwrap();
        Fixture {
            store,
            registry,
            presence,
        }
    }

    async fn connect(f: &Fixture, uid: &str) -> (SocketId, mpsc::Receiver<ServerEvent>) {
        let socket_id = SocketId::new();
        let (tx, rx) = mpsc::channel(16);
        let registration = f.registry.register(socket_id, user(uid), tx).await;
        f.presence
            .socket_connected(&user(uid), registration.first_for_user)
            .await;
        (socket_id, rx)
    }

    #[tokio::test]
    async fn first_socket_marks_user_online() {
        let f = fixture(50).await;
        connect(&f, "alice").await;
        let profile = f.store.get_user(&user("alice")).await.unwrap().unwrap();
        assert!(profile.is_online);
    }

    #[tokio::test]
    async fn offline_fires_after_grace() {
        let f = fixture(20).await;
        let (socket, _rx) = connect(&f, "alice").await;

        let unreg = f.registry.unregister(&socket).await.unwrap();
        assert!(unreg.last_for_user);
        f.presence.socket_disconnected(&user("alice")).await;

        // Still online inside the grace window.
        let profile = f.store.get_user(&user("alice")).await.unwrap().unwrap();
        assert!(profile.is_online);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let profile = f.store.get_user(&user("alice")).await.unwrap().unwrap();
        assert!(!profile.is_online);
        assert!(profile.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn reconnect_within_grace_absorbs_the_transition() {
        let f = fixture(40).await;
        let (socket, _rx) = connect(&f, "alice").await;

        f.registry.unregister(&socket).await.unwrap();
        f.presence.socket_disconnected(&user("alice")).await;

        // Reconnect before the grace elapses.
        let (_socket2, _rx2) = connect(&f, "alice").await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        let profile = f.store.get_user(&user("alice")).await.unwrap().unwrap();
        assert!(profile.is_online, "grace reconnect must not flap to offline");
    }
}
