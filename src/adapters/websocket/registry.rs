//! Connection registry: live sockets indexed by user and by room.
//!
//! The single seam between the coordination core and connected transports.
//! Each socket owns a bounded outbound queue; emission is fire-and-forget
//! with per-socket FIFO preserved by the queue. A socket whose queue
//! overflows (slow consumer) has its sender dropped, which terminates the
//! writer task and triggers normal disconnect handling.
//!
//! Multi-node deployments would replace this with an implementation that
//! routes `emit_to_user`/`emit_to_room` through a cluster bus; everything
//! else in the core is oblivious to the difference.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};

use crate::domain::foundation::{ConversationId, SocketId, Timestamp, UserId};

use super::protocol::ServerEvent;

/// Result of registering a socket.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    /// True when this is the user's first live socket (presence rising edge).
    pub first_for_user: bool,
}

/// Result of unregistering a socket.
#[derive(Debug, Clone)]
pub struct Unregistration {
    pub user_id: UserId,
    /// True when the user has no remaining sockets (presence falling edge).
    pub last_for_user: bool,
}

struct SocketEntry {
    user_id: UserId,
    /// `None` once the queue overflowed or the writer went away.
    sender: Option<mpsc::Sender<ServerEvent>>,
    #[allow(dead_code)]
    connected_at: Timestamp,
    rooms: HashSet<ConversationId>,
}

#[derive(Default)]
struct Inner {
    sockets: HashMap<SocketId, SocketEntry>,
    user_sockets: HashMap<UserId, HashSet<SocketId>>,
    rooms: HashMap<ConversationId, HashSet<SocketId>>,
}

/// Tracks live sockets and provides targeted emission primitives.
pub struct ConnectionRegistry {
    queue_capacity: usize,
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue_capacity: queue_capacity.max(1),
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Outbound queue capacity sockets should be created with.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Registers a socket for a user, implicitly joining their personal
    /// fan-out (served by the user index).
    pub async fn register(
        &self,
        socket_id: SocketId,
        user_id: UserId,
        sender: mpsc::Sender<ServerEvent>,
    ) -> Registration {
        let mut inner = self.inner.write().await;
        let sockets = inner.user_sockets.entry(user_id.clone()).or_default();
        let first_for_user = sockets.is_empty();
        sockets.insert(socket_id);
        inner.sockets.insert(
            socket_id,
            SocketEntry {
                user_id,
                sender: Some(sender),
                connected_at: Timestamp::now(),
                rooms: HashSet::new(),
            },
        );
        Registration { first_for_user }
    }

    /// Removes a socket from every index and room.
    pub async fn unregister(&self, socket_id: &SocketId) -> Option<Unregistration> {
        let mut inner = self.inner.write().await;
        let entry = inner.sockets.remove(socket_id)?;

        for room in &entry.rooms {
            if let Some(members) = inner.rooms.get_mut(room) {
                members.remove(socket_id);
                if members.is_empty() {
                    inner.rooms.remove(room);
                }
            }
        }

        let last_for_user = match inner.user_sockets.get_mut(&entry.user_id) {
            Some(sockets) => {
                sockets.remove(socket_id);
                let empty = sockets.is_empty();
                if empty {
                    inner.user_sockets.remove(&entry.user_id);
                }
                empty
            }
            None => true,
        };

        Some(Unregistration {
            user_id: entry.user_id,
            last_for_user,
        })
    }

    /// Subscribes a socket to a conversation room. Returns false for unknown
    /// sockets.
    pub async fn join_room(&self, socket_id: &SocketId, conversation: &ConversationId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.sockets.get_mut(socket_id) else {
            return false;
        };
        entry.rooms.insert(*conversation);
        inner.rooms.entry(*conversation).or_default().insert(*socket_id);
        true
    }

    pub async fn leave_room(&self, socket_id: &SocketId, conversation: &ConversationId) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.sockets.get_mut(socket_id) {
            entry.rooms.remove(conversation);
        }
        if let Some(members) = inner.rooms.get_mut(conversation) {
            members.remove(socket_id);
            if members.is_empty() {
                inner.rooms.remove(conversation);
            }
        }
    }

    /// Whether the user has any live socket.
    pub async fn is_online(&self, user: &UserId) -> bool {
        let inner = self.inner.read().await;
        inner.user_sockets.get(user).is_some_and(|s| !s.is_empty())
    }

    /// Whether any of the user's sockets is subscribed to the room (i.e. the
    /// conversation is open in some tab).
    pub async fn is_user_in_room(&self, conversation: &ConversationId, user: &UserId) -> bool {
        let inner = self.inner.read().await;
        let Some(room) = inner.rooms.get(conversation) else {
            return false;
        };
        room.iter().any(|socket_id| {
            inner
                .sockets
                .get(socket_id)
                .is_some_and(|entry| &entry.user_id == user)
        })
    }

    /// Emits to every socket in a conversation room.
    pub async fn emit_to_room(&self, conversation: &ConversationId, event: ServerEvent) {
        let targets = {
            let inner = self.inner.read().await;
            match inner.rooms.get(conversation) {
                Some(members) => self.collect_senders(&inner, members.iter()),
                None => return,
            }
        };
        self.deliver(targets, event).await;
    }

    /// Emits to every socket of a user (the personal `user:<id>` fan-out).
    pub async fn emit_to_user(&self, user: &UserId, event: ServerEvent) {
        let targets = {
            let inner = self.inner.read().await;
            match inner.user_sockets.get(user) {
                Some(sockets) => self.collect_senders(&inner, sockets.iter()),
                None => return,
            }
        };
        self.deliver(targets, event).await;
    }

    /// Emits to one socket. Returns false if it is gone or overflowed.
    pub async fn emit_to_socket(&self, socket_id: &SocketId, event: ServerEvent) -> bool {
        let target = {
            let inner = self.inner.read().await;
            inner
                .sockets
                .get(socket_id)
                .and_then(|entry| entry.sender.clone())
        };
        match target {
            Some(sender) => {
                if sender.try_send(event).is_err() {
                    self.shed(socket_id).await;
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    fn collect_senders<'a>(
        &self,
        inner: &Inner,
        sockets: impl Iterator<Item = &'a SocketId>,
    ) -> Vec<(SocketId, mpsc::Sender<ServerEvent>)> {
        sockets
            .filter_map(|id| {
                inner
                    .sockets
                    .get(id)
                    .and_then(|entry| entry.sender.clone().map(|s| (*id, s)))
            })
            .collect()
    }

    async fn deliver(
        &self,
        targets: Vec<(SocketId, mpsc::Sender<ServerEvent>)>,
        event: ServerEvent,
    ) {
        let mut dead = Vec::new();
        for (socket_id, sender) in &targets {
            if sender.try_send(event.clone()).is_err() {
                dead.push(*socket_id);
            }
        }
        for socket_id in dead {
            self.shed(&socket_id).await;
        }
    }

    /// Drops a socket's sender after overflow or writer loss; the writer
    /// task then observes a closed channel and tears the connection down.
    async fn shed(&self, socket_id: &SocketId) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.sockets.get_mut(socket_id) {
            if entry.sender.take().is_some() {
                tracing::warn!(socket_id = %socket_id, "outbound queue overflow, closing socket");
            }
        }
    }
}
