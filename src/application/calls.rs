//! Call coordinator: the two-party signaling layer.
//!
//! Owns the live call index and drives every state change through the
//! store's compare-and-set, so racing socket events (accept vs. reject vs.
//! timeout) resolve to exactly one winner. Signaling payloads stay opaque
//! and are relayed strictly between the two participants, never to the
//! conversation room.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::adapters::websocket::{ClientError, ConnectionRegistry, ServerEvent, Session};
use crate::application::{Notifier, Timeouts};
use crate::domain::call::{Call, CallKind, CallState};
use crate::domain::foundation::{CallId, ConversationId, UserId};
use crate::ports::ChatStore;

struct LiveCall {
    call: Call,
    ring_timer: Option<JoinHandle<()>>,
    /// Reconnect-grace timers keyed by the disconnected participant.
    grace_timers: HashMap<UserId, JoinHandle<()>>,
}

impl LiveCall {
    fn abort_timers(&mut self) {
        if let Some(timer) = self.ring_timer.take() {
            timer.abort();
        }
        for (_, timer) in self.grace_timers.drain() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct LiveIndex {
    calls: HashMap<CallId, LiveCall>,
    by_user: HashMap<UserId, CallId>,
}

impl LiveIndex {
    fn busy(&self, user: &UserId) -> bool {
        self.by_user.contains_key(user)
    }

    fn remove(&mut self, call_id: &CallId) -> Option<LiveCall> {
        let mut entry = self.calls.remove(call_id)?;
        entry.abort_timers();
        for user in [&entry.call.caller_id, &entry.call.callee_id] {
            if self.by_user.get(user) == Some(call_id) {
                self.by_user.remove(user);
            }
        }
        Some(entry)
    }
}

/// Coordinates call lifecycle and relays signaling between the two parties.
pub struct CallCoordinator {
    store: Arc<dyn ChatStore>,
    registry: Arc<ConnectionRegistry>,
    notifier: Arc<Notifier>,
    timeouts: Timeouts,
    live: Mutex<LiveIndex>,
}

impl CallCoordinator {
    pub fn new(
        store: Arc<dyn ChatStore>,
        registry: Arc<ConnectionRegistry>,
        notifier: Arc<Notifier>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            timeouts,
            live: Mutex::new(LiveIndex::default()),
        }
    }

    async fn emit_to_both(&self, call: &Call, event: ServerEvent) {
        self.registry.emit_to_user(&call.caller_id, event.clone()).await;
        self.registry.emit_to_user(&call.callee_id, event).await;
    }

    /// Error for a call missing from the live index: a terminal call
    /// answers `invalid_call_state` (late accept after reject, etc.), an
    /// unknown id `not_found`.
    async fn stale_call_error(&self, call_id: &CallId) -> ClientError {
        match self.store.get_call(call_id).await {
            Ok(Some(call)) => {
                ClientError::invalid_call_state(format!("call is {}", call.state))
            }
            Ok(None) => ClientError::not_found(format!("call {}", call_id)),
            Err(e) => e.into(),
        }
    }

    /// `call-initiate`: INITIATED → RINGING, ring to both, arm the timeout.
    pub async fn initiate(
        self: &Arc<Self>,
        session: &Session,
        conversation_id: ConversationId,
        callee_id: UserId,
        kind: CallKind,
    ) -> Result<(), ClientError> {
        let caller_id = session.user_id().clone();
        if caller_id == callee_id {
            return Err(ClientError::invalid_argument("cannot call yourself"));
        }

        // The pair must share the conversation the call is anchored to.
        if self
            .store
            .membership(&conversation_id, &caller_id)
            .await?
            .is_none()
        {
            return Err(ClientError::unauthorized("not a member of this conversation"));
        }
        if self
            .store
            .membership(&conversation_id, &callee_id)
            .await?
            .is_none()
        {
            return Err(ClientError::not_found("callee is not in this conversation"));
        }

        let mut live = self.live.lock().await;
        if live.busy(&caller_id) || live.busy(&callee_id) {
            return Err(ClientError::user_busy());
        }

        let call = Call::new(conversation_id, caller_id.clone(), callee_id.clone(), kind);
        self.store.create_call(&call).await?;
        let ringing = self
            .store
            .transition_call(&call.id, CallState::Initiated, CallState::Ringing)
            .await?;

        let call_id = ringing.id;
        live.by_user.insert(caller_id, call_id);
        live.by_user.insert(callee_id, call_id);

        let ring_timer = {
            let this = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(this.timeouts.ring).await;
                this.ring_timeout(call_id).await;
            })
        };
        live.calls.insert(
            call_id,
            LiveCall {
                call: ringing.clone(),
                ring_timer: Some(ring_timer),
                grace_timers: HashMap::new(),
            },
        );
        drop(live);

        self.emit_to_both(&ringing, ServerEvent::CallRinging(ringing.clone()))
            .await;
        Ok(())
    }

    /// `call-accept` (callee only): RINGING → ACTIVE.
    pub async fn accept(&self, session: &Session, call_id: CallId) -> Result<(), ClientError> {
        let mut live = self.live.lock().await;
        let Some(entry) = live.calls.get_mut(&call_id) else {
            return Err(self.stale_call_error(&call_id).await);
        };
        if session.user_id() != &entry.call.callee_id {
            return Err(ClientError::unauthorized("only the callee may accept"));
        }

        let updated = self
            .store
            .transition_call(&call_id, CallState::Ringing, CallState::Active)
            .await?;
        entry.call = updated.clone();
        if let Some(timer) = entry.ring_timer.take() {
            timer.abort();
        }
        drop(live);

        self.emit_to_both(&updated, ServerEvent::CallAccepted { call_id })
            .await;
        Ok(())
    }

    /// `call-reject` (callee only): RINGING → REJECTED, terminal.
    pub async fn reject(&self, session: &Session, call_id: CallId) -> Result<(), ClientError> {
        let mut live = self.live.lock().await;
        let Some(entry) = live.calls.get(&call_id) else {
            return Err(self.stale_call_error(&call_id).await);
        };
        if session.user_id() != &entry.call.callee_id {
            return Err(ClientError::unauthorized("only the callee may reject"));
        }

        let updated = self
            .store
            .transition_call(&call_id, CallState::Ringing, CallState::Rejected)
            .await?;
        live.remove(&call_id);
        drop(live);

        self.emit_to_both(&updated, ServerEvent::CallRejected { call_id })
            .await;
        Ok(())
    }

    /// `call-end`: caller may cancel a RINGING call; either party ends an
    /// ACTIVE one.
    pub async fn end(&self, session: &Session, call_id: CallId) -> Result<(), ClientError> {
        let mut live = self.live.lock().await;
        let Some(entry) = live.calls.get(&call_id) else {
            return Err(self.stale_call_error(&call_id).await);
        };
        if !entry.call.is_participant(session.user_id()) {
            return Err(ClientError::unauthorized("not a participant"));
        }

        let expected = match entry.call.state {
            CallState::Ringing => {
                if session.user_id() != &entry.call.caller_id {
                    return Err(ClientError::unauthorized(
                        "only the caller may cancel a ringing call",
                    ));
                }
                CallState::Ringing
            }
            CallState::Active => CallState::Active,
            other => {
                return Err(ClientError::invalid_call_state(format!(
                    "call is {}",
                    other
                )))
            }
        };

        let updated = self
            .store
            .transition_call(&call_id, expected, CallState::Ended)
            .await?;
        live.remove(&call_id);
        drop(live);

        self.emit_to_both(
            &updated,
            ServerEvent::CallEnded {
                call_id,
                state: updated.state,
            },
        )
        .await;
        Ok(())
    }

    async fn ring_timeout(self: &Arc<Self>, call_id: CallId) {
        let mut live = self.live.lock().await;
        if !live.calls.contains_key(&call_id) {
            return;
        }
        match self
            .store
            .transition_call(&call_id, CallState::Ringing, CallState::Missed)
            .await
        {
            Ok(updated) => {
                live.remove(&call_id);
                drop(live);
                self.emit_to_both(
                    &updated,
                    ServerEvent::CallEnded {
                        call_id,
                        state: CallState::Missed,
                    },
                )
                .await;
                self.notifier.call_missed(&updated).await;
            }
            Err(e) => {
                // Lost the race against accept/reject/end; nothing to do.
                tracing::debug!(call_id = %call_id, "ring timeout lost CAS: {}", e);
            }
        }
    }

    /// Relays an opaque signaling frame to the peer. Unknown call ids and
    /// non-participants are dropped with a warning, not an error: stale
    /// frames after teardown are expected.
    async fn relay(
        &self,
        session: &Session,
        call_id: CallId,
        event: ServerEvent,
    ) -> Result<(), ClientError> {
        let live = self.live.lock().await;
        let Some(entry) = live.calls.get(&call_id) else {
            tracing::warn!(call_id = %call_id, "signaling frame for unknown call dropped");
            return Ok(());
        };
        let Some(peer) = entry.call.peer_of(session.user_id()) else {
            tracing::warn!(
                call_id = %call_id,
                user_id = %session.user_id(),
                "signaling frame from non-participant dropped"
            );
            return Ok(());
        };
        if !matches!(entry.call.state, CallState::Ringing | CallState::Active) {
            tracing::warn!(call_id = %call_id, state = %entry.call.state, "signaling frame in non-signaling state dropped");
            return Ok(());
        }
        let peer = peer.clone();
        drop(live);

        self.registry.emit_to_user(&peer, event).await;
        Ok(())
    }

    pub async fn relay_offer(
        &self,
        session: &Session,
        call_id: CallId,
        offer: serde_json::Value,
    ) -> Result<(), ClientError> {
        self.relay(session, call_id, ServerEvent::CallOffer { call_id, offer })
            .await
    }

    pub async fn relay_answer(
        &self,
        session: &Session,
        call_id: CallId,
        answer: serde_json::Value,
    ) -> Result<(), ClientError> {
        self.relay(session, call_id, ServerEvent::CallAnswer { call_id, answer })
            .await
    }

    pub async fn relay_ice_candidate(
        &self,
        session: &Session,
        call_id: CallId,
        candidate: serde_json::Value,
    ) -> Result<(), ClientError> {
        self.relay(
            session,
            call_id,
            ServerEvent::CallIceCandidate { call_id, candidate },
        )
        .await
    }

    /// Called when a user's last socket goes away. A ringing call resolves
    /// to MISSED immediately, whichever side dropped; an active call gets a
    /// reconnect grace timer.
    pub async fn user_disconnected(self: &Arc<Self>, user: &UserId) {
        let mut live = self.live.lock().await;
        let Some(call_id) = live.by_user.get(user).copied() else {
            return;
        };
        let Some(entry) = live.calls.get_mut(&call_id) else {
            return;
        };

        match entry.call.state {
            CallState::Ringing => {
                match self
                    .store
                    .transition_call(&call_id, CallState::Ringing, CallState::Missed)
                    .await
                {
                    Ok(updated) => {
                        live.remove(&call_id);
                        drop(live);
                        self.emit_to_both(
                            &updated,
                            ServerEvent::CallEnded {
                                call_id,
                                state: CallState::Missed,
                            },
                        )
                        .await;
                        self.notifier.call_missed(&updated).await;
                    }
                    Err(e) => {
                        tracing::debug!(call_id = %call_id, "disconnect transition lost CAS: {}", e);
                    }
                }
            }
            CallState::Active => {
                let this = self.clone();
                let user = user.clone();
                let grace_user = user.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(this.timeouts.call_reconnect_grace).await;
                    this.grace_expired(call_id, user).await;
                });
                entry.grace_timers.insert(grace_user, timer);
            }
            _ => {}
        }
    }

    /// A reconnect before the grace expires restores the peer mapping.
    pub async fn user_reconnected(&self, user: &UserId) {
        let mut live = self.live.lock().await;
        let Some(call_id) = live.by_user.get(user).copied() else {
            return;
        };
        if let Some(entry) = live.calls.get_mut(&call_id) {
            if let Some(timer) = entry.grace_timers.remove(user) {
                timer.abort();
            }
        }
    }

    async fn grace_expired(&self, call_id: CallId, user: UserId) {
        let mut live = self.live.lock().await;
        let Some(entry) = live.calls.get_mut(&call_id) else {
            return;
        };
        entry.grace_timers.remove(&user);
        if self.registry.is_online(&user).await {
            return;
        }
        match self
            .store
            .transition_call(&call_id, CallState::Active, CallState::Ended)
            .await
        {
            Ok(updated) => {
                live.remove(&call_id);
                drop(live);
                self.emit_to_both(
                    &updated,
                    ServerEvent::CallEnded {
                        call_id,
                        state: CallState::Ended,
                    },
                )
                .await;
            }
            Err(e) => {
                tracing::debug!(call_id = %call_id, "grace transition lost CAS: {}", e);
            }
        }
    }
}
