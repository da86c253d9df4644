//! Two-party call aggregate and its signaling state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{
    CallId, ConversationId, StateMachine, Timestamp, TransitionError, UserId,
};

/// Media kind requested by the caller. The core never sees media; this only
/// informs the callee's ringing UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallKind {
    Audio,
    Video,
}

/// Lifecycle state of a call.
///
/// ```text
/// INITIATED ─▶ RINGING ─┬─▶ ACTIVE ─▶ ENDED
///                       ├─▶ REJECTED
///                       ├─▶ ENDED      (caller hangs up while ringing)
///                       └─▶ MISSED     (ring timeout / callee gone)
/// ```
///
/// ENDED, REJECTED and MISSED are terminal; no signaling event for a call in
/// a terminal state has any effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    Initiated,
    Ringing,
    Active,
    Ended,
    Rejected,
    Missed,
}

impl StateMachine for CallState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use CallState::*;
        matches!(
            (self, target),
            (Initiated, Ringing)
                | (Ringing, Active)
                | (Ringing, Rejected)
                | (Ringing, Ended)
                | (Ringing, Missed)
                | (Active, Ended)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use CallState::*;
        match self {
            Initiated => vec![Ringing],
            Ringing => vec![Active, Rejected, Ended, Missed],
            Active => vec![Ended],
            Ended | Rejected | Missed => vec![],
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Initiated => "INITIATED",
            CallState::Ringing => "RINGING",
            CallState::Active => "ACTIVE",
            CallState::Ended => "ENDED",
            CallState::Rejected => "REJECTED",
            CallState::Missed => "MISSED",
        };
        write!(f, "{}", s)
    }
}

/// A two-party signaling session between a caller and a callee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub id: CallId,
    pub conversation_id: ConversationId,
    pub caller_id: UserId,
    pub callee_id: UserId,
    #[serde(rename = "type")]
    pub kind: CallKind,
    pub state: CallState,
    pub initiated_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ringing_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
}

impl Call {
    /// Creates a call in INITIATED state.
    pub fn new(
        conversation_id: ConversationId,
        caller_id: UserId,
        callee_id: UserId,
        kind: CallKind,
    ) -> Self {
        Self {
            id: CallId::new(),
            conversation_id,
            caller_id,
            callee_id,
            kind,
            state: CallState::Initiated,
            initiated_at: Timestamp::now(),
            ringing_at: None,
            connected_at: None,
            ended_at: None,
        }
    }

    /// Applies a validated transition, stamping the matching timestamp.
    pub fn apply_transition(&mut self, next: CallState) -> Result<(), TransitionError> {
        self.state = self.state.transition_to(next)?;
        let now = Timestamp::now();
        match next {
            CallState::Ringing => self.ringing_at = Some(now),
            CallState::Active => self.connected_at = Some(now),
            CallState::Ended | CallState::Rejected | CallState::Missed => {
                self.ended_at = Some(now)
            }
            CallState::Initiated => {}
        }
        Ok(())
    }

    /// Whether the user is one of the two call parties.
    pub fn is_participant(&self, user: &UserId) -> bool {
        &self.caller_id == user || &self.callee_id == user
    }

    /// The other party, if the user is a participant.
    pub fn peer_of(&self, user: &UserId) -> Option<&UserId> {
        if user == &self.caller_id {
            Some(&self.callee_id)
        } else if user == &self.callee_id {
            Some(&self.caller_id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> Call {
        Call::new(
            ConversationId::new(),
            UserId::new("caller").unwrap(),
            UserId::new("callee").unwrap(),
            CallKind::Video,
        )
    }

    #[test]
    fn happy_path_transitions() {
        let mut c = call();
        c.apply_transition(CallState::Ringing).unwrap();
        c.apply_transition(CallState::Active).unwrap();
        c.apply_transition(CallState::Ended).unwrap();
        assert!(c.ringing_at.is_some());
        assert!(c.connected_at.is_some());
        assert!(c.ended_at.is_some());
    }

    #[test]
    fn accept_after_reject_is_rejected() {
        let mut c = call();
        c.apply_transition(CallState::Ringing).unwrap();
        c.apply_transition(CallState::Rejected).unwrap();
        assert!(c.apply_transition(CallState::Active).is_err());
        assert_eq!(c.state, CallState::Rejected);
    }

    #[test]
    fn terminal_states_absorb() {
        for terminal in [CallState::Ended, CallState::Rejected, CallState::Missed] {
            assert!(terminal.is_terminal());
            for target in [
                CallState::Initiated,
                CallState::Ringing,
                CallState::Active,
                CallState::Ended,
            ] {
                assert!(!terminal.can_transition_to(&target));
            }
        }
    }

    #[test]
    fn peer_of_maps_both_directions() {
        let c = call();
        assert_eq!(c.peer_of(&c.caller_id), Some(&c.callee_id));
        assert_eq!(c.peer_of(&c.callee_id), Some(&c.caller_id));
        assert_eq!(c.peer_of(&UserId::new("stranger").unwrap()), None);
    }

    #[test]
    fn wire_shape_uses_screaming_states() {
        let c = call();
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["state"], "INITIATED");
        assert_eq!(json["type"], "VIDEO");
        assert!(json.get("callerId").is_some());
    }
}
