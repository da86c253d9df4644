//! End-to-end call flows: signaling happy path, rejection, busy handling,
//! two-party relay isolation, ring timeout, and disconnect teardown.

mod support;

use std::time::Duration;

use chathub::adapters::ai::MockAiProvider;
use chathub::adapters::websocket::{ErrorKind, ServerEvent};
use chathub::application::Timeouts;
use chathub::domain::call::CallState;
use chathub::domain::foundation::CallId;
use chathub::domain::notification::NotificationKind;

use proptest::prelude::*;

use support::{user, Harness};

fn initiate_frame(conversation: &str, callee: &str, ack: &str) -> String {
    format!(
        r#"{{"type":"call-initiate","data":{{"conversationId":"{}","calleeId":"{}","type":"VIDEO"}},"messageId":"{}"}}"#,
        conversation, callee, ack
    )
}

fn call_frame(event: &str, call_id: &CallId) -> String {
    format!(
        r#"{{"type":"{}","data":{{"callId":"{}"}}}}"#,
        event, call_id
    )
}

async fn ringing_call(
    h: &Harness,
    caller: &mut support::Client,
    callee: &mut support::Client,
    conversation: &str,
    callee_name: &str,
) -> CallId {
    h.send(caller, &initiate_frame(conversation, callee_name, "i1"))
        .await;
    let caller_sees = caller
        .recv_match(|e| match e {
            ServerEvent::CallRinging(c) => Some(c.id),
            _ => None,
        })
        .await;
    let callee_sees = callee
        .recv_match(|e| match e {
            ServerEvent::CallRinging(c) => Some(c.id),
            _ => None,
        })
        .await;
    assert_eq!(caller_sees, callee_sees);
    caller_sees
}

#[tokio::test]
async fn call_happy_path_with_bidirectional_signaling() {
    let h = Harness::with_defaults().await;
    let conv = h.direct_conversation("alice", "bob").await;
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;

    let call_id = ringing_call(&h, &mut alice, &mut bob, &conv.to_string(), "bob").await;

    h.send(&mut bob, &call_frame("call-accept", &call_id)).await;
    alice
        .recv_match(|e| match e {
            ServerEvent::CallAccepted { call_id: id } if *id == call_id => Some(()),
            _ => None,
        })
        .await;

    // Offer caller → callee.
    let offer = format!(
        r#"{{"type":"call-offer","data":{{"callId":"{}","offer":{{"type":"offer","sdp":"v=0 alpha"}}}}}}"#,
        call_id
    );
    h.send(&mut alice, &offer).await;
    let relayed = bob
        .recv_match(|e| match e {
            ServerEvent::CallOffer { offer, .. } => Some(offer.clone()),
            _ => None,
        })
        .await;
    assert_eq!(relayed["sdp"], "v=0 alpha");

    // Answer callee → caller.
    let answer = format!(
        r#"{{"type":"call-answer","data":{{"callId":"{}","answer":{{"type":"answer","sdp":"v=0 beta"}}}}}}"#,
        call_id
    );
    h.send(&mut bob, &answer).await;
    let relayed = alice
        .recv_match(|e| match e {
            ServerEvent::CallAnswer { answer, .. } => Some(answer.clone()),
            _ => None,
        })
        .await;
    assert_eq!(relayed["sdp"], "v=0 beta");

    // ICE flows both ways.
    let ice = format!(
        r#"{{"type":"call-ice-candidate","data":{{"callId":"{}","candidate":{{"candidate":"candidate:1"}}}}}}"#,
        call_id
    );
    h.send(&mut alice, &ice).await;
    bob.recv_match(|e| match e {
        ServerEvent::CallIceCandidate { .. } => Some(()),
        _ => None,
    })
    .await;
    h.send(&mut bob, &ice).await;
    alice
        .recv_match(|e| match e {
            ServerEvent::CallIceCandidate { .. } => Some(()),
            _ => None,
        })
        .await;

    // Either party may end an active call.
    h.send(&mut alice, &call_frame("call-end", &call_id)).await;
    for client in [&mut alice, &mut bob] {
        let state = client
            .recv_match(|e| match e {
                ServerEvent::CallEnded { call_id: id, state } if *id == call_id => Some(*state),
                _ => None,
            })
            .await;
        assert_eq!(state, CallState::Ended);
    }
}

#[tokio::test]
async fn rejection_is_terminal_and_late_accept_fails() {
    let h = Harness::with_defaults().await;
    let conv = h.direct_conversation("alice", "bob").await;
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;

    let call_id = ringing_call(&h, &mut alice, &mut bob, &conv.to_string(), "bob").await;

    h.send(&mut bob, &call_frame("call-reject", &call_id)).await;
    for client in [&mut alice, &mut bob] {
        client
            .recv_match(|e| match e {
                ServerEvent::CallRejected { call_id: id } if *id == call_id => Some(()),
                _ => None,
            })
            .await;
    }

    // Terminal absorption: a late accept produces an error and no events.
    let accept = format!(
        r#"{{"type":"call-accept","data":{{"callId":"{}"}},"messageId":"a1"}}"#,
        call_id
    );
    h.send(&mut bob, &accept).await;
    let error = bob
        .recv_match(|e| match e {
            ServerEvent::Ack { success, error, .. } if !success => error.clone(),
            _ => None,
        })
        .await;
    assert_eq!(error.kind, ErrorKind::InvalidCallState);
    alice
        .expect_silence(Duration::from_millis(150), |e| {
            matches!(e, ServerEvent::CallAccepted { .. })
        })
        .await;
}

#[tokio::test]
async fn busy_caller_cannot_start_a_second_call() {
    let h = Harness::with_defaults().await;
    let conv_ab = h.direct_conversation("alice", "bob").await;
    let conv_ac = h.direct_conversation("alice", "carol").await;
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;
    let _carol = h.connect("carol").await;

    let _ringing = ringing_call(&h, &mut alice, &mut bob, &conv_ab.to_string(), "bob").await;

    h.send(&mut alice, &initiate_frame(&conv_ac.to_string(), "carol", "i2"))
        .await;
    let error = alice
        .recv_match(|e| match e {
            ServerEvent::Ack { success, error, .. } if !success => error.clone(),
            _ => None,
        })
        .await;
    assert_eq!(error.kind, ErrorKind::UserBusy);
}

#[tokio::test]
async fn busy_callee_rejects_incoming_calls() {
    let h = Harness::with_defaults().await;
    let conv_ab = h.direct_conversation("alice", "bob").await;
    let conv_cb = h.direct_conversation("carol", "bob").await;
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;
    let mut carol = h.connect("carol").await;

    let _ringing = ringing_call(&h, &mut alice, &mut bob, &conv_ab.to_string(), "bob").await;

    h.send(&mut carol, &initiate_frame(&conv_cb.to_string(), "bob", "i3"))
        .await;
    let error = carol
        .recv_match(|e| match e {
            ServerEvent::Ack { success, error, .. } if !success => error.clone(),
            _ => None,
        })
        .await;
    assert_eq!(error.kind, ErrorKind::UserBusy);
}

#[tokio::test]
async fn signaling_is_strictly_two_party() {
    let h = Harness::with_defaults().await;
    let conv = h.direct_conversation("alice", "bob").await;
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;
    let mut mallory = h.connect("mallory").await;

    let call_id = ringing_call(&h, &mut alice, &mut bob, &conv.to_string(), "bob").await;
    h.send(&mut bob, &call_frame("call-accept", &call_id)).await;

    // A non-participant's offer is dropped silently: no relay, no error.
    let forged = format!(
        r#"{{"type":"call-offer","data":{{"callId":"{}","offer":{{"sdp":"forged"}}}}}}"#,
        call_id
    );
    h.send(&mut mallory, &forged).await;

    bob.expect_silence(Duration::from_millis(150), |e| {
        matches!(e, ServerEvent::CallOffer { .. })
    })
    .await;
    alice
        .expect_silence(Duration::from_millis(150), |e| {
            matches!(e, ServerEvent::CallOffer { .. })
        })
        .await;

    // An unknown call id is also a silent drop.
    let stale = format!(
        r#"{{"type":"call-ice-candidate","data":{{"callId":"{}","candidate":{{}}}}}}"#,
        CallId::new()
    );
    h.send(&mut alice, &stale).await;
    mallory
        .expect_silence(Duration::from_millis(100), |_| true)
        .await;
}

#[tokio::test]
async fn unanswered_ring_times_out_to_missed() {
    let mut timeouts = Timeouts::default();
    timeouts.ring = Duration::from_millis(300);
    let h = Harness::new(MockAiProvider::new(), timeouts).await;
    let conv = h.direct_conversation("alice", "bob").await;
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;

    let call_id = ringing_call(&h, &mut alice, &mut bob, &conv.to_string(), "bob").await;

    for client in [&mut alice, &mut bob] {
        let state = client
            .recv_match(|e| match e {
                ServerEvent::CallEnded { call_id: id, state } if *id == call_id => Some(*state),
                _ => None,
            })
            .await;
        assert_eq!(state, CallState::Missed);
    }

    let recorded = h.store.notifications_of(&user("bob"));
    assert!(recorded
        .iter()
        .any(|n| n.kind == NotificationKind::CallMissed));

    // The caller is free again.
    h.send(&mut alice, &initiate_frame(&conv.to_string(), "bob", "i4"))
        .await;
    alice
        .recv_match(|e| match e {
            ServerEvent::CallRinging(_) => Some(()),
            _ => None,
        })
        .await;
}

#[tokio::test]
async fn active_call_ends_after_disconnect_grace() {
    let mut timeouts = Timeouts::default();
    timeouts.call_reconnect_grace = Duration::from_millis(200);
    timeouts.presence_grace = Duration::from_millis(50);
    let h = Harness::new(MockAiProvider::new(), timeouts).await;
    let conv = h.direct_conversation("alice", "bob").await;
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;

    let call_id = ringing_call(&h, &mut alice, &mut bob, &conv.to_string(), "bob").await;
    h.send(&mut bob, &call_frame("call-accept", &call_id)).await;
    alice
        .recv_match(|e| match e {
            ServerEvent::CallAccepted { .. } => Some(()),
            _ => None,
        })
        .await;

    // Bob vanishes; within the grace window the peer sees nothing.
    h.disconnect(&bob).await;
    alice
        .expect_silence(Duration::from_millis(100), |e| {
            matches!(e, ServerEvent::CallEnded { .. })
        })
        .await;

    // Grace expires: the call ends for the remaining party.
    let state = alice
        .recv_match(|e| match e {
            ServerEvent::CallEnded { call_id: id, state } if *id == call_id => Some(*state),
            _ => None,
        })
        .await;
    assert_eq!(state, CallState::Ended);
}

#[tokio::test]
async fn reconnect_within_grace_keeps_the_call_alive() {
    let mut timeouts = Timeouts::default();
    timeouts.call_reconnect_grace = Duration::from_millis(300);
    let h = Harness::new(MockAiProvider::new(), timeouts).await;
    let conv = h.direct_conversation("alice", "bob").await;
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;

    let call_id = ringing_call(&h, &mut alice, &mut bob, &conv.to_string(), "bob").await;
    h.send(&mut bob, &call_frame("call-accept", &call_id)).await;

    h.disconnect(&bob).await;
    // Bob reconnects before the grace expires.
    let mut bob = h.connect("bob").await;

    alice
        .expect_silence(Duration::from_millis(500), |e| {
            matches!(e, ServerEvent::CallEnded { .. })
        })
        .await;

    // Signaling still works after the reconnect.
    let ice = format!(
        r#"{{"type":"call-ice-candidate","data":{{"callId":"{}","candidate":{{"candidate":"c"}}}}}}"#,
        call_id
    );
    h.send(&mut bob, &ice).await;
    alice
        .recv_match(|e| match e {
            ServerEvent::CallIceCandidate { .. } => Some(()),
            _ => None,
        })
        .await;
}

#[tokio::test]
async fn disconnect_while_ringing_is_missed_from_either_side() {
    let h = Harness::with_defaults().await;
    let conv = h.direct_conversation("alice", "bob").await;
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;

    // Callee drops: the caller sees MISSED.
    let first = ringing_call(&h, &mut alice, &mut bob, &conv.to_string(), "bob").await;
    h.disconnect(&bob).await;

    let state = alice
        .recv_match(|e| match e {
            ServerEvent::CallEnded { call_id: id, state } if *id == first => Some(*state),
            _ => None,
        })
        .await;
    assert_eq!(state, CallState::Missed);

    // Caller drops: the callee sees MISSED as well.
    let mut bob = h.connect("bob").await;
    h.send(&mut alice, &initiate_frame(&conv.to_string(), "bob", "i5"))
        .await;
    let second = bob
        .recv_match(|e| match e {
            ServerEvent::CallRinging(c) => Some(c.id),
            _ => None,
        })
        .await;
    h.disconnect(&alice).await;

    let state = bob
        .recv_match(|e| match e {
            ServerEvent::CallEnded { call_id: id, state } if *id == second => Some(*state),
            _ => None,
        })
        .await;
    assert_eq!(state, CallState::Missed);

    // Both transitions recorded a CALL_MISSED for the callee.
    let missed = h
        .store
        .notifications_of(&user("bob"))
        .iter()
        .filter(|n| n.kind == NotificationKind::CallMissed)
        .count();
    assert_eq!(missed, 2);
}

// The state machine itself: arbitrary event sequences never escape a
// terminal state, and every accepted transition is one of the legal edges.
proptest! {
    #[test]
    fn call_state_machine_terminal_absorption(
        transitions in proptest::collection::vec(0..6usize, 0..32)
    ) {
        use chathub::domain::foundation::StateMachine;

        let states = [
            CallState::Initiated,
            CallState::Ringing,
            CallState::Active,
            CallState::Ended,
            CallState::Rejected,
            CallState::Missed,
        ];
        let mut current = CallState::Initiated;
        let mut reached_terminal = false;

        for index in transitions {
            let target = states[index];
            match current.transition_to(target) {
                Ok(next) => {
                    prop_assert!(
                        !reached_terminal,
                        "transition accepted out of a terminal state"
                    );
                    prop_assert!(current.valid_transitions().contains(&target));
                    current = next;
                    reached_terminal = current.is_terminal();
                }
                Err(_) => {
                    prop_assert_eq!(current.can_transition_to(&target), false);
                }
            }
        }
    }
}
