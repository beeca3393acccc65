//! Presence, keepalive and reconnect behaviour
//!
//! These tests verify:
//! - Busy flags going stale without keepalives
//! - Disconnect grace, reconnect and dispose grace
//! - The keepalive watchdog
//! - Push notification confirmation
//! - Relay of media, device and switch-to-video frames, only between joined
//!   participants and only from the device driving the call

mod common;

use std::time::Duration;

use callwire_signal_core::{
    CallState, IdentityId, InboundFrame, MediaDevicesStatus, OutboundFrame, SignalConfig,
};
use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;

/// alice calls bob, bob accepts and both report media ready
async fn connected_pair(harness: &Harness) -> (Client, Client) {
    let mut alice = harness.login("alice").await;
    let mut bob = harness.login("bob").await;
    harness.send(&alice, start("alice", "bob")).await;
    harness.send(&bob, accept("alice", "bob")).await;
    harness.send(&alice, InboundFrame::CallClientReady).await;
    harness.send(&bob, InboundFrame::CallClientReady).await;
    alice.drain();
    bob.drain();
    (alice, bob)
}

#[tokio::test(start_paused = true)]
async fn test_busy_flag_expires_without_keepalive() {
    let harness = Harness::start();
    let (mut alice, mut bob) = connected_pair(&harness).await;
    let mut carol = harness.login("carol").await;
    assert!(harness.is_busy("alice").await);
    assert!(harness.is_busy("bob").await);
    assert!(!harness.is_busy("carol").await);

    harness.wait(Duration::from_secs(20)).await;
    harness.send(&alice, InboundFrame::CallKeepalive).await;
    harness.wait(Duration::from_secs(15)).await;

    assert!(harness.is_busy("alice").await);
    assert!(!harness.is_busy("bob").await);
    assert!(harness.snapshot().await.identity("bob").unwrap().busy);

    // the stale call is torn down when someone else reaches bob
    harness.send(&carol, start("carol", "bob")).await;
    assert_eq!(carol.events(), NO_EVENTS);
    assert_eq!(alice.events(), vec![CALL_ENDED]);
    assert_eq!(bob.events(), vec![CALL_ENDED, CALL_INCOMING]);

    let snapshot = harness.snapshot().await;
    assert!(snapshot.session("alice").is_none());
    assert!(snapshot.session("carol").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_grace_ends_call_for_other_side() {
    let harness = Harness::with_config(SignalConfig {
        disconnect_grace_ms: 5_000,
        ..Default::default()
    });
    let (alice, mut bob) = connected_pair(&harness).await;

    harness.close(&alice).await;
    harness.wait(Duration::from_secs(4)).await;
    assert_eq!(bob.events(), NO_EVENTS);
    assert!(harness.snapshot().await.session("alice").is_some());

    harness.wait(Duration::from_secs(2)).await;
    assert_eq!(bob.events(), vec![CALL_ENDED]);

    let snapshot = harness.snapshot().await;
    assert!(snapshot.sessions.is_empty());
    assert!(!snapshot.identity("bob").unwrap().busy);
    assert_eq!(harness.history.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_default_grace_ends_call_right_away() {
    let harness = Harness::start();
    let (alice, mut bob) = connected_pair(&harness).await;

    harness.close(&alice).await;
    harness.wait(Duration::from_millis(1)).await;
    assert_eq!(bob.events(), vec![CALL_ENDED]);
    assert!(harness.snapshot().await.sessions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_within_grace_resumes_call() {
    let harness = Harness::with_config(SignalConfig {
        disconnect_grace_ms: 5_000,
        ..Default::default()
    });
    let (alice, mut bob) = connected_pair(&harness).await;

    harness.close(&alice).await;
    harness.wait(Duration::from_secs(2)).await;

    let mut alice = harness.login("alice").await;
    assert_eq!(alice.events(), vec![CALL_RECONNECTED]);

    harness.wait(Duration::from_secs(10)).await;
    assert_eq!(bob.events(), NO_EVENTS);

    let snapshot = harness.snapshot().await;
    assert!(snapshot.session("alice").unwrap().connected);
    assert_eq!(
        snapshot.identity("alice").unwrap().active_connection.as_ref(),
        Some(&alice.connection)
    );

    harness.send(&alice, InboundFrame::SendOffer(json!({"sdp": "v=0"}))).await;
    assert_eq!(bob.drain(), vec![OutboundFrame::ReceiveOffer(json!({"sdp": "v=0"}))]);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_grace_round_trip() {
    let harness = Harness::start();
    let alice = harness.login("alice").await;

    harness.close(&alice).await;
    harness.wait(Duration::from_secs(119)).await;
    let snapshot = harness.snapshot().await;
    let retained = snapshot.identity("alice").unwrap();
    assert!(!retained.online);

    let alice = harness.login("alice").await;
    harness.wait(Duration::from_secs(5)).await;
    assert!(harness.snapshot().await.identity("alice").unwrap().online);

    harness.close(&alice).await;
    harness.wait(Duration::from_secs(121)).await;
    assert!(harness.snapshot().await.identity("alice").is_none());

    let _alice = harness.login("alice").await;
    let fresh = harness.snapshot().await;
    let identity = fresh.identity("alice").unwrap();
    assert!(identity.online);
    assert!(!identity.busy);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_within_dispose_grace_keeps_pending_invite() {
    let harness = Harness::with_config(SignalConfig {
        call_timeout_ms: 200_000,
        ..Default::default()
    });
    let mut alice = harness.login("alice").await;
    let bob = harness.login("bob").await;

    harness.send(&alice, start("alice", "bob")).await;
    harness.close(&bob).await;
    harness.wait(Duration::from_secs(100)).await;

    let mut bob = harness.login("bob").await;
    assert_eq!(bob.events(), vec![CALL_INCOMING]);
    assert!(harness.snapshot().await.identity("bob").unwrap().ringing);

    harness.send(&bob, accept("alice", "bob")).await;
    assert_eq!(alice.events(), vec![CALL_ACCEPTED]);
}

#[tokio::test(start_paused = true)]
async fn test_late_login_receives_pending_invite() {
    let harness = Harness::start();
    let mut alice = harness.login("alice").await;

    harness.send(&alice, start("alice", "bob")).await;
    let mut bob = harness.login("bob").await;
    assert_eq!(bob.events(), vec![CALL_INCOMING]);

    harness.send(&bob, accept("alice", "bob")).await;
    assert_eq!(alice.events(), vec![CALL_ACCEPTED]);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_watchdog_ends_silent_call() {
    let harness = Harness::with_config(SignalConfig {
        keepalive_watchdog_ms: Some(10_000),
        ..Default::default()
    });
    let (mut alice, mut bob) = connected_pair(&harness).await;

    harness.wait(Duration::from_secs(5)).await;
    harness.send(&bob, InboundFrame::CallKeepalive).await;
    assert_eq!(alice.events(), NO_EVENTS);

    harness.wait(Duration::from_secs(6)).await;
    assert_eq!(alice.events(), vec![CALL_ENDED]);
    assert_eq!(bob.events(), vec![CALL_ENDED]);
    assert!(harness.snapshot().await.sessions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_keepalives_hold_the_watchdog_off() {
    let harness = Harness::with_config(SignalConfig {
        keepalive_watchdog_ms: Some(10_000),
        ..Default::default()
    });
    let (mut alice, mut bob) = connected_pair(&harness).await;

    for _ in 0..6 {
        harness.wait(Duration::from_secs(5)).await;
        harness.send(&alice, InboundFrame::CallKeepalive).await;
        harness.send(&bob, InboundFrame::CallKeepalive).await;
    }
    assert_eq!(alice.events(), NO_EVENTS);
    assert_eq!(bob.events(), NO_EVENTS);
    assert!(harness.is_busy("alice").await);
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_push_is_withdrawn_while_call_rings() {
    let harness = Harness::with_config(SignalConfig {
        notification_confirm_ms: 5_000,
        ..Default::default()
    });
    let alice = harness.login("alice").await;

    harness.send(&alice, start("alice", "dave")).await;
    harness.wait(Duration::from_secs(6)).await;
    assert_eq!(harness.cancelled_pushes(), vec![IdentityId::new("dave")]);
    assert!(harness.snapshot().await.session("alice").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_push_is_left_alone() {
    let harness = Harness::with_config(SignalConfig {
        notification_confirm_ms: 5_000,
        ..Default::default()
    });
    *harness.notifications.deliver.lock() = true;
    let alice = harness.login("alice").await;

    harness.send(&alice, start("alice", "dave")).await;
    harness.wait(Duration::from_secs(6)).await;
    assert!(harness.cancelled_pushes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_push_leaves_the_call_ringing() {
    let harness = Harness::with_config(SignalConfig {
        notification_confirm_ms: 5_000,
        ..Default::default()
    });
    *harness.notifications.fail.lock() = true;
    let mut alice = harness.login("alice").await;
    let mut bob = harness.login("bob").await;

    harness.send(&alice, start("alice", "bob")).await;
    assert_eq!(bob.events(), vec![CALL_INCOMING]);
    assert_eq!(harness.sent_pushes(), vec![IdentityId::new("bob")]);

    // an unanswered push is still withdrawn once the confirmation window lapses
    harness.wait(Duration::from_secs(6)).await;
    assert_eq!(harness.cancelled_pushes(), vec![IdentityId::new("bob")]);
    assert!(harness.snapshot().await.session("alice").is_some());

    harness.send(&bob, accept("alice", "bob")).await;
    assert_eq!(alice.events(), vec![CALL_ACCEPTED]);
    assert_eq!(harness.snapshot().await.session("alice").unwrap().state, CallState::Calling);
}

#[tokio::test(start_paused = true)]
async fn test_check_callee_status_reports_busy_and_ongoing() {
    let harness = Harness::start();
    let mut alice = harness.login("alice").await;
    let bob = harness.login("bob").await;
    let _carol = harness.login("carol").await;

    harness.send(&bob, start("bob", "carol")).await;
    harness
        .send(&alice, InboundFrame::CheckCalleeStatus { callee: "bob".into() })
        .await;
    assert_eq!(
        alice.drain(),
        vec![OutboundFrame::CalleeStatus {
            busy: true,
            ongoing: false
        }]
    );

    harness
        .send(&alice, InboundFrame::CheckCalleeStatus { callee: "dave".into() })
        .await;
    assert_eq!(
        alice.drain(),
        vec![OutboundFrame::CalleeStatus {
            busy: false,
            ongoing: false
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_in_call_frames_are_relayed_to_the_other_side() {
    let harness = Harness::start();
    let (mut alice, mut bob) = connected_pair(&harness).await;

    let status = MediaDevicesStatus {
        identity: "alice".to_string(),
        audio_on: true,
        video_on: false,
    };
    harness
        .send(&alice, InboundFrame::ChangeMediaDevices(status.clone()))
        .await;
    assert_eq!(bob.drain(), vec![OutboundFrame::UpdateMediaDevicesStatus(status)]);

    let candidate = json!({"candidate": "candidate:1 1 udp 2122260223 10.0.0.1 54400 typ host"});
    harness
        .send(&bob, InboundFrame::SendCandidate(candidate.clone()))
        .await;
    assert_eq!(alice.drain(), vec![OutboundFrame::ReceiveCandidate(candidate)]);

    harness.send(&bob, InboundFrame::SwitchToVideo).await;
    assert_eq!(alice.events(), vec![CALL_SWITCH_TO_VIDEO_REQUESTED]);
    harness.send(&alice, InboundFrame::SwitchToVideoAccept).await;
    assert_eq!(bob.events(), vec![CALL_SWITCH_TO_VIDEO_ACCEPTED]);
    harness.send(&alice, InboundFrame::SwitchToVideoReject).await;
    assert_eq!(bob.events(), vec![CALL_SWITCH_TO_VIDEO_REJECTED]);
}

#[tokio::test(start_paused = true)]
async fn test_relay_outside_a_call_goes_nowhere() {
    let harness = Harness::start();
    let alice = harness.login("alice").await;
    let mut bob = harness.login("bob").await;

    harness.send(&alice, InboundFrame::SendAnswer(json!({"sdp": "v=0"}))).await;
    assert_eq!(bob.events(), NO_EVENTS);
}

#[tokio::test(start_paused = true)]
async fn test_relay_waits_until_the_callee_joins() {
    let harness = Harness::start();
    let mut alice = harness.login("alice").await;
    let mut bob = harness.login("bob").await;

    harness.send(&alice, start("alice", "bob")).await;
    bob.drain();
    harness.send(&alice, InboundFrame::SendOffer(json!({"sdp": "v=0"}))).await;
    harness.send(&bob, InboundFrame::SendCandidate(json!({"candidate": ""}))).await;
    assert_eq!(bob.events(), NO_EVENTS);
    assert_eq!(alice.events(), NO_EVENTS);

    harness.send(&bob, accept("alice", "bob")).await;
    alice.drain();
    harness.send(&alice, InboundFrame::SendOffer(json!({"sdp": "v=0"}))).await;
    assert_eq!(bob.drain(), vec![OutboundFrame::ReceiveOffer(json!({"sdp": "v=0"}))]);
}

#[tokio::test(start_paused = true)]
async fn test_relay_only_hears_the_answering_device() {
    let harness = Harness::start();
    let mut alice = harness.login("alice").await;
    let mut phone = harness.login("bob").await;
    let mut laptop = harness.login("bob").await;
    harness.send(&alice, start("alice", "bob")).await;
    harness.send(&phone, accept("alice", "bob")).await;
    alice.drain();
    phone.drain();
    laptop.drain();

    harness.send(&laptop, InboundFrame::SendAnswer(json!({"sdp": "laptop"}))).await;
    harness.send(&laptop, InboundFrame::SwitchToVideo).await;
    assert_eq!(alice.events(), NO_EVENTS);
    assert_eq!(laptop.events(), NO_EVENTS);

    harness.send(&phone, InboundFrame::SendAnswer(json!({"sdp": "phone"}))).await;
    assert_eq!(alice.drain(), vec![OutboundFrame::ReceiveAnswer(json!({"sdp": "phone"}))]);
}
