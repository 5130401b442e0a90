// Copyright 2024 Parley Team.
//
// End-to-end scenarios: sessions talk through the real presence router and
// share one in-memory backend.

mod common;

use common::{hub_session, offline_session, user, wait_for, MemoryBackend, SignalHub};
use parley_client::ClientEvent;
use parley_protocol::ServerSignal;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[tokio::test]
async fn test_offline_receiver_fetches_message_later() {
    let backend = MemoryBackend::new(&["alice", "bob"]);
    let hub = SignalHub::new();
    let (alice, _alice_events, _alice_loop) = hub_session(&backend, &hub, "alice");

    alice.open_conversation(&user("bob")).await.unwrap();
    let sent = alice.send_text("hi").await.unwrap();
    let log = alice.messages();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].id, sent.id);

    // bob comes online after the send; the push was dropped
    let (bob, mut bob_events, _bob_loop) = hub_session(&backend, &hub, "bob");
    bob.open_conversation(&user("alice")).await.unwrap();

    assert!(bob.messages().iter().any(|m| m.id == sent.id));
    let mut appended = false;
    while let Ok(event) = bob_events.try_recv() {
        appended |= matches!(event, ClientEvent::MessageAppended { .. });
    }
    assert!(!appended);
}

#[tokio::test]
async fn test_live_push_reaches_online_peer() {
    let backend = MemoryBackend::new(&["alice", "bob"]);
    let hub = SignalHub::new();
    let (alice, _alice_events, _alice_loop) = hub_session(&backend, &hub, "alice");
    let (bob, mut bob_events, _bob_loop) = hub_session(&backend, &hub, "bob");

    alice.open_conversation(&user("bob")).await.unwrap();
    let sent = alice.send_text("ping").await.unwrap();

    let event = wait_for(&mut bob_events, |e| {
        matches!(e, ClientEvent::UnreadChanged { unread_count: 1, .. })
    })
    .await;
    assert_eq!(
        event,
        ClientEvent::UnreadChanged {
            peer: user("alice"),
            unread_count: 1
        }
    );
    let state = bob.conversation_state(&user("alice")).unwrap();
    assert_eq!(state.last_message_id, Some(sent.id));
    assert!(bob.messages().is_empty());
}

#[tokio::test]
async fn test_open_conversation_auto_marks_read_and_sends_receipt() {
    let backend = MemoryBackend::new(&["alice", "bob"]);
    let hub = SignalHub::new();
    let (alice, mut alice_events, _alice_loop) = hub_session(&backend, &hub, "alice");
    let (bob, mut bob_events, _bob_loop) = hub_session(&backend, &hub, "bob");
    alice.open_conversation(&user("bob")).await.unwrap();
    bob.open_conversation(&user("alice")).await.unwrap();
    // receipt for bob opening the conversation
    wait_for(&mut alice_events, |e| matches!(e, ClientEvent::ReadByPeer { .. })).await;

    let sent = alice.send_text("you there?").await.unwrap();

    wait_for(&mut bob_events, |e| {
        matches!(e, ClientEvent::MessageAppended { message } if message.id == sent.id)
    })
    .await;
    wait_for(&mut alice_events, |e| {
        matches!(e, ClientEvent::ReadByPeer { peer } if peer == &user("bob"))
    })
    .await;

    assert!(backend.get(&sent.id).unwrap().is_read);
    assert!(alice.messages().iter().all(|m| m.is_read));
    assert!(alice.conversation_state(&user("bob")).unwrap().peer_has_read);
    assert_eq!(bob.conversation_state(&user("alice")).unwrap().unread_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_typing_relay_and_stop() {
    let backend = MemoryBackend::new(&["alice", "bob"]);
    let hub = SignalHub::new();
    let (alice, mut alice_events, _alice_loop) = hub_session(&backend, &hub, "alice");
    let (bob, _bob_events, _bob_loop) = hub_session(&backend, &hub, "bob");
    alice.open_conversation(&user("bob")).await.unwrap();
    bob.open_conversation(&user("alice")).await.unwrap();

    let start = Instant::now();
    bob.note_local_input();
    wait_for(&mut alice_events, |e| {
        matches!(e, ClientEvent::TypingStarted { peer } if peer == &user("bob"))
    })
    .await;
    assert!(alice.is_peer_typing());
    assert!(alice.conversation_state(&user("bob")).unwrap().is_typing);

    // bob goes idle; his stop signal arrives before alice's own timeout
    wait_for(&mut alice_events, |e| {
        matches!(e, ClientEvent::TypingStopped { .. })
    })
    .await;
    assert!(!alice.is_peer_typing());
    assert!(start.elapsed() < alice.config().typing_timeout);
}

#[tokio::test(start_paused = true)]
async fn test_typing_expires_when_stop_is_lost() {
    let backend = MemoryBackend::new(&["alice", "bob"]);
    let (alice, mut events, _emitter) = offline_session(&backend, "alice");
    alice.open_conversation(&user("bob")).await.unwrap();
    let (signals, signal_rx) = mpsc::unbounded_channel();
    let _event_loop = alice.spawn_event_loop(signal_rx);

    signals
        .send(ServerSignal::Typing {
            sender_id: user("bob"),
        })
        .unwrap();
    wait_for(&mut events, |e| matches!(e, ClientEvent::TypingStarted { .. })).await;
    let start = Instant::now();

    // no stoppedTyping ever arrives
    wait_for(&mut events, |e| matches!(e, ClientEvent::TypingStopped { .. })).await;
    assert!(!alice.is_peer_typing());
    assert!(start.elapsed() >= alice.config().typing_timeout - Duration::from_millis(1));
    assert!(!alice.conversation_state(&user("bob")).unwrap().is_typing);
}

#[tokio::test(start_paused = true)]
async fn test_reconciliation_corrects_lost_pushes_within_one_interval() {
    let backend = MemoryBackend::new(&["alice", "bob"]);
    let hub = SignalHub::new();
    // alice's announcements never reach the hub
    let (alice, _alice_events, _alice_emitter) = offline_session(&backend, "alice");
    let (bob, mut bob_events, _bob_loop) = hub_session(&backend, &hub, "bob");
    bob.load_contacts().await.unwrap();
    let _reconciliation = bob.spawn_reconciliation();

    alice.open_conversation(&user("bob")).await.unwrap();
    alice.send_text("one").await.unwrap();
    let last = alice.send_text("two").await.unwrap();
    assert_eq!(bob.conversation_state(&user("alice")).unwrap().unread_count, 0);

    let start = Instant::now();
    wait_for(&mut bob_events, |e| {
        matches!(e, ClientEvent::UnreadChanged { unread_count: 2, .. })
    })
    .await;
    assert!(start.elapsed() <= bob.config().reconcile_interval);

    let state = bob.conversation_state(&user("alice")).unwrap();
    assert_eq!(state.unread_count, 2);
    assert_eq!(state.last_message_id, Some(last.id));
    assert_eq!(state.last_message_preview.as_deref(), Some("two"));
}

#[tokio::test(start_paused = true)]
async fn test_reconciliation_refetches_open_conversation() {
    let backend = MemoryBackend::new(&["alice", "bob"]);
    let (alice, _alice_events, _alice_emitter) = offline_session(&backend, "alice");
    let (bob, mut bob_events, _bob_emitter) = offline_session(&backend, "bob");
    bob.open_conversation(&user("alice")).await.unwrap();
    let _reconciliation = bob.spawn_reconciliation();

    alice.open_conversation(&user("bob")).await.unwrap();
    let lost = alice.send_text("did you get this?").await.unwrap();

    wait_for(&mut bob_events, |e| {
        matches!(e, ClientEvent::HistoryLoaded { count: 1, .. })
    })
    .await;
    assert!(bob.messages().iter().any(|m| m.id == lost.id));

    // the open conversation is marked read again
    wait_for(&mut bob_events, |e| {
        matches!(e, ClientEvent::UnreadChanged { unread_count: 0, .. })
    })
    .await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(backend.get(&lost.id).unwrap().is_read);
}

#[tokio::test]
async fn test_peer_sees_edit_and_delete_on_next_fetch() {
    let backend = MemoryBackend::new(&["alice", "bob"]);
    let hub = SignalHub::new();
    let (alice, _alice_events, _alice_loop) = hub_session(&backend, &hub, "alice");
    let (bob, mut bob_events, _bob_loop) = hub_session(&backend, &hub, "bob");
    alice.open_conversation(&user("bob")).await.unwrap();
    bob.open_conversation(&user("alice")).await.unwrap();

    let kept = alice.send_text("first").await.unwrap();
    let deleted = alice.send_text("second").await.unwrap();
    wait_for(&mut bob_events, |e| {
        matches!(e, ClientEvent::MessageAppended { message } if message.id == deleted.id)
    })
    .await;

    alice.edit_message(&kept.id, "first, edited").await.unwrap();
    alice.delete_message(&deleted.id).await.unwrap();
    assert!(bob.messages().iter().any(|m| m.id == deleted.id));

    // a message whose push was lost makes the next pass refetch
    let missed = backend.insert("alice", "bob", "third");
    bob.apply_reconciliation(&user("alice"), 1, Some(missed.clone()))
        .await;

    let log = bob.messages();
    let ids: Vec<_> = log.iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids, vec![kept.id.clone(), missed.id.clone()]);
    assert_eq!(log[0].text.as_deref(), Some("first, edited"));

    // reopening converges to the same log
    bob.open_conversation(&user("alice")).await.unwrap();
    let ids: Vec<_> = bob.messages().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![kept.id, missed.id]);
}

#[tokio::test]
async fn test_disconnect_updates_presence() {
    let backend = MemoryBackend::new(&["alice", "bob"]);
    let hub = SignalHub::new();
    let (alice, mut alice_events, _alice_loop) = hub_session(&backend, &hub, "alice");
    alice.load_contacts().await.unwrap();

    let (bob_emitter, _bob_signals) = hub.join("bob");
    wait_for(&mut alice_events, |e| {
        matches!(e, ClientEvent::PresenceChanged { online } if online.len() == 2)
    })
    .await;
    assert_eq!(alice.online_contacts().len(), 1);

    hub.leave(bob_emitter.connection_id);
    wait_for(&mut alice_events, |e| {
        matches!(e, ClientEvent::PresenceChanged { online } if online.len() == 1)
    })
    .await;
    assert!(alice.online_contacts().is_empty());
    assert!(alice.is_online(&user("alice")));
}
