//! End-to-end session behavior against the simulated backend.

use std::time::Duration;

use roomlink_core::{
    ConnectionStatus, PendingState, Room, SendError, SessionConfig, SessionError, SessionEvent,
    UserId,
};
use roomlink_harness::{InvariantRegistry, SimDriver, init_test_tracing};

fn sim(room: Room) -> SimDriver {
    init_test_tracing();
    SimDriver::new(room, Some(UserId::from("u1")), SessionConfig::default())
        .with_invariants(InvariantRegistry::standard())
}

fn count(sim: &SimDriver, content: &str) -> usize {
    sim.contents().iter().filter(|c| *c == content).count()
}

#[test]
fn queued_while_offline_is_delivered_once_on_reconnect() {
    let mut sim = sim(Room::Group("g1".into()));
    sim.set_online(false);
    sim.start();

    sim.send("hello").unwrap();
    assert_eq!(sim.view().queue_size, 1);
    assert_eq!(sim.view().pending[0].state, PendingState::Queued);
    assert_eq!(sim.backend().insert_attempts(), 0);

    sim.set_online(true);
    sim.run_for(Duration::from_secs(2));

    let view = sim.view();
    assert_eq!(view.connection.status, ConnectionStatus::Connected);
    assert_eq!(view.queue_size, 0);
    assert_eq!(view.queue_stats.total_processed, 1);
    assert!(view.pending.is_empty());
    assert_eq!(count(&sim, "hello"), 1);
}

#[test]
fn direct_send_push_and_reload_never_duplicate() {
    let mut sim = sim(Room::Event("e1".into()));
    sim.start();
    assert_eq!(sim.view().connection.status, ConnectionStatus::Connected);

    sim.send("hi").unwrap();
    sim.handle(SessionEvent::LoadMessages).unwrap();
    sim.backend().inject_remote_message(&Room::Event("e1".into()), "u2", "hey");
    sim.advance(Duration::ZERO);
    sim.handle(SessionEvent::LoadMessages).unwrap();

    assert_eq!(sim.contents(), vec!["hi".to_string(), "hey".to_string()]);
    assert_eq!(sim.view().error, None);
}

#[test]
fn other_rooms_never_leak_in() {
    let mut sim = sim(Room::Group("g1".into()));
    sim.start();

    sim.backend().inject_remote_message(&Room::Group("g2".into()), "u2", "elsewhere");
    sim.backend().inject_remote_message(&Room::Community, "u2", "broadcast");
    sim.advance(Duration::ZERO);
    sim.handle(SessionEvent::LoadMessages).unwrap();

    assert!(sim.contents().is_empty());
}

#[test]
fn ten_failed_attempts_exhaust_then_reset_recovers() {
    let mut sim = sim(Room::Community);
    sim.backend().fail_next_subscribes(100);
    sim.start();

    sim.run_for(Duration::from_secs(600));

    let view = sim.view();
    assert_eq!(view.connection.status, ConnectionStatus::Failed);
    assert_eq!(view.connection.reconnect_attempts, 10);
    assert_eq!(view.error.as_deref(), Some("connection failed after 10 attempts"));
    assert_eq!(sim.backend().subscribe_attempts(), 11);

    sim.run_for(Duration::from_secs(600));
    assert_eq!(sim.backend().subscribe_attempts(), 11);

    sim.backend().fail_next_subscribes(0);
    sim.handle(SessionEvent::ResetConnection).unwrap();
    assert_eq!(sim.view().error, None);
    sim.run_for(Duration::from_secs(2));

    let view = sim.view();
    assert_eq!(view.connection.status, ConnectionStatus::Connected);
    assert_eq!(view.connection.reconnect_attempts, 0);
}

#[test]
fn fallback_polls_after_grace_and_stops_on_reconnect() {
    let room = Room::Group("g1".into());
    let mut sim = sim(room.clone());
    sim.start();

    sim.backend().fail_next_subscribes(3);
    sim.backend().close_subscriptions();
    sim.advance(Duration::ZERO);
    assert_ne!(sim.view().connection.status, ConnectionStatus::Connected);
    assert!(!sim.view().is_fallback_mode);

    let fetches = sim.backend().fetch_count();
    sim.run_for(Duration::from_secs(4));
    assert!(!sim.view().is_fallback_mode);
    assert_eq!(sim.backend().fetch_count(), fetches);

    sim.run_for(Duration::from_secs(2));
    assert!(sim.view().is_fallback_mode);
    assert_eq!(sim.backend().fetch_count(), fetches + 1);

    sim.backend().inject_remote_message(&room, "u2", "while you were away");
    sim.run_for(Duration::from_secs(10));

    let view = sim.view();
    assert_eq!(view.connection.status, ConnectionStatus::Connected);
    assert!(!view.is_fallback_mode);
    assert_eq!(count(&sim, "while you were away"), 1);
}

#[test]
fn failing_item_uses_exactly_its_budget() {
    let mut sim = sim(Room::Group("g1".into()));
    sim.start();
    sim.backend().fail_next_inserts(10);

    sim.send("doomed").unwrap();
    sim.run_for(Duration::from_secs(30));

    let view = sim.view();
    // One direct write plus three queued attempts
    assert_eq!(sim.backend().insert_attempts(), 4);
    assert_eq!(view.queue_size, 0);
    assert_eq!(view.queue_stats.total_failed, 1);
    assert_eq!(view.failed.len(), 1);
    assert!(matches!(view.pending[0].state, PendingState::Failed { .. }));

    let id = view.failed[0].item.id;
    sim.backend().fail_next_inserts(0);
    sim.handle(SessionEvent::RetryItem(id)).unwrap();

    let view = sim.view();
    assert!(view.failed.is_empty());
    assert!(view.pending.is_empty());
    assert_eq!(count(&sim, "doomed"), 1);
}

#[test]
fn unanswered_direct_send_falls_back_to_queue() {
    let mut sim = sim(Room::Group("g1".into()));
    sim.start();
    sim.backend().hold_next_inserts(1);

    sim.send("a").unwrap();
    assert_eq!(sim.view().pending.len(), 1);
    sim.run_for(Duration::from_secs(10));

    let view = sim.view();
    assert_eq!(view.connection.status, ConnectionStatus::Connected);
    assert_eq!(view.queue_size, 0);
    assert!(view.pending.is_empty());
    assert_eq!(sim.contents(), vec!["a".to_string()]);
    assert_eq!(sim.backend().insert_attempts(), 2);
}

#[test]
fn unanswered_queued_send_does_not_stall_the_drain() {
    let mut sim = sim(Room::Group("g1".into()));
    sim.set_online(false);
    sim.start();
    sim.send("a").unwrap();

    sim.backend().hold_next_inserts(1);
    sim.set_online(true);
    sim.run_for(Duration::from_secs(2));
    assert_eq!(sim.view().connection.status, ConnectionStatus::Connected);
    assert_eq!(sim.view().queue_size, 1);
    assert_eq!(sim.backend().insert_attempts(), 1);

    // The direct write fails while "a" is still awaiting its answer
    sim.backend().fail_next_inserts(1);
    sim.send("b").unwrap();
    assert_eq!(sim.view().queue_size, 2);

    sim.run_for(Duration::from_secs(60));

    let view = sim.view();
    assert_eq!(view.connection.status, ConnectionStatus::Connected);
    assert_eq!(view.queue_size, 0);
    assert!(view.pending.is_empty());
    assert_eq!(view.queue_stats.total_processed, 2);
    assert_eq!(sim.contents(), vec!["b".to_string(), "a".to_string()]);
    assert_eq!(sim.backend().insert_attempts(), 4);
}

#[test]
fn going_offline_halts_reconnection() {
    let mut sim = sim(Room::Group("g1".into()));
    sim.start();
    assert_eq!(sim.backend().subscribe_attempts(), 1);

    sim.set_online(false);
    let view = sim.view();
    assert_eq!(view.connection.status, ConnectionStatus::Disconnected);
    assert!(!view.connection.is_online);
    assert!(!sim.is_subscribed());

    sim.run_for(Duration::from_secs(120));
    assert_eq!(sim.view().connection.reconnect_attempts, 0);
    assert_eq!(sim.backend().subscribe_attempts(), 1);
    assert!(!sim.view().is_fallback_mode);

    sim.set_online(true);
    sim.run_for(Duration::from_secs(2));
    assert_eq!(sim.view().connection.status, ConnectionStatus::Connected);
}

#[test]
fn queue_survives_restart() {
    let room = Room::Event("e3".into());
    let mut first = sim(room.clone());
    first.set_online(false);
    first.start();
    first.send("first").unwrap();
    first.send("second").unwrap();
    first.teardown();

    first.backend().set_offline(false);
    let mut second = SimDriver::with_parts(
        first.env().clone(),
        first.backend().clone(),
        first.store().clone(),
        room,
        Some(UserId::from("u1")),
        SessionConfig::default(),
    );
    assert_eq!(second.view().queue_size, 2);
    assert_eq!(second.view().pending.len(), 2);

    second.start();

    assert_eq!(second.view().queue_size, 0);
    assert_eq!(second.contents(), vec!["first".to_string(), "second".to_string()]);
}

#[test]
fn heartbeat_failure_triggers_reconnect() {
    let mut sim = sim(Room::Community);
    sim.start();
    assert!(sim.view().connection.latency.is_some());

    sim.backend().fail_next_probes(1);
    sim.run_for(Duration::from_millis(30_500));
    assert_ne!(sim.view().connection.status, ConnectionStatus::Connected);

    sim.run_for(Duration::from_secs(2));
    assert_eq!(sim.view().connection.status, ConnectionStatus::Connected);
    assert_eq!(sim.backend().subscribe_attempts(), 2);
}

#[test]
fn validation_failures_are_never_queued() {
    let mut sim = sim(Room::Group("g1".into()));
    sim.start();

    assert_eq!(sim.send("   "), Err(SessionError::Send(SendError::EmptyContent)));

    let mut anonymous =
        SimDriver::new(Room::Group("g1".into()), None, SessionConfig::default());
    anonymous.start();
    assert_eq!(anonymous.send("hi"), Err(SessionError::Send(SendError::NotAuthenticated)));

    assert_eq!(sim.view().queue_stats.total_queued, 0);
    assert_eq!(anonymous.backend().insert_attempts(), 0);
}

#[test]
fn read_marker_is_stored_for_group_rooms_only() {
    let user = UserId::from("u1");

    let mut group = sim(Room::Group("g1".into()));
    group.start();
    group.handle(SessionEvent::MarkRead).unwrap();
    assert!(group.backend().read_status(&Room::Group("g1".into()), &user).is_some());
    assert!(group.view().read_status.is_some());

    let mut community = sim(Room::Community);
    community.start();
    community.handle(SessionEvent::MarkRead).unwrap();
    assert_eq!(community.backend().read_status(&Room::Community, &user), None);
    assert_eq!(community.view().read_status, None);
}

#[test]
fn manual_disconnect_stays_down() {
    let mut sim = sim(Room::Group("g1".into()));
    sim.start();

    sim.handle(SessionEvent::Disconnect).unwrap();
    sim.run_for(Duration::from_secs(60));

    let view = sim.view();
    assert_eq!(view.connection.status, ConnectionStatus::Disconnected);
    assert!(!view.is_fallback_mode);
    assert_eq!(sim.backend().subscribe_attempts(), 1);

    sim.send("later").unwrap();
    assert_eq!(sim.view().queue_size, 1);

    sim.handle(SessionEvent::Reconnect).unwrap();
    sim.run_for(Duration::from_secs(2));
    assert_eq!(sim.view().queue_size, 0);
    assert_eq!(count(&sim, "later"), 1);
}
