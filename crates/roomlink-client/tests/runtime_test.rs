//! Runtime tests against the simulated backend on a paused tokio clock.

use std::{sync::Arc, time::Duration};

use chrono::{TimeZone, Utc};
use roomlink_client::{
    ChaoticQueueStore, ConnectionStatus, ManualNetwork, MemoryQueueStore, QueueStore, RoomRuntime,
    RuntimeConfig, RuntimeError, SessionHandle, SessionView, SystemEnv,
};
use roomlink_core::{QueueItem, QueueItemId, QueueSnapshot, QueueStats, Room, UserId};
use roomlink_harness::SimBackend;
use tokio::sync::watch;

fn room() -> Room {
    Room::Group("g1".into())
}

fn spawn<S: QueueStore>(backend: &Arc<SimBackend>, store: S, network: &ManualNetwork) -> SessionHandle {
    roomlink_harness::init_test_tracing();
    RoomRuntime::spawn(
        SystemEnv::new(),
        room(),
        Some(UserId::from("u1")),
        Arc::clone(backend),
        store,
        network.clone(),
        RuntimeConfig::default(),
    )
}

async fn wait_for(
    views: &mut watch::Receiver<SessionView>,
    predicate: impl Fn(&SessionView) -> bool,
) -> SessionView {
    let view = tokio::time::timeout(Duration::from_secs(120), views.wait_for(|v| predicate(v)))
        .await
        .unwrap()
        .unwrap();
    view.clone()
}

fn connected(view: &SessionView) -> bool {
    view.connection.status == ConnectionStatus::Connected
}

fn shows(view: &SessionView, content: &str) -> bool {
    view.messages.iter().any(|m| m.content == content)
}

#[tokio::test(start_paused = true)]
async fn connected_send_is_written_once() {
    let backend = Arc::new(SimBackend::new());
    let network = ManualNetwork::new(true);
    let handle = spawn(&backend, MemoryQueueStore::new(), &network);
    let mut views = handle.subscribe_view();

    wait_for(&mut views, connected).await;
    handle.send_message("hello", None).await.unwrap();

    let view = wait_for(&mut views, |v| shows(v, "hello")).await;
    assert_eq!(view.messages.iter().filter(|m| m.content == "hello").count(), 1);
    assert!(view.pending.is_empty());
    assert_eq!(backend.messages(&room()).len(), 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn offline_send_is_queued_then_delivered() {
    let backend = Arc::new(SimBackend::new());
    backend.set_offline(true);
    let network = ManualNetwork::new(false);
    let store = MemoryQueueStore::new();
    let handle = spawn(&backend, store.clone(), &network);
    let mut views = handle.subscribe_view();

    handle.send_message("later", None).await.unwrap();
    let view = wait_for(&mut views, |v| v.queue_size == 1).await;
    assert!(!view.connection.is_online);
    assert_eq!(store.load(&room()).unwrap().unwrap().items.len(), 1);

    backend.set_offline(false);
    network.set_online(true);

    let view = wait_for(&mut views, |v| connected(v) && v.queue_size == 0 && shows(v, "later")).await;
    assert_eq!(view.queue_stats.total_processed, 1);
    assert_eq!(backend.messages(&room()).len(), 1);
    assert!(store.load(&room()).unwrap().unwrap().items.is_empty());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn hung_insert_does_not_hang_the_caller() {
    let backend = Arc::new(SimBackend::new());
    let handle = spawn(&backend, MemoryQueueStore::new(), &ManualNetwork::new(true));
    let mut views = handle.subscribe_view();

    wait_for(&mut views, connected).await;
    backend.hold_next_inserts(1);
    tokio::time::timeout(Duration::from_secs(60), handle.send_message("stuck", None))
        .await
        .unwrap()
        .unwrap();

    let view = wait_for(&mut views, |v| v.queue_size == 0 && shows(v, "stuck")).await;
    assert!(view.pending.is_empty());
    assert_eq!(backend.insert_attempts(), 2);
    assert_eq!(backend.messages(&room()).len(), 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn validation_errors_reach_the_caller() {
    let backend = Arc::new(SimBackend::new());
    let handle = spawn(&backend, MemoryQueueStore::new(), &ManualNetwork::new(true));

    let err = handle.send_message("   ", None).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(handle.view().queue_size, 0);
    assert_eq!(backend.insert_attempts(), 0);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn remote_messages_arrive_through_push() {
    let backend = Arc::new(SimBackend::new());
    let handle = spawn(&backend, MemoryQueueStore::new(), &ManualNetwork::new(true));
    let mut views = handle.subscribe_view();
    wait_for(&mut views, connected).await;

    backend.inject_remote_message(&room(), "u2", "from afar");
    backend.inject_remote_message(&Room::Community, "u2", "elsewhere");

    let view = wait_for(&mut views, |v| shows(v, "from afar")).await;
    assert!(!shows(&view, "elsewhere"));
    assert_eq!(view.messages[0].author.display_name.as_deref(), Some("User u2"));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn closed_channel_reconnects() {
    let backend = Arc::new(SimBackend::new());
    let handle = spawn(&backend, MemoryQueueStore::new(), &ManualNetwork::new(true));
    let mut views = handle.subscribe_view();
    wait_for(&mut views, connected).await;

    backend.close_subscriptions();
    wait_for(&mut views, |v| !connected(v)).await;
    wait_for(&mut views, connected).await;

    assert_eq!(backend.subscribe_attempts(), 2);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn persisted_queue_is_restored_and_drained() {
    let backend = Arc::new(SimBackend::new());
    let store = MemoryQueueStore::new();
    store
        .save(&QueueSnapshot {
            room: room(),
            items: vec![QueueItem {
                id: QueueItemId::new(7),
                content: "from last session".to_string(),
                room: room(),
                user_id: UserId::from("u1"),
                created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
                retry_count: 0,
                max_retries: 3,
                metadata: None,
            }],
            stats: QueueStats { total_queued: 1, ..QueueStats::default() },
        })
        .unwrap();

    let handle = spawn(&backend, store.clone(), &ManualNetwork::new(true));
    let mut views = handle.subscribe_view();

    wait_for(&mut views, |v| v.queue_size == 0 && shows(v, "from last session")).await;
    assert_eq!(backend.messages(&room()).len(), 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn storage_failures_are_absorbed() {
    let backend = Arc::new(SimBackend::new());
    backend.set_offline(true);
    let network = ManualNetwork::new(false);
    let store = ChaoticQueueStore::new(MemoryQueueStore::new(), 1.0);
    let handle = spawn(&backend, store.clone(), &network);
    let mut views = handle.subscribe_view();

    handle.send_message("kept in memory", None).await.unwrap();
    wait_for(&mut views, |v| v.queue_size == 1).await;
    assert!(store.failure_count() > 0);
    assert!(store.inner().is_empty());

    backend.set_offline(false);
    network.set_online(true);
    wait_for(&mut views, |v| v.queue_size == 0 && shows(v, "kept in memory")).await;

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_the_handle() {
    let backend = Arc::new(SimBackend::new());
    let handle = spawn(&backend, MemoryQueueStore::new(), &ManualNetwork::new(true));
    let mut views = handle.subscribe_view();
    wait_for(&mut views, connected).await;

    handle.shutdown().await;
    handle.shutdown().await;

    assert!(matches!(handle.reconnect().await, Err(RuntimeError::Closed)));
    assert!(matches!(handle.send_message("late", None).await, Err(RuntimeError::Closed)));
    assert_eq!(handle.view().connection.status, ConnectionStatus::Disconnected);

    for _ in 0..10 {
        if backend.subscriber_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(backend.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_stops_the_runtime() {
    let backend = Arc::new(SimBackend::new());
    let handle = spawn(&backend, MemoryQueueStore::new(), &ManualNetwork::new(true));
    let mut views = handle.subscribe_view();
    wait_for(&mut views, connected).await;

    drop(handle);

    let stopped = async { while views.changed().await.is_ok() {} };
    tokio::time::timeout(Duration::from_secs(5), stopped).await.unwrap();
    assert_eq!(views.borrow().connection.status, ConnectionStatus::Disconnected);
}
