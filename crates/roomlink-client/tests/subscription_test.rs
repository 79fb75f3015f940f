//! Push subscription tests against the simulated backend.

use std::{sync::Arc, time::Duration};

use roomlink_client::{BackendError, Subscription, SubscriptionEvent, SubscriptionManager};
use roomlink_core::{InsertNotice, MessageId, Room};
use roomlink_harness::SimBackend;
use tokio::sync::mpsc;

fn room() -> Room {
    Room::Group("g1".into())
}

async fn open(backend: &Arc<SimBackend>) -> (Subscription, mpsc::Receiver<SubscriptionEvent>) {
    roomlink_harness::init_test_tracing();
    let (tx, rx) = mpsc::channel(16);
    let subscription =
        SubscriptionManager::new(Arc::clone(backend)).subscribe(&room(), tx).await.unwrap();
    (subscription, rx)
}

async fn next(rx: &mut mpsc::Receiver<SubscriptionEvent>) -> Option<SubscriptionEvent> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap()
}

fn content(event: Option<SubscriptionEvent>) -> String {
    match event {
        Some(SubscriptionEvent::Message(message)) => message.content,
        other => panic!("expected a message, got {other:?}"),
    }
}

#[tokio::test]
async fn notices_are_hydrated_before_forwarding() {
    let backend = Arc::new(SimBackend::new());
    let (subscription, mut rx) = open(&backend).await;
    assert_eq!(subscription.room(), &room());

    backend.inject_remote_message(&room(), "u2", "hello");

    let Some(SubscriptionEvent::Message(message)) = next(&mut rx).await else {
        panic!("expected a message")
    };
    assert_eq!(message.content, "hello");
    assert_eq!(message.author.display_name.as_deref(), Some("User u2"));
}

#[tokio::test]
async fn refused_subscription_is_an_error() {
    let backend = Arc::new(SimBackend::new());
    backend.fail_next_subscribes(1);
    let (tx, _rx) = mpsc::channel(16);

    let result = SubscriptionManager::new(Arc::clone(&backend)).subscribe(&room(), tx).await;
    assert!(matches!(result, Err(BackendError::Rejected(_))));
    assert_eq!(backend.subscriber_count(), 0);
}

#[tokio::test]
async fn notices_for_other_rooms_are_ignored() {
    let backend = Arc::new(SimBackend::new());
    let (_subscription, mut rx) = open(&backend).await;

    let foreign = backend.inject_remote_message(&Room::Event("e1".into()), "u2", "elsewhere");
    backend.push_notice(InsertNotice { id: foreign.id, room: foreign.room });
    backend.inject_remote_message(&room(), "u2", "here");

    assert_eq!(content(next(&mut rx).await), "here");
}

#[tokio::test]
async fn notice_that_cannot_be_hydrated_is_dropped() {
    let backend = Arc::new(SimBackend::new());
    let (_subscription, mut rx) = open(&backend).await;

    backend.push_notice(InsertNotice { id: MessageId::from("gone"), room: room() });
    backend.inject_remote_message(&room(), "u2", "after");

    assert_eq!(content(next(&mut rx).await), "after");
}

#[tokio::test]
async fn stream_end_is_reported() {
    let backend = Arc::new(SimBackend::new());
    let (subscription, mut rx) = open(&backend).await;

    backend.close_subscriptions();

    assert_eq!(next(&mut rx).await, Some(SubscriptionEvent::Closed));
    assert_eq!(next(&mut rx).await, None);
    assert!(!subscription.is_closed());
}

#[tokio::test]
async fn close_is_idempotent() {
    let backend = Arc::new(SimBackend::new());
    let (mut subscription, mut rx) = open(&backend).await;
    assert_eq!(backend.subscriber_count(), 1);

    subscription.close();
    subscription.close();
    assert!(subscription.is_closed());

    // The forwarding task is gone without reporting a stream end
    assert_eq!(next(&mut rx).await, None);
    assert_eq!(backend.subscriber_count(), 0);

    backend.inject_remote_message(&room(), "u2", "unheard");
    assert_eq!(backend.messages(&room()).len(), 1);
}

#[tokio::test]
async fn dropping_the_handle_closes_it() {
    let backend = Arc::new(SimBackend::new());
    let (subscription, mut rx) = open(&backend).await;

    drop(subscription);

    assert_eq!(next(&mut rx).await, None);
    assert_eq!(backend.subscriber_count(), 0);
}
