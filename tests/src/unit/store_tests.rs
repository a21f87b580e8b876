use crate::support::{
    conversation, incoming_message, participant, HoldingChannelFactory, ScriptedBackend,
};
use chrono::{Duration, Utc};
use sportlink_core::{
    ApiError, InMemoryBackend, InProcessChannelFactory, MessageStore, PushEvent,
    SubscriptionState,
};
use std::sync::Arc;
use std::time::Duration as StdDuration;

fn harness() -> (Arc<InMemoryBackend>, Arc<ScriptedBackend>, InProcessChannelFactory, MessageStore) {
    let viewer = participant("Viewer");
    let inner = Arc::new(InMemoryBackend::new(viewer.clone()));
    let backend = Arc::new(ScriptedBackend::new(inner.clone()));
    let factory = InProcessChannelFactory::new();
    let store = MessageStore::new(backend.clone(), Arc::new(factory.clone()), viewer.id);
    (inner, backend, factory, store)
}

async fn settle<F: Fn() -> bool>(ready: F) {
    for _ in 0..100 {
        if ready() {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn repeated_fetches_are_idempotent() {
    let (inner, _, _, store) = harness();
    inner.seed_conversation(conversation("Padel", Utc::now() - Duration::hours(1)), Vec::new());
    inner.seed_conversation(conversation("Trail run", Utc::now()), Vec::new());

    store.fetch_conversations().await.expect("first fetch");
    let first = store.conversations();
    store.fetch_conversations().await.expect("second fetch");
    let second = store.conversations();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.id, b.id);
    }
    assert!(first.windows(2).all(|w| w[0].updated_at >= w[1].updated_at));
}

#[tokio::test]
async fn a_fetch_that_resolves_late_is_discarded() {
    let (_, backend, _, store) = harness();
    let stale = vec![conversation("Stale", Utc::now() - Duration::hours(5))];
    let fresh = vec![conversation("Fresh", Utc::now())];
    let fresh_id = fresh[0].id;
    backend.queue_conversations(stale);
    backend.queue_conversations(fresh);

    let release = backend.hold_next_conversations();
    let slow_store = store.clone();
    let slow = tokio::spawn(async move { slow_store.fetch_conversations().await });
    // Let the held fetch claim its canned response before racing it.
    tokio::time::sleep(StdDuration::from_millis(10)).await;

    store.fetch_conversations().await.expect("fast fetch");
    release.send(()).ok();
    slow.await.expect("join").expect("slow fetch");

    let listed = store.conversations();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, fresh_id);
}

#[tokio::test]
async fn a_fetch_held_across_reset_stays_discarded() {
    let (inner, backend, _, store) = harness();
    backend.queue_conversations(vec![conversation("Ghost", Utc::now())]);

    let release = backend.hold_next_conversations();
    let slow_store = store.clone();
    let slow = tokio::spawn(async move { slow_store.fetch_conversations().await });
    tokio::time::sleep(StdDuration::from_millis(10)).await;

    store.reset();
    release.send(()).ok();
    slow.await.expect("join").expect("held fetch");
    assert!(store.conversations().is_empty());

    // A fetch issued after the reset still applies normally.
    inner.seed_conversation(conversation("Live", Utc::now()), Vec::new());
    store.fetch_conversations().await.expect("post-reset fetch");
    assert_eq!(store.conversations().len(), 1);
}

#[tokio::test]
async fn a_slow_subscribe_loses_to_a_later_switch() {
    let viewer = participant("Viewer");
    let inner = Arc::new(InMemoryBackend::new(viewer.clone()));
    let factory = InProcessChannelFactory::new();
    let holding = Arc::new(HoldingChannelFactory::new(factory.clone()));
    let store = MessageStore::new(inner.clone(), holding.clone(), viewer.id);

    let a = conversation("First", Utc::now() - Duration::minutes(1));
    let b = conversation("Second", Utc::now());
    inner.seed_conversation(a.clone(), Vec::new());
    inner.seed_conversation(b.clone(), Vec::new());
    store.fetch_conversations().await.expect("fetch");

    let release = holding.hold_next_subscribe();
    let slow_store = store.clone();
    let first = a.id;
    let slow = tokio::spawn(async move { slow_store.set_current_conversation(first).await });
    // Let the held subscribe reach its hold before switching away.
    tokio::time::sleep(StdDuration::from_millis(10)).await;

    store.set_current_conversation(b.id).await.expect("switch");
    release.send(()).ok();
    slow.await.expect("join").expect("slow select");

    settle(|| !factory.is_subscribed(a.id)).await;
    assert!(!factory.is_subscribed(a.id));
    assert!(factory.is_subscribed(b.id));
    assert_eq!(store.current_conversation().map(|c| c.id), Some(b.id));
    assert_eq!(store.subscription_state(), SubscriptionState::Subscribed);
}

#[tokio::test]
async fn pushed_duplicates_reach_the_store_only_once() {
    let (inner, _, factory, store) = harness();
    let conv = conversation("Matchday", Utc::now());
    inner.seed_conversation(conv.clone(), Vec::new());

    store.fetch_conversations().await.expect("fetch");
    store.set_current_conversation(conv.id).await.expect("select");
    assert_eq!(store.subscription_state(), SubscriptionState::Subscribed);

    let pushed = incoming_message(conv.id, "goal!", Utc::now());
    assert!(factory.push(conv.id, PushEvent::Message(pushed.clone())));
    assert!(factory.push(conv.id, PushEvent::Message(pushed.clone())));

    settle(|| !store.messages().is_empty()).await;
    // Both events flowed through the pump; only one may remain.
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    assert_eq!(
        store.messages().iter().filter(|m| m.id == pushed.id).count(),
        1
    );
}

#[tokio::test]
async fn sending_updates_the_conversation_snapshot_and_ordering() {
    let (inner, _, _, store) = harness();
    let t1 = Utc::now() - Duration::hours(1);
    let conv = conversation("c1", t1);
    inner.seed_conversation(conv.clone(), Vec::new());

    store.fetch_conversations().await.expect("fetch");
    let sent = store.send_message(conv.id, "hi", None).await.expect("send");

    let listed = store.conversations();
    assert_eq!(listed[0].id, conv.id);
    assert!(listed[0].updated_at > t1);
    assert_eq!(listed[0].updated_at, sent.created_at);
    assert_eq!(
        listed[0].last_message.as_ref().map(|m| m.id),
        Some(sent.id)
    );
}

#[tokio::test]
async fn failed_fetch_preserves_prior_state_and_records_an_error() {
    let (inner, backend, _, store) = harness();
    inner.seed_conversation(conversation("Kept", Utc::now()), Vec::new());
    store.fetch_conversations().await.expect("first fetch");
    assert_eq!(store.conversations().len(), 1);

    backend.fail_next(1);
    assert!(matches!(
        store.fetch_conversations().await,
        Err(ApiError::Network(_))
    ));
    assert_eq!(store.conversations().len(), 1);
    assert!(store.last_error().is_some());
}

#[tokio::test]
async fn unread_count_falls_back_to_the_local_approximation() {
    let (inner, backend, _, store) = harness();
    let conv = conversation("Unread", Utc::now());
    let mut with_snapshot = conv.clone();
    with_snapshot.last_message = Some(incoming_message(conv.id, "ping", Utc::now()));
    inner.seed_conversation(with_snapshot, Vec::new());

    store.fetch_conversations().await.expect("fetch");
    backend.fail_next(1);
    assert_eq!(store.unread_messages_count().await, 1);
}

#[tokio::test]
async fn unread_count_is_cached_between_calls() {
    let (inner, backend, _, store) = harness();
    let conv = conversation("Cache", Utc::now());
    inner.seed_conversation(conv.clone(), vec![incoming_message(conv.id, "hi", Utc::now())]);

    let first = store.unread_messages_count().await;
    assert_eq!(first, 1);
    // A backend failure is invisible while the cache is warm.
    backend.fail_next(1);
    assert_eq!(store.unread_messages_count().await, 1);
}

#[tokio::test]
async fn reset_tears_down_the_subscription_and_state() {
    let (inner, _, factory, store) = harness();
    let conv = conversation("Reset", Utc::now());
    inner.seed_conversation(conv.clone(), Vec::new());

    store.fetch_conversations().await.expect("fetch");
    store.set_current_conversation(conv.id).await.expect("select");

    store.reset();
    settle(|| !factory.is_subscribed(conv.id)).await;
    assert!(!factory.is_subscribed(conv.id));
    assert!(store.conversations().is_empty());
    assert!(store.messages().is_empty());
    assert_eq!(store.subscription_state(), SubscriptionState::Unsubscribed);
}

#[tokio::test]
async fn channel_errors_do_not_disturb_store_state() {
    let (inner, _, factory, store) = harness();
    let conv = conversation("Stable", Utc::now());
    inner.seed_conversation(conv.clone(), Vec::new());

    store.fetch_conversations().await.expect("fetch");
    store.set_current_conversation(conv.id).await.expect("select");
    let before = store.conversations();

    factory.push(conv.id, PushEvent::Error("transport hiccup".to_string()));
    tokio::time::sleep(StdDuration::from_millis(20)).await;

    assert_eq!(store.conversations().len(), before.len());
    assert_eq!(store.subscription_state(), SubscriptionState::Subscribed);
}
