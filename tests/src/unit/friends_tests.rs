use crate::support::{participant, ScriptedBackend};
use sportlink_core::{FriendStore, FriendshipStatus, InMemoryBackend};
use std::sync::Arc;
use uuid::Uuid;

fn harness() -> (Arc<InMemoryBackend>, Arc<ScriptedBackend>, FriendStore) {
    let inner = Arc::new(InMemoryBackend::new(participant("Viewer")));
    let backend = Arc::new(ScriptedBackend::new(inner.clone()));
    let store = FriendStore::new(backend.clone());
    (inner, backend, store)
}

#[tokio::test]
async fn request_flow_walks_the_status_variants() {
    let (_, _, store) = harness();
    let counterpart = Uuid::new_v4();

    assert_eq!(
        store.friendship_status(counterpart).await.expect("status"),
        FriendshipStatus::None
    );
    store.send_request(counterpart).await.expect("request");
    assert_eq!(
        store.friendship_status(counterpart).await.expect("status"),
        FriendshipStatus::RequestSent
    );
    store.accept_request(counterpart).await.expect("accept");
    assert_eq!(
        store.friendship_status(counterpart).await.expect("status"),
        FriendshipStatus::Friends
    );
}

#[tokio::test]
async fn removing_a_friend_updates_the_list_and_status() {
    let (inner, _, store) = harness();
    let friend = participant("Ada");
    inner.seed_friend(friend.clone());

    let friends = store.load_friends().await.expect("load");
    assert_eq!(friends.len(), 1);

    store.remove_friend(friend.id).await.expect("remove");
    assert!(store.friends().is_empty());
    assert_eq!(
        store.friendship_status(friend.id).await.expect("status"),
        FriendshipStatus::None
    );
}

#[tokio::test]
async fn transient_failures_are_retried_before_surfacing() {
    let (inner, backend, store) = harness();
    inner.seed_friend(participant("Sam"));
    backend.fail_next(2);

    let friends = store.load_friends().await.expect("retried load");
    assert_eq!(friends.len(), 1);
    assert!(store.last_error().is_none());

    backend.fail_next(3);
    assert!(store.load_friends().await.is_err());
    assert!(store.last_error().is_some());
}
