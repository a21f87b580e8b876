use crate::api::Backend;
use crate::error::ApiError;
use crate::models::{FriendshipStatus, Participant};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Attempts made before a friend-list load gives up.
const FRIEND_LIST_ATTEMPTS: u32 = 3;

#[derive(Default)]
struct FriendState {
    friends: Vec<Participant>,
    status_cache: HashMap<Uuid, FriendshipStatus>,
    last_error: Option<String>,
}

/// Friendship bookkeeping with a per-counterpart status cache.
///
/// Any mutating action invalidates the cached status for that
/// counterpart so the next lookup re-queries the backend.
#[derive(Clone)]
pub struct FriendStore {
    backend: Arc<dyn Backend>,
    inner: Arc<RwLock<FriendState>>,
}

impl FriendStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            inner: Arc::new(RwLock::new(FriendState::default())),
        }
    }

    pub async fn friendship_status(&self, user_id: Uuid) -> Result<FriendshipStatus, ApiError> {
        if let Some(status) = self.inner.read().status_cache.get(&user_id).copied() {
            return Ok(status);
        }
        match self.backend.friendship_status(user_id).await {
            Ok(status) => {
                self.inner.write().status_cache.insert(user_id, status);
                Ok(status)
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    pub async fn send_request(&self, user_id: Uuid) -> Result<(), ApiError> {
        let result = self.backend.send_friend_request(user_id).await;
        self.finish_mutation(user_id, result)
    }

    pub async fn accept_request(&self, user_id: Uuid) -> Result<(), ApiError> {
        let result = self.backend.accept_friend_request(user_id).await;
        self.finish_mutation(user_id, result)
    }

    pub async fn remove_friend(&self, user_id: Uuid) -> Result<(), ApiError> {
        let result = self.backend.remove_friend(user_id).await;
        if result.is_ok() {
            self.inner.write().friends.retain(|f| f.id != user_id);
        }
        self.finish_mutation(user_id, result)
    }

    /// Load the friend list with a bounded retry before surfacing the
    /// error.
    pub async fn load_friends(&self) -> Result<Vec<Participant>, ApiError> {
        let mut last_error = None;
        for attempt in 1..=FRIEND_LIST_ATTEMPTS {
            match self.backend.list_friends().await {
                Ok(friends) => {
                    let mut inner = self.inner.write();
                    inner.friends = friends.clone();
                    inner.last_error = None;
                    return Ok(friends);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "friend list fetch failed");
                    last_error = Some(err);
                }
            }
        }
        let err = last_error
            .unwrap_or_else(|| ApiError::Network("friend list unavailable".to_string()));
        self.record_error(&err);
        Err(err)
    }

    pub fn friends(&self) -> Vec<Participant> {
        self.inner.read().friends.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.read().last_error.clone()
    }

    fn finish_mutation(&self, user_id: Uuid, result: Result<(), ApiError>) -> Result<(), ApiError> {
        match result {
            Ok(()) => {
                self.inner.write().status_cache.remove(&user_id);
                Ok(())
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    fn record_error(&self, err: &ApiError) {
        self.inner.write().last_error = Some(err.user_message());
    }
}
