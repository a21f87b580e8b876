//! Shared test doubles layered over the in-memory backend.

use async_trait::async_trait;
use parking_lot::Mutex;
use sportlink_core::{
    ApiError, Backend, ChannelFactory, ChannelSubscription, Conversation, Credential,
    FriendshipStatus, InProcessChannelFactory, Message, Participant,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub fn participant(name: &str) -> Participant {
    Participant {
        id: Uuid::new_v4(),
        name: name.to_string(),
    }
}

pub fn conversation(name: &str, updated_at: chrono::DateTime<chrono::Utc>) -> Conversation {
    Conversation {
        id: Uuid::new_v4(),
        name: Some(name.to_string()),
        is_group: false,
        participants: Vec::new(),
        last_message: None,
        updated_at,
    }
}

pub fn incoming_message(
    conversation_id: Uuid,
    content: &str,
    at: chrono::DateTime<chrono::Utc>,
) -> Message {
    Message {
        id: Uuid::new_v4(),
        conversation_id,
        sender_id: Uuid::new_v4(),
        content: content.to_string(),
        media_url: None,
        created_at: at,
        read: false,
    }
}

/// Delegating backend that can be told to fail its next N requests and
/// that counts conversation-list fetches. The delayed response hook
/// lets a test hold one fetch's result until a later fetch has applied.
pub struct ScriptedBackend {
    inner: Arc<dyn Backend>,
    pub failures_remaining: AtomicU32,
    pub conversation_fetches: AtomicU32,
    pending_conversations: Mutex<Vec<Vec<Conversation>>>,
    hold_conversations: Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
}

impl ScriptedBackend {
    pub fn new(inner: Arc<dyn Backend>) -> Self {
        Self {
            inner,
            failures_remaining: AtomicU32::new(0),
            conversation_fetches: AtomicU32::new(0),
            pending_conversations: Mutex::new(Vec::new()),
            hold_conversations: Mutex::new(None),
        }
    }

    pub fn fail_next(&self, requests: u32) {
        self.failures_remaining.store(requests, Ordering::SeqCst);
    }

    /// Queue a canned conversation-list response served instead of the
    /// delegate's, oldest first.
    pub fn queue_conversations(&self, conversations: Vec<Conversation>) {
        self.pending_conversations.lock().push(conversations);
    }

    /// Hold the next conversation fetch until the returned sender fires,
    /// so a test can make an earlier-started fetch resolve last.
    pub fn hold_next_conversations(&self) -> tokio::sync::oneshot::Sender<()> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        *self.hold_conversations.lock() = Some(rx);
        tx
    }

    fn take_failure(&self) -> Result<(), ApiError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(ApiError::Network("scripted failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Credential, ApiError> {
        self.take_failure()?;
        self.inner.sign_in(email, password).await
    }

    async fn current_user(&self) -> Result<Participant, ApiError> {
        self.take_failure()?;
        self.inner.current_user().await
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.conversation_fetches.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let queued = {
            let mut pending = self.pending_conversations.lock();
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        };
        let hold = { self.hold_conversations.lock().take() };
        if let Some(hold) = hold {
            hold.await.ok();
        }
        match queued {
            Some(conversations) => Ok(conversations),
            None => self.inner.list_conversations().await,
        }
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, ApiError> {
        self.take_failure()?;
        self.inner.list_messages(conversation_id).await
    }

    async fn send_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        media_url: Option<&str>,
    ) -> Result<Message, ApiError> {
        self.take_failure()?;
        self.inner.send_message(conversation_id, content, media_url).await
    }

    async fn mark_read(&self, ids: &[Uuid]) -> Result<(), ApiError> {
        self.take_failure()?;
        self.inner.mark_read(ids).await
    }

    async fn unread_count(&self) -> Result<u64, ApiError> {
        self.take_failure()?;
        self.inner.unread_count().await
    }

    async fn list_friends(&self) -> Result<Vec<Participant>, ApiError> {
        self.take_failure()?;
        self.inner.list_friends().await
    }

    async fn friendship_status(&self, user_id: Uuid) -> Result<FriendshipStatus, ApiError> {
        self.take_failure()?;
        self.inner.friendship_status(user_id).await
    }

    async fn send_friend_request(&self, user_id: Uuid) -> Result<(), ApiError> {
        self.take_failure()?;
        self.inner.send_friend_request(user_id).await
    }

    async fn accept_friend_request(&self, user_id: Uuid) -> Result<(), ApiError> {
        self.take_failure()?;
        self.inner.accept_friend_request(user_id).await
    }

    async fn remove_friend(&self, user_id: Uuid) -> Result<(), ApiError> {
        self.take_failure()?;
        self.inner.remove_friend(user_id).await
    }
}

/// Channel factory whose next subscribe call can be held open, so a test
/// can interleave a second subscription before the first completes.
pub struct HoldingChannelFactory {
    inner: InProcessChannelFactory,
    hold_subscribe: Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
}

impl HoldingChannelFactory {
    pub fn new(inner: InProcessChannelFactory) -> Self {
        Self {
            inner,
            hold_subscribe: Mutex::new(None),
        }
    }

    /// Hold the next subscribe call until the returned sender fires.
    pub fn hold_next_subscribe(&self) -> tokio::sync::oneshot::Sender<()> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        *self.hold_subscribe.lock() = Some(rx);
        tx
    }
}

#[async_trait]
impl ChannelFactory for HoldingChannelFactory {
    async fn subscribe(&self, conversation_id: Uuid) -> Result<ChannelSubscription, ApiError> {
        let hold = { self.hold_subscribe.lock().take() };
        if let Some(hold) = hold {
            hold.await.ok();
        }
        self.inner.subscribe(conversation_id).await
    }
}
