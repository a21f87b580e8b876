use crate::api::Backend;
use crate::channel::{ChannelFactory, PushEvent};
use crate::error::ApiError;
use crate::models::{Conversation, Message};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Unread-count responses are served from cache for this long.
const UNREAD_CACHE_MINUTES: i64 = 5;

/// Lifecycle of the single realtime subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    Subscribing,
    Subscribed,
}

#[derive(Default)]
struct InnerState {
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    current: Option<Uuid>,
    subscription: SubscriptionState,
    last_error: Option<String>,
    unread_cache: Option<(u64, DateTime<Utc>)>,
    // Monotonic sequence of the most recently applied conversation fetch.
    applied_fetch: u64,
}

struct ActiveSubscription {
    conversation_id: Uuid,
    pump: JoinHandle<()>,
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Eventually-consistent local mirror of conversations and messages,
/// combining REST pulls with a realtime push channel.
///
/// Backend failures are recorded as a human-readable string via
/// [`last_error`](Self::last_error) and leave prior state intact.
#[derive(Clone)]
pub struct MessageStore {
    backend: Arc<dyn Backend>,
    channels: Arc<dyn ChannelFactory>,
    viewer_id: Uuid,
    inner: Arc<RwLock<InnerState>>,
    subscription: Arc<Mutex<Option<ActiveSubscription>>>,
    fetch_started: Arc<AtomicU64>,
}

impl MessageStore {
    pub fn new(
        backend: Arc<dyn Backend>,
        channels: Arc<dyn ChannelFactory>,
        viewer_id: Uuid,
    ) -> Self {
        Self {
            backend,
            channels,
            viewer_id,
            inner: Arc::new(RwLock::new(InnerState::default())),
            subscription: Arc::new(Mutex::new(None)),
            fetch_started: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Full pull of the conversation list, sorted descending by last
    /// update. A response that lost the race to a later-started fetch is
    /// discarded instead of overwriting newer state.
    pub async fn fetch_conversations(&self) -> Result<(), ApiError> {
        let sequence = self.fetch_started.fetch_add(1, Ordering::SeqCst) + 1;
        match self.backend.list_conversations().await {
            Ok(mut conversations) => {
                sort_conversations(&mut conversations);
                let mut inner = self.inner.write();
                if sequence <= inner.applied_fetch {
                    debug!(sequence, "discarding stale conversation fetch");
                    return Ok(());
                }
                inner.applied_fetch = sequence;
                inner.conversations = conversations;
                inner.last_error = None;
                Ok(())
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Switch the active conversation: tear down any existing
    /// subscription, pull the conversation's messages, and open a new
    /// push subscription for it.
    ///
    /// An empty conversation list fails softly; the caller is expected
    /// to have run [`fetch_conversations`](Self::fetch_conversations)
    /// first.
    pub async fn set_current_conversation(&self, id: Uuid) -> Result<(), ApiError> {
        self.teardown_subscription();

        {
            let inner = self.inner.read();
            if inner.conversations.is_empty() {
                drop(inner);
                let err = ApiError::Validation("conversations not loaded".to_string());
                self.record_error(&err);
                return Err(err);
            }
            if !inner.conversations.iter().any(|c| c.id == id) {
                drop(inner);
                let err = ApiError::NotFound(format!("conversation {id}"));
                self.record_error(&err);
                return Err(err);
            }
        }

        {
            let mut inner = self.inner.write();
            inner.current = Some(id);
            inner.subscription = SubscriptionState::Subscribing;
        }

        let messages = match self.backend.list_messages(id).await {
            Ok(messages) => messages,
            Err(err) => {
                self.record_error(&err);
                self.inner.write().subscription = SubscriptionState::Unsubscribed;
                return Err(err);
            }
        };
        {
            let mut inner = self.inner.write();
            // The store may have moved on while the fetch was in flight.
            if inner.current != Some(id) {
                return Ok(());
            }
            inner.messages = messages;
            inner.last_error = None;
        }

        let mut subscription = match self.channels.subscribe(id).await {
            Ok(subscription) => subscription,
            Err(err) => {
                self.record_error(&err);
                self.inner.write().subscription = SubscriptionState::Unsubscribed;
                return Err(err);
            }
        };
        // A concurrent switch may have won while the subscribe call was
        // in flight; its subscription stands, ours is closed unopened.
        if self.inner.read().current != Some(id) {
            subscription.close();
            return Ok(());
        }

        let store = self.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                store.apply_push_event(event);
            }
        });
        // Replacing the slot aborts any displaced pump via Drop.
        *self.subscription.lock() = Some(ActiveSubscription {
            conversation_id: id,
            pump,
        });
        self.inner.write().subscription = SubscriptionState::Subscribed;
        Ok(())
    }

    /// Persist a message through the backend and fold the
    /// server-confirmed record into local state. No optimistic echo.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        media_url: Option<&str>,
    ) -> Result<Message, ApiError> {
        if content.trim().is_empty() && media_url.is_none() {
            return Err(ApiError::Validation("message content is empty".to_string()));
        }
        match self
            .backend
            .send_message(conversation_id, content, media_url)
            .await
        {
            Ok(message) => {
                self.absorb_message(message.clone());
                Ok(message)
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Fold a pushed event into local state. The channel delivers
    /// at-least-once, so an event whose message id is already held is
    /// discarded.
    pub fn apply_push_event(&self, event: PushEvent) {
        match event {
            PushEvent::Message(message) => {
                self.absorb_message(message);
            }
            PushEvent::Error(detail) => {
                // Logged only; channel errors never tear down store state.
                warn!(%detail, "realtime channel error");
            }
        }
    }

    /// Batch-flip read flags after a successful backend call and drop
    /// the unread-count cache.
    pub async fn mark_messages_as_read(&self, ids: &[Uuid]) -> Result<(), ApiError> {
        if ids.is_empty() {
            return Ok(());
        }
        match self.backend.mark_read(ids).await {
            Ok(()) => {
                let mut inner = self.inner.write();
                for message in inner.messages.iter_mut().filter(|m| ids.contains(&m.id)) {
                    message.read = true;
                }
                for conversation in inner.conversations.iter_mut() {
                    if let Some(last) = conversation.last_message.as_mut() {
                        if ids.contains(&last.id) {
                            last.read = true;
                        }
                    }
                }
                inner.unread_cache = None;
                Ok(())
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Server-authoritative unread count with a bounded cache. On
    /// backend failure, falls back to scanning each conversation's most
    /// recent message for unread-and-not-mine.
    pub async fn unread_messages_count(&self) -> u64 {
        if let Some((count, fetched_at)) = self.inner.read().unread_cache {
            if Utc::now() - fetched_at < Duration::minutes(UNREAD_CACHE_MINUTES) {
                return count;
            }
        }
        match self.backend.unread_count().await {
            Ok(count) => {
                self.inner.write().unread_cache = Some((count, Utc::now()));
                count
            }
            Err(err) => {
                warn!(error = %err, "unread count fetch failed, using local approximation");
                let inner = self.inner.read();
                inner
                    .conversations
                    .iter()
                    .filter(|conversation| {
                        conversation
                            .last_message
                            .as_ref()
                            .map(|m| !m.read && m.sender_id != self.viewer_id)
                            .unwrap_or(false)
                    })
                    .count() as u64
            }
        }
    }

    /// Tear down the subscription and drop all mirrored state.
    pub fn reset(&self) {
        self.teardown_subscription();
        let mut inner = self.inner.write();
        *inner = InnerState::default();
        // The started counter stays monotonic so any fetch still in
        // flight from before the reset is classified stale.
        inner.applied_fetch = self.fetch_started.load(Ordering::SeqCst);
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.read().conversations.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.read().messages.clone()
    }

    pub fn current_conversation(&self) -> Option<Conversation> {
        let inner = self.inner.read();
        inner
            .current
            .and_then(|id| inner.conversations.iter().find(|c| c.id == id).cloned())
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.inner.read().subscription
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.read().last_error.clone()
    }

    pub fn viewer_id(&self) -> Uuid {
        self.viewer_id
    }

    /// Append a confirmed or pushed message, update the owning
    /// conversation's snapshot, and re-sort the list. Returns false when
    /// the message was a duplicate.
    fn absorb_message(&self, message: Message) -> bool {
        let mut inner = self.inner.write();
        if inner.current == Some(message.conversation_id) {
            if inner.messages.iter().any(|m| m.id == message.id) {
                debug!(id = %message.id, "discarding duplicate message event");
                return false;
            }
            inner.messages.push(message.clone());
        } else if inner
            .conversations
            .iter()
            .any(|c| c.last_message.as_ref().map(|m| m.id) == Some(message.id))
        {
            debug!(id = %message.id, "discarding duplicate message event");
            return false;
        }
        if let Some(conversation) = inner
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        {
            conversation.updated_at = message.created_at;
            conversation.last_message = Some(message);
        }
        sort_conversations(&mut inner.conversations);
        true
    }

    fn teardown_subscription(&self) {
        if let Some(active) = self.subscription.lock().take() {
            debug!(conversation = %active.conversation_id, "tearing down realtime subscription");
            active.pump.abort();
        }
        self.inner.write().subscription = SubscriptionState::Unsubscribed;
    }

    fn record_error(&self, err: &ApiError) {
        self.inner.write().last_error = Some(err.user_message());
    }
}

fn sort_conversations(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}
