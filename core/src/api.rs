use crate::error::ApiError;
use crate::models::{
    ApiEnvelope, Conversation, Credential, FriendshipStatus, Message, Participant,
};
use crate::session::{SessionManager, TokenRefresher};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Remote operations the stores depend on.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Credential, ApiError>;
    async fn current_user(&self) -> Result<Participant, ApiError>;
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, ApiError>;
    async fn send_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        media_url: Option<&str>,
    ) -> Result<Message, ApiError>;
    async fn mark_read(&self, ids: &[Uuid]) -> Result<(), ApiError>;
    async fn unread_count(&self) -> Result<u64, ApiError>;
    async fn list_friends(&self) -> Result<Vec<Participant>, ApiError>;
    async fn friendship_status(&self, user_id: Uuid) -> Result<FriendshipStatus, ApiError>;
    async fn send_friend_request(&self, user_id: Uuid) -> Result<(), ApiError>;
    async fn accept_friend_request(&self, user_id: Uuid) -> Result<(), ApiError>;
    async fn remove_friend(&self, user_id: Uuid) -> Result<(), ApiError>;
}

#[derive(Deserialize)]
struct UnreadCountPayload {
    count: u64,
}

#[derive(Deserialize)]
struct FriendshipStatusPayload {
    status: FriendshipStatus,
}

/// JSON-over-HTTPS backend speaking the normalized response envelope.
///
/// Every request carries the bearer token from the session manager; a
/// 401 triggers one token refresh and one retry before failing.
pub struct HttpBackend {
    http: Client,
    base_url: String,
    session: SessionManager,
}

impl HttpBackend {
    pub fn new(http: Client, base_url: impl Into<String>, session: SessionManager) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_with_token(&self, request: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let request = match self.session.access_token().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        Ok(request.send().await?)
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Auth("request rejected with 401".to_string()));
        }
        let envelope: ApiEnvelope<T> = response.json().await?;
        envelope.into_result()
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let retry = request.try_clone();
        let response = self.send_with_token(request).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let Some(retry) = retry else {
                return Err(ApiError::Auth("request rejected with 401".to_string()));
            };
            debug!("401 received, refreshing session and retrying once");
            self.session.refresh().await?;
            let response = self.send_with_token(retry).await?;
            return Self::parse(response).await;
        }
        Self::parse(response).await
    }

    async fn parse_unit(response: reqwest::Response) -> Result<(), ApiError> {
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Auth("request rejected with 401".to_string()));
        }
        let envelope: ApiEnvelope<serde_json::Value> = response.json().await?;
        envelope.ensure_success()
    }

    async fn execute_unit(&self, request: RequestBuilder) -> Result<(), ApiError> {
        let retry = request.try_clone();
        let response = self.send_with_token(request).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let Some(retry) = retry else {
                return Err(ApiError::Auth("request rejected with 401".to_string()));
            };
            self.session.refresh().await?;
            let response = self.send_with_token(retry).await?;
            return Self::parse_unit(response).await;
        }
        Self::parse_unit(response).await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Credential, ApiError> {
        let response = self
            .http
            .post(self.endpoint("auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn current_user(&self) -> Result<Participant, ApiError> {
        self.execute(self.http.get(self.endpoint("users/me"))).await
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.execute(self.http.get(self.endpoint("conversations")))
            .await
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, ApiError> {
        self.execute(
            self.http
                .get(self.endpoint(&format!("conversations/{conversation_id}/messages"))),
        )
        .await
    }

    async fn send_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        media_url: Option<&str>,
    ) -> Result<Message, ApiError> {
        self.execute(
            self.http
                .post(self.endpoint(&format!("conversations/{conversation_id}/messages")))
                .json(&json!({ "content": content, "media_url": media_url })),
        )
        .await
    }

    async fn mark_read(&self, ids: &[Uuid]) -> Result<(), ApiError> {
        self.execute_unit(
            self.http
                .post(self.endpoint("messages/read"))
                .json(&json!({ "ids": ids })),
        )
        .await
    }

    async fn unread_count(&self) -> Result<u64, ApiError> {
        let payload: UnreadCountPayload = self
            .execute(self.http.get(self.endpoint("messages/unread-count")))
            .await?;
        Ok(payload.count)
    }

    async fn list_friends(&self) -> Result<Vec<Participant>, ApiError> {
        self.execute(self.http.get(self.endpoint("friends"))).await
    }

    async fn friendship_status(&self, user_id: Uuid) -> Result<FriendshipStatus, ApiError> {
        let payload: FriendshipStatusPayload = self
            .execute(
                self.http
                    .get(self.endpoint(&format!("friends/{user_id}/status"))),
            )
            .await?;
        Ok(payload.status)
    }

    async fn send_friend_request(&self, user_id: Uuid) -> Result<(), ApiError> {
        self.execute_unit(
            self.http
                .post(self.endpoint(&format!("friends/{user_id}/request"))),
        )
        .await
    }

    async fn accept_friend_request(&self, user_id: Uuid) -> Result<(), ApiError> {
        self.execute_unit(
            self.http
                .post(self.endpoint(&format!("friends/{user_id}/accept"))),
        )
        .await
    }

    async fn remove_friend(&self, user_id: Uuid) -> Result<(), ApiError> {
        self.execute_unit(
            self.http
                .delete(self.endpoint(&format!("friends/{user_id}"))),
        )
        .await
    }
}

/// Refresh-endpoint client used by the session manager. Kept separate
/// from [`HttpBackend`] so the backend can depend on the session
/// manager without a cycle.
pub struct HttpTokenRefresher {
    http: Client,
    base_url: String,
}

impl HttpTokenRefresher {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, ApiError> {
        let response = self
            .http
            .post(format!("{}/auth/refresh", self.base_url))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Auth("refresh token rejected".to_string()));
        }
        let envelope: ApiEnvelope<Credential> = response.json().await?;
        envelope.into_result()
    }
}

/// In-memory backend for the smoke tooling and tests.
pub struct InMemoryBackend {
    state: Mutex<InMemoryState>,
}

struct InMemoryState {
    viewer: Participant,
    conversations: Vec<Conversation>,
    messages: HashMap<Uuid, Vec<Message>>,
    friends: Vec<Participant>,
    statuses: HashMap<Uuid, FriendshipStatus>,
}

impl InMemoryBackend {
    pub fn new(viewer: Participant) -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                viewer,
                conversations: Vec::new(),
                messages: HashMap::new(),
                friends: Vec::new(),
                statuses: HashMap::new(),
            }),
        }
    }

    pub fn seed_conversation(&self, conversation: Conversation, messages: Vec<Message>) {
        let mut state = self.state.lock();
        state.messages.insert(conversation.id, messages);
        state.conversations.push(conversation);
    }

    pub fn seed_friend(&self, friend: Participant) {
        let mut state = self.state.lock();
        state.statuses.insert(friend.id, FriendshipStatus::Friends);
        state.friends.push(friend);
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn sign_in(&self, _email: &str, _password: &str) -> Result<Credential, ApiError> {
        Ok(Credential::bearer(
            format!("access-{}", Uuid::new_v4()),
            Some(format!("refresh-{}", Uuid::new_v4())),
            Utc::now() + chrono::Duration::hours(1),
        ))
    }

    async fn current_user(&self) -> Result<Participant, ApiError> {
        Ok(self.state.lock().viewer.clone())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        Ok(self.state.lock().conversations.clone())
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, ApiError> {
        self.state
            .lock()
            .messages
            .get(&conversation_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("conversation {conversation_id}")))
    }

    async fn send_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        media_url: Option<&str>,
    ) -> Result<Message, ApiError> {
        let mut state = self.state.lock();
        let sender_id = state.viewer.id;
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: content.to_string(),
            media_url: media_url.map(str::to_string),
            created_at: Utc::now(),
            read: true,
        };
        state
            .messages
            .entry(conversation_id)
            .or_default()
            .push(message.clone());
        if let Some(conversation) = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conversation.updated_at = message.created_at;
            conversation.last_message = Some(message.clone());
        }
        Ok(message)
    }

    async fn mark_read(&self, ids: &[Uuid]) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        for messages in state.messages.values_mut() {
            for message in messages.iter_mut().filter(|m| ids.contains(&m.id)) {
                message.read = true;
            }
        }
        Ok(())
    }

    async fn unread_count(&self) -> Result<u64, ApiError> {
        let state = self.state.lock();
        let viewer = state.viewer.id;
        Ok(state
            .messages
            .values()
            .flatten()
            .filter(|m| !m.read && m.sender_id != viewer)
            .count() as u64)
    }

    async fn list_friends(&self) -> Result<Vec<Participant>, ApiError> {
        Ok(self.state.lock().friends.clone())
    }

    async fn friendship_status(&self, user_id: Uuid) -> Result<FriendshipStatus, ApiError> {
        Ok(self
            .state
            .lock()
            .statuses
            .get(&user_id)
            .copied()
            .unwrap_or(FriendshipStatus::None))
    }

    async fn send_friend_request(&self, user_id: Uuid) -> Result<(), ApiError> {
        self.state
            .lock()
            .statuses
            .insert(user_id, FriendshipStatus::RequestSent);
        Ok(())
    }

    async fn accept_friend_request(&self, user_id: Uuid) -> Result<(), ApiError> {
        self.state
            .lock()
            .statuses
            .insert(user_id, FriendshipStatus::Friends);
        Ok(())
    }

    async fn remove_friend(&self, user_id: Uuid) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        state.statuses.insert(user_id, FriendshipStatus::None);
        state.friends.retain(|friend| friend.id != user_id);
        Ok(())
    }
}
