use crate::error::ApiError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access/refresh token pair with its expiry metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default = "Credential::default_token_type")]
    pub token_type: String,
}

impl Credential {
    fn default_token_type() -> String {
        "bearer".to_string()
    }

    pub fn bearer(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at,
            token_type: Self::default_token_type(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn expires_within(&self, window: Duration) -> bool {
        Utc::now() + window >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub last_message: Option<Message>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Explicit name when set, otherwise derived from the other participants.
    pub fn display_name(&self, viewer_id: Uuid) -> String {
        if let Some(name) = self.name.as_ref().filter(|n| !n.trim().is_empty()) {
            return name.clone();
        }
        let others: Vec<&str> = self
            .participants
            .iter()
            .filter(|p| p.id != viewer_id)
            .map(|p| p.name.as_str())
            .collect();
        if others.is_empty() {
            "Conversation".to_string()
        } else {
            others.join(", ")
        }
    }
}

/// Friendship standing with one counterpart user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FriendshipStatus {
    None,
    RequestSent,
    RequestReceived,
    Friends,
}

/// The single normalized response envelope every backend endpoint uses.
///
/// A payload that does not match this shape fails the request with a
/// validation error instead of probing alternate field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub error: Option<String>,
    #[serde(rename = "statusCode")]
    pub status_code: Option<u16>,
}

impl<T> ApiEnvelope<T> {
    pub fn into_result(self) -> Result<T, ApiError> {
        if self.success {
            self.data.ok_or_else(|| {
                ApiError::Validation("envelope marked success but carried no data".to_string())
            })
        } else {
            Err(self.into_error())
        }
    }

    /// For endpoints whose success responses carry no payload.
    pub fn ensure_success(self) -> Result<(), ApiError> {
        if self.success {
            Ok(())
        } else {
            Err(self.into_error())
        }
    }

    fn into_error(self) -> ApiError {
        let detail = self
            .error
            .or(self.message)
            .unwrap_or_else(|| "request failed".to_string());
        ApiError::from_status(self.status_code.unwrap_or(0), detail)
    }
}
