use crate::error::ApiError;
use crate::models::Credential;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Fixed key under which the credential record is persisted.
const CREDENTIAL_KEY: &str = "sportlink.credential";

/// A credential expiring within this window is refreshed proactively.
const REFRESH_THRESHOLD_MINUTES: i64 = 5;

/// Key-value custody of the serialized credential record.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> Result<(), ApiError>;
    async fn get(&self, key: &str) -> Result<Option<String>, ApiError>;
    async fn delete(&self, key: &str) -> Result<(), ApiError>;
}

/// File-backed credential store rooted at a private directory.
pub struct FileCredentialStore {
    root: PathBuf,
}

impl FileCredentialStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn in_temp_dir() -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("sportlink-{}", Uuid::new_v4()));
        Self::new(path)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), ApiError> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path_for(key), value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ApiError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), ApiError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory credential store for tests and smoke tooling.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: RwLock<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn put(&self, _key: &str, value: &str) -> Result<(), ApiError> {
        *self.slot.write() = Some(value.to_string());
        Ok(())
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, ApiError> {
        Ok(self.slot.read().clone())
    }

    async fn delete(&self, _key: &str) -> Result<(), ApiError> {
        *self.slot.write() = None;
        Ok(())
    }
}

/// Exchanges a refresh token for a renewed credential.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, ApiError>;
}

/// Durable custody of the credential pair and transparent renewal.
///
/// The manager is the sole writer of the persisted record; at most one
/// credential is resident at a time.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    current: Arc<RwLock<Option<Credential>>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            current: Arc::new(RwLock::new(None)),
        }
    }

    /// Persist a credential. Storage failure is fatal to the caller.
    pub async fn store(&self, credential: Credential) -> Result<(), ApiError> {
        let serialized = serde_json::to_string(&credential)?;
        self.store.put(CREDENTIAL_KEY, &serialized).await?;
        *self.current.write() = Some(credential);
        Ok(())
    }

    /// Current credential, if any. A legacy bare-token record is migrated
    /// into the structured form on read and persisted back.
    pub async fn retrieve(&self) -> Result<Option<Credential>, ApiError> {
        if let Some(credential) = self.current.read().clone() {
            return Ok(Some(credential));
        }
        let Some(raw) = self.store.get(CREDENTIAL_KEY).await? else {
            return Ok(None);
        };
        let credential = match serde_json::from_str::<Credential>(&raw) {
            Ok(credential) => credential,
            Err(_) => match self.migrate_legacy(&raw).await? {
                Some(credential) => credential,
                None => return Ok(None),
            },
        };
        *self.current.write() = Some(credential.clone());
        Ok(Some(credential))
    }

    /// True when a credential exists and its expiry is in the future.
    ///
    /// A credential inside the refresh threshold with a refresh token
    /// present triggers exactly one refresh attempt before answering.
    pub async fn is_valid(&self) -> bool {
        let credential = match self.retrieve().await {
            Ok(Some(credential)) => credential,
            Ok(None) => return false,
            Err(err) => {
                warn!(error = %err, "credential lookup failed");
                return false;
            }
        };
        if !credential.expires_within(Duration::minutes(REFRESH_THRESHOLD_MINUTES)) {
            return true;
        }
        if credential.refresh_token.is_some() {
            match self.refresh().await {
                Ok(renewed) => return !renewed.is_expired(),
                Err(err) => {
                    debug!(error = %err, "proactive refresh failed");
                    return !credential.is_expired();
                }
            }
        }
        !credential.is_expired()
    }

    /// Exchange the refresh token for a new credential. On success the
    /// stored record is replaced atomically; on any failure the stored
    /// state is left untouched.
    pub async fn refresh(&self) -> Result<Credential, ApiError> {
        let refresh_token = self
            .retrieve()
            .await?
            .and_then(|credential| credential.refresh_token)
            .ok_or_else(|| ApiError::Auth("no refresh token available".to_string()))?;
        let renewed = self.refresher.refresh(&refresh_token).await?;
        let serialized = serde_json::to_string(&renewed)?;
        self.store.put(CREDENTIAL_KEY, &serialized).await?;
        *self.current.write() = Some(renewed.clone());
        debug!(expires_at = %renewed.expires_at, "credential refreshed");
        Ok(renewed)
    }

    /// Delete all persisted credential material. Idempotent.
    pub async fn clear(&self) -> Result<(), ApiError> {
        self.store.delete(CREDENTIAL_KEY).await?;
        *self.current.write() = None;
        Ok(())
    }

    pub async fn access_token(&self) -> Option<String> {
        self.retrieve()
            .await
            .ok()
            .flatten()
            .map(|credential| credential.access_token)
    }

    /// Pre-structured records held a bare access token. Treat the expiry
    /// as already elapsed so the next validity check forces a refresh.
    ///
    /// Anything else that fails to parse as a credential is corrupt
    /// storage, not a legacy token, and is reported as absent.
    async fn migrate_legacy(&self, raw: &str) -> Result<Option<Credential>, ApiError> {
        let token = match serde_json::from_str::<String>(raw) {
            Ok(token) => token,
            Err(_) => raw.trim().to_string(),
        };
        if token.is_empty()
            || token.starts_with('{')
            || token.starts_with('[')
            || token.contains(char::is_whitespace)
        {
            warn!("discarding unreadable credential record");
            return Ok(None);
        }
        warn!("migrating legacy credential record to structured form");
        let credential = Credential::bearer(token, None, DateTime::<Utc>::UNIX_EPOCH);
        let serialized = serde_json::to_string(&credential)?;
        self.store.put(CREDENTIAL_KEY, &serialized).await?;
        Ok(Some(credential))
    }
}
