use thiserror::Error;

/// Failure taxonomy shared by the backend, storage, and channel layers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("realtime channel error: {0}")]
    Channel(String),
}

impl ApiError {
    /// Map the status code reported in a response envelope onto the taxonomy.
    pub fn from_status(code: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match code {
            401 | 403 => Self::Auth(detail),
            404 => Self::NotFound(detail),
            400 | 422 => Self::Validation(detail),
            _ => Self::Network(detail),
        }
    }

    /// Human-readable form the stores surface to the UI layer.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Validation(format!("malformed response: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
