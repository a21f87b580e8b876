use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Endpoints and storage locations the client is wired with.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub api_url: String,
    pub realtime_url: String,
    pub credential_dir: PathBuf,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("SportLink not configured—create sportlink.yaml with backend endpoints.")]
    Missing,
    #[error("SportLink configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Missing => {
                "SportLink not configured—create sportlink.yaml with backend endpoints."
                    .to_string()
            }
            Self::Invalid(detail) => {
                format!("SportLink not configured—{detail}. Update sportlink.yaml.")
            }
        }
    }
}

impl RuntimeSettings {
    /// Environment variables win over the config file.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let api_env = std::env::var("SPORTLINK_API_URL").ok();
        let realtime_env = std::env::var("SPORTLINK_REALTIME_URL").ok();
        if let (Some(api_url), Some(realtime_url)) = (api_env, realtime_env) {
            return Ok(Self {
                api_url: api_url.trim_end_matches('/').to_string(),
                realtime_url,
                credential_dir: default_credential_dir(),
            });
        }

        let path = locate_config_file().ok_or(ConfigError::Missing)?;
        let contents = fs::read_to_string(&path).map_err(|err| {
            ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
        })?;
        let config: SportLinkConfig = serde_yaml::from_str(&contents)
            .map_err(|err| ConfigError::Invalid(format!("invalid sportlink.yaml: {err}")))?;
        let backend = config
            .backend
            .ok_or_else(|| ConfigError::Invalid("missing `backend` section".to_string()))?;
        resolve_backend_settings(backend)
    }
}

fn resolve_backend_settings(section: BackendSection) -> Result<RuntimeSettings, ConfigError> {
    let api_url = section.api_url.trim().trim_end_matches('/').to_string();
    if api_url.is_empty() {
        return Err(ConfigError::Invalid(
            "missing backend api url in sportlink.yaml".to_string(),
        ));
    }
    let realtime_url = section.realtime_url.trim().to_string();
    if realtime_url.is_empty() {
        return Err(ConfigError::Invalid(
            "missing realtime url in sportlink.yaml".to_string(),
        ));
    }
    let credential_dir = section
        .credential_dir
        .map(PathBuf::from)
        .unwrap_or_else(default_credential_dir);
    Ok(RuntimeSettings {
        api_url,
        realtime_url,
        credential_dir,
    })
}

fn default_credential_dir() -> PathBuf {
    if let Some(base) = BaseDirs::new() {
        base.data_dir().join("sportlink")
    } else {
        PathBuf::from(".sportlink")
    }
}

fn locate_config_file() -> Option<PathBuf> {
    sportlink_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn sportlink_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("sportlink");
        paths.push(config_dir.join("sportlink.yaml"));
        paths.push(config_dir.join("sportlink.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".sportlink").join("sportlink.yaml"));
        paths.push(home_dir.join(".sportlink").join("sportlink.yml"));
    } else {
        paths.push(PathBuf::from("sportlink.yaml"));
        paths.push(PathBuf::from("sportlink.yml"));
    }
    paths
}

#[derive(Debug, Deserialize)]
struct SportLinkConfig {
    backend: Option<BackendSection>,
}

#[derive(Debug, Default, Deserialize)]
struct BackendSection {
    #[serde(default)]
    api_url: String,
    #[serde(default)]
    realtime_url: String,
    #[serde(default)]
    credential_dir: Option<String>,
}
