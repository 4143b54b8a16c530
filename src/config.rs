use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::GenError;
use crate::provider::auth::{CommandTokenSource, Credentials};
use crate::storage::DEFAULT_DATA_DIR;

/// Config file looked up in the working directory when `GENSTUDIO_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "genstudio.toml";

/// Default lifetime of a token obtained from `token_command`.
const DEFAULT_TOKEN_TTL_SECS: u64 = 50 * 60;

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL the API paths are appended to, e.g. `https://res.openai.azure.com/openai/v1`.
    pub endpoint: String,
    /// Static key, sent as the `api-key` header. Takes precedence over `token_command`.
    pub api_key: Option<String>,
    /// Command printing a bearer token on stdout (no shell; split on whitespace).
    pub token_command: Option<String>,
    pub token_ttl_secs: u64,
    /// `api-version` query parameter for chat and image calls.
    pub api_version: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            token_command: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            api_version: None,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("token_command", &self.token_command)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// One selectable chat model.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub deployment: String,
    #[serde(default)]
    pub hint: String,
    #[serde(default = "default_true")]
    pub supports_streaming: bool,
    #[serde(default = "default_true")]
    pub supports_system_role: bool,
}

fn default_true() -> bool {
    true
}

impl ModelEntry {
    /// Selection key persisted in preferences.
    pub fn key(&self) -> String {
        format!("{}-{}", self.deployment, self.hint)
    }

    pub fn label(&self) -> String {
        if self.hint.is_empty() {
            self.deployment.clone()
        } else {
            format!("{} ({})", self.deployment, self.hint)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub model: String,
    pub api_version: Option<String>,
    pub poll_interval_secs: u64,
    pub max_poll_attempts: u32,
    /// Extra attempts granted to a failed poll before the job is failed.
    /// Each retry still counts against `max_poll_attempts`.
    pub poll_retries: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            model: "sora".to_string(),
            api_version: Some("preview".to_string()),
            poll_interval_secs: 5,
            max_poll_attempts: 120,
            poll_retries: 0,
        }
    }
}

impl VideoConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub deployment: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            deployment: "dall-e-3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub models: Vec<ModelEntry>,
    pub video: VideoConfig,
    pub image: ImageConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Read the config file (if any), then apply environment overrides.
    pub fn load() -> Result<Self, GenError> {
        let path = std::env::var("GENSTUDIO_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut config = Self::load_optional(&path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.ensure_models();
        tracing::debug!(?config, "resolved config");
        Ok(config)
    }

    /// Parse `path` if it exists; defaults otherwise.
    pub fn load_optional(path: &Path) -> Result<Self, GenError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| GenError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&text)
            .map_err(|e| GenError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(text: &str) -> Result<Self, GenError> {
        toml::from_str(text).map_err(|e| GenError::Config(e.to_string()))
    }

    /// Environment wins over the file. `lookup` is injected so tests need not
    /// mutate the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup("GENSTUDIO_ENDPOINT") {
            self.provider.endpoint = endpoint;
        }
        if let Some(key) = lookup("GENSTUDIO_API_KEY").filter(|k| !k.is_empty()) {
            self.provider.api_key = Some(key);
        }
        if let Some(cmd) = lookup("GENSTUDIO_TOKEN_COMMAND").filter(|c| !c.is_empty()) {
            self.provider.token_command = Some(cmd);
        }
        if let Some(dir) = lookup("GENSTUDIO_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
    }

    fn ensure_models(&mut self) {
        if self.models.is_empty() {
            tracing::warn!("no models configured, falling back to gpt-4o");
            self.models.push(ModelEntry {
                deployment: "gpt-4o".to_string(),
                hint: "default".to_string(),
                supports_streaming: true,
                supports_system_role: true,
            });
        }
    }

    pub fn model(&self, key: &str) -> Result<&ModelEntry, GenError> {
        self.models
            .iter()
            .find(|m| m.key() == key)
            .ok_or_else(|| GenError::Config("Selected model is not found.".to_string()))
    }

    pub fn default_model(&self) -> Option<&ModelEntry> {
        self.models.first()
    }

    /// Static key when configured, else a bearer token from `token_command`.
    pub fn credentials(&self) -> Result<Credentials, GenError> {
        if let Some(key) = &self.provider.api_key {
            tracing::info!("provider configured with API key authentication");
            return Ok(Credentials::ApiKey(key.clone()));
        }
        match &self.provider.token_command {
            Some(cmd) => {
                tracing::info!("provider configured with bearer token authentication");
                let source = CommandTokenSource::parse(
                    cmd,
                    Duration::from_secs(self.provider.token_ttl_secs),
                )?;
                Ok(Credentials::Bearer(Arc::new(source)))
            }
            None => Err(GenError::Config(
                "no credentials: set GENSTUDIO_API_KEY or GENSTUDIO_TOKEN_COMMAND".to_string(),
            )),
        }
    }
}
