//! Configuration management for Omnipost

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub meta_app: MetaAppConfig,
    #[serde(default)]
    pub bluesky: BlueskyConfig,
    #[serde(default)]
    pub twitter: TwitterConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub credentials: CredentialConfig,
}

/// Versioned Graph API endpoint shared by both Meta providers and the OAuth flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,
    #[serde(default = "default_graph_version")]
    pub api_version: String,
}

impl GraphConfig {
    /// Base URL including the version segment, without a trailing slash
    pub fn versioned_base(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.api_version.trim_matches('/')
        )
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            api_version: default_graph_version(),
        }
    }
}

fn default_graph_base_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_graph_version() -> String {
    "v18.0".to_string()
}

/// Meta application registration used by the OAuth exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaAppConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

impl Default for MetaAppConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: String::new(),
            redirect_uri: default_redirect_uri(),
        }
    }
}

impl MetaAppConfig {
    /// Ensure every field needed for a token exchange is present
    pub fn require_complete(&self) -> Result<()> {
        if self.app_id.trim().is_empty() {
            return Err(ConfigError::MissingField("meta_app.app_id".to_string()).into());
        }
        if self.app_secret.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "meta_app.app_secret (or OMNIPOST_META_APP_SECRET)".to_string(),
            )
            .into());
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(ConfigError::MissingField("meta_app.redirect_uri".to_string()).into());
        }
        Ok(())
    }
}

fn default_redirect_uri() -> String {
    "omnipost://auth/meta/callback".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueskyConfig {
    #[serde(default = "default_bluesky_service")]
    pub service: String,
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            service: default_bluesky_service(),
        }
    }
}

fn default_bluesky_service() -> String {
    "https://bsky.social".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitterConfig {
    /// Intent URL used when no template is stored with the credentials
    #[serde(default = "default_intent_url")]
    pub intent_url: String,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            intent_url: default_intent_url(),
        }
    }
}

fn default_intent_url() -> String {
    "https://twitter.com/intent/tweet".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Upper bound for a single provider call, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl PublishConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}

/// Storage backend type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Single JSON document on disk
    #[default]
    File,
    /// OS-native keyring (macOS Keychain, Windows Credential Manager, Linux Secret Service)
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(default)]
    pub storage: StorageBackend,

    /// Path for the file backend (keyring doesn't use files)
    #[serde(default = "default_credential_path")]
    pub path: String,
}

impl CredentialConfig {
    /// Expand ~ and environment variables in the credential path
    pub fn expand_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::File,
            path: default_credential_path(),
        }
    }
}

fn default_credential_path() -> String {
    "~/.config/omnipost/credentials.json".to_string()
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file is not an error: every section has usable defaults.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            tracing::debug!("No config file at {:?}, using defaults", config_path);
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("OMNIPOST_META_APP_SECRET") {
            if !secret.is_empty() {
                self.meta_app.app_secret = secret;
            }
        }
    }
}

/// Resolve the configuration file path (`OMNIPOST_CONFIG`, else the XDG config dir)
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("OMNIPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("omnipost").join("config.toml"))
}
