//! Error types for Omnipost

use thiserror::Error;

use crate::oauth::ExchangeStep;

pub type Result<T> = std::result::Result<T, OmnipostError>;

#[derive(Error, Debug)]
pub enum OmnipostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("OAuth error: {0}")]
    OAuth(#[from] OAuthError),

    /// Malformed post request; no provider was contacted.
    #[error("Invalid input: {0}")]
    Validation(String),
}

impl OmnipostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            OmnipostError::Validation(_) => 3,
            OmnipostError::Platform(PlatformError::Authentication(_)) => 2,
            OmnipostError::OAuth(_) => 2,
            OmnipostError::Platform(_) => 1,
            OmnipostError::Asset(_) => 1,
            OmnipostError::Config(_) => 1,
            OmnipostError::Credential(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed credential record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("OS keyring not available: {0}")]
    KeyringUnavailable(String),

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Refusing to follow symlink: {0}")]
    Symlink(String),
}

/// Failure of a single provider call.
///
/// `Display` prefixes the kind so logs stay distinguishable; [`PlatformError::message`]
/// returns the bare text surfaced to the user as the provider's outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Upstream rejected request: {0}")]
    Upstream(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Asset error: {0}")]
    Asset(String),
}

impl PlatformError {
    pub fn message(&self) -> &str {
        match self {
            PlatformError::Authentication(msg)
            | PlatformError::Validation(msg)
            | PlatformError::Upstream(msg)
            | PlatformError::Network(msg)
            | PlatformError::Timeout(msg)
            | PlatformError::Asset(msg) => msg,
        }
    }

    /// Short kind label used as a structured logging field
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformError::Authentication(_) => "authentication",
            PlatformError::Validation(_) => "validation",
            PlatformError::Upstream(_) => "upstream",
            PlatformError::Network(_) => "network",
            PlatformError::Timeout(_) => "timeout",
            PlatformError::Asset(_) => "asset",
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            PlatformError::Timeout(error.to_string())
        } else {
            PlatformError::Network(error.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssetError {
    #[error(
        "Image is {actual} bytes ({} KB) but the limit is {ceiling} bytes ({} KB); compression could not make it fit. Please resize the image manually.",
        .actual / 1024,
        .ceiling / 1024
    )]
    TooLarge { actual: u64, ceiling: u64 },

    #[error("Failed to re-encode image: {0}")]
    Reencode(String),

    #[error("Failed to read image {path}: {message}")]
    Read { path: String, message: String },

    #[error("Unsupported image type: {0}. Supported: jpg, jpeg, png, gif, webp")]
    UnsupportedType(String),

    #[error("Image is {actual} bytes but local images are limited to {limit} bytes")]
    SelectionTooLarge { actual: u64, limit: u64 },
}

impl From<AssetError> for PlatformError {
    fn from(error: AssetError) -> Self {
        PlatformError::Asset(error.to_string())
    }
}

/// The OAuth exchange stopped at `step` with the upstream (or local) message.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} (while {step})")]
pub struct OAuthError {
    pub step: ExchangeStep,
    pub message: String,
}
