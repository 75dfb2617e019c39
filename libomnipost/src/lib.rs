//! Omnipost - compose once, publish everywhere
//!
//! This library fans a single post (text plus an optional image) out to
//! several structurally different social backends: two Graph-API services,
//! a decentralized network with its own session and blob model, and a
//! browser "compose intent" redirect.

pub mod asset;
pub mod config;
pub mod credentials;
pub mod error;
pub mod graph;
pub mod host;
pub mod logging;
pub mod oauth;
pub mod platforms;
pub mod poster;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{CredentialManager, CredentialStore, Credentials};
pub use error::{OmnipostError, Result};
pub use poster::{PublishReport, Publisher};
pub use types::{ImageAttachment, ImageMimeType, Outcome, PostRequest, ProviderId};
