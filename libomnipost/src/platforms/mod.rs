//! Provider abstraction and implementations
//!
//! Every backend implements [`Provider`]: an authentication check over the
//! shared [`Credentials`] record plus one `publish` call. Providers are looked
//! up by [`ProviderId`] in a [`ProviderRegistry`]; there is no shared base type.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use libomnipost::config::Config;
//! use libomnipost::host::SystemBrowser;
//! use libomnipost::platforms::create_registry;
//! use libomnipost::ProviderId;
//!
//! let registry = create_registry(&Config::default(), Arc::new(SystemBrowser));
//! let bluesky = registry.get(ProviderId::Bluesky).unwrap();
//! assert_eq!(bluesky.payload_ceiling(), Some(976 * 1024));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::credentials::Credentials;
use crate::error::PlatformError;
use crate::graph::GraphClient;
use crate::host::HostShell;
use crate::types::{PostContent, ProviderId, Published};

pub mod bluesky;
pub mod facebook;
pub mod instagram;
pub mod twitter;

// Available outside tests so integration tests and CLI tests can use it
pub mod mock;

/// Failure message for a provider with missing credentials
pub const NOT_AUTHENTICATED: &str = "Not authenticated";

/// Uniform publishing contract over heterogeneous backends
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Whether `credentials` hold every field this provider needs
    fn is_authenticated(&self, credentials: &Credentials) -> bool;

    /// Largest image payload in bytes, if the provider enforces one
    fn payload_ceiling(&self) -> Option<u64> {
        None
    }

    /// Whether caption-only posts are rejected upstream
    fn requires_image(&self) -> bool {
        false
    }

    fn character_limit(&self) -> Option<usize> {
        None
    }

    /// Publish one post
    ///
    /// `content.image` has already been fitted to [`Provider::payload_ceiling`].
    /// Multi-step protocols run their steps strictly in sequence.
    async fn publish(
        &self,
        content: &PostContent,
        credentials: &Credentials,
    ) -> Result<Published, PlatformError>;
}

/// Provider lookup by id
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the provider registered under `provider.id()`
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, id: ProviderId) -> Option<Arc<dyn Provider>> {
        self.providers.get(&id).cloned()
    }

    /// Registered ids in stable order
    pub fn ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<_> = self.providers.keys().copied().collect();
        ids.sort();
        ids
    }
}

/// Registry with the four real providers wired from configuration
pub fn create_registry(config: &Config, shell: Arc<dyn HostShell>) -> ProviderRegistry {
    let graph = GraphClient::from_config(&config.graph);

    ProviderRegistry::new()
        .with(Arc::new(facebook::FacebookProvider::new(graph.clone())))
        .with(Arc::new(instagram::InstagramProvider::new(graph)))
        .with(Arc::new(bluesky::BlueskyProvider::new(&config.bluesky.service)))
        .with(Arc::new(twitter::TwitterProvider::new(
            &config.twitter.intent_url,
            shell,
        )))
}
