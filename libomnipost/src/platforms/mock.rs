//! Mock provider for testing
//!
//! Configurable provider that can succeed, fail with any [`PlatformError`],
//! hang for a while, or report itself unauthenticated. Call counters are
//! shared through `Arc`, so clones of a [`MockConfig`] observe the same calls.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::credentials::Credentials;
use crate::error::PlatformError;
use crate::platforms::Provider;
use crate::types::{PostContent, ProviderId, Published};

/// Configuration for mock provider behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Registry slot this mock occupies
    pub id: ProviderId,

    /// Result of `is_authenticated`, regardless of credentials
    pub authenticated: bool,

    /// Post id returned on success; a random one when `None`
    pub post_id: Option<String>,

    /// Error to return instead of succeeding
    pub error: Option<PlatformError>,

    /// Delay before completing (simulates network latency or a hung call)
    pub delay: Duration,

    pub payload_ceiling: Option<u64>,

    pub requires_image: bool,

    /// Number of times publish has been called
    pub call_count: Arc<Mutex<usize>>,

    /// Content received by publish (for verification)
    pub received: Arc<Mutex<Vec<PostContent>>>,
}

impl MockConfig {
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            authenticated: true,
            post_id: None,
            error: None,
            delay: Duration::from_millis(0),
            payload_ceiling: None,
            requires_image: false,
            call_count: Arc::new(Mutex::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

pub struct MockProvider {
    config: MockConfig,
}

impl MockProvider {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Always succeeds with a generated id
    pub fn success(id: ProviderId) -> Self {
        Self::new(MockConfig::new(id))
    }

    /// Always succeeds with `post_id`
    pub fn success_with_id(id: ProviderId, post_id: &str) -> Self {
        Self::new(MockConfig {
            post_id: Some(post_id.to_string()),
            ..MockConfig::new(id)
        })
    }

    /// Always fails with an upstream rejection carrying `message`
    pub fn failure(id: ProviderId, message: &str) -> Self {
        Self::with_error(id, PlatformError::Upstream(message.to_string()))
    }

    pub fn with_error(id: ProviderId, error: PlatformError) -> Self {
        Self::new(MockConfig {
            error: Some(error),
            ..MockConfig::new(id)
        })
    }

    pub fn with_delay(id: ProviderId, delay: Duration) -> Self {
        Self::new(MockConfig {
            delay,
            ..MockConfig::new(id)
        })
    }

    pub fn not_authenticated(id: ProviderId) -> Self {
        Self::new(MockConfig {
            authenticated: false,
            ..MockConfig::new(id)
        })
    }

    pub fn call_count(&self) -> usize {
        *self.config.call_count.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn received(&self) -> Vec<PostContent> {
        self.config
            .received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> ProviderId {
        self.config.id
    }

    fn is_authenticated(&self, _credentials: &Credentials) -> bool {
        self.config.authenticated
    }

    fn payload_ceiling(&self) -> Option<u64> {
        self.config.payload_ceiling
    }

    fn requires_image(&self) -> bool {
        self.config.requires_image
    }

    async fn publish(
        &self,
        content: &PostContent,
        _credentials: &Credentials,
    ) -> Result<Published, PlatformError> {
        *self.config.call_count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        self.config
            .received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(content.clone());

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if let Some(error) = &self.config.error {
            return Err(error.clone());
        }

        let post_id = self
            .config
            .post_id
            .clone()
            .unwrap_or_else(|| format!("{}:mock-{}", self.config.id, uuid::Uuid::new_v4()));
        Ok(Published::new(post_id))
    }
}
