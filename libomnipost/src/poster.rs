//! Publish orchestration across providers
//!
//! [`Publisher`] validates a [`PostRequest`], then runs every requested
//! provider concurrently. Each provider call is isolated: its errors, a hung
//! connection or an image that cannot be fitted only ever become that
//! provider's [`Outcome::Failure`], never an error from `publish`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Serialize, Serializer};
use tracing::{info, warn, Instrument};

use crate::asset::{self, JpegReencoder, Reencoder};
use crate::config::Config;
use crate::credentials::{CredentialManager, Credentials};
use crate::error::{PlatformError, Result};
use crate::host::HostShell;
use crate::platforms::{create_registry, ProviderRegistry, NOT_AUTHENTICATED};
use crate::types::{Outcome, PostContent, PostRequest, ProviderId};
use crate::validation::validate_request;

/// Outcome of every requested provider, keyed by provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    outcomes: BTreeMap<ProviderId, Outcome>,
    /// Providers whose failure was a missing or rejected credential
    auth_failures: BTreeSet<ProviderId>,
}

impl PublishReport {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, provider: ProviderId, result: std::result::Result<Outcome, PlatformError>) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                if matches!(error, PlatformError::Authentication(_)) {
                    self.auth_failures.insert(provider);
                }
                Outcome::failure(error.message())
            }
        };
        self.outcomes.insert(provider, outcome);
    }

    pub fn get(&self, provider: ProviderId) -> Option<&Outcome> {
        self.outcomes.get(&provider)
    }

    /// Outcomes in provider order
    pub fn outcomes(&self) -> impl Iterator<Item = (ProviderId, &Outcome)> {
        self.outcomes.iter().map(|(id, outcome)| (*id, outcome))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.values().all(Outcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = (ProviderId, &Outcome)> {
        self.outcomes().filter(|(_, outcome)| !outcome.is_success())
    }

    /// Process exit code for this report
    ///
    /// 0 when every provider succeeded, 2 when every failure was an
    /// authentication problem, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        let failed: Vec<ProviderId> = self.failures().map(|(id, _)| id).collect();
        if failed.is_empty() {
            0
        } else if failed.iter().all(|id| self.auth_failures.contains(id)) {
            2
        } else {
            1
        }
    }
}

impl Serialize for PublishReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.outcomes.serialize(serializer)
    }
}

/// Fans one post out to the requested providers
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use libomnipost::host::SystemBrowser;
/// use libomnipost::{Config, PostRequest, ProviderId, Publisher};
///
/// # async fn example() -> libomnipost::Result<()> {
/// let config = Config::load()?;
/// let publisher = Publisher::from_config(&config, Arc::new(SystemBrowser))?;
///
/// let request = PostRequest::new("hello", [ProviderId::Bluesky, ProviderId::Twitter]);
/// let report = publisher.publish(&request).await?;
/// for (provider, outcome) in report.outcomes() {
///     println!("{}: {:?}", provider, outcome);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Publisher {
    registry: ProviderRegistry,
    credentials: Arc<CredentialManager>,
    reencoder: Option<Arc<dyn Reencoder>>,
    timeout: Duration,
}

impl Publisher {
    /// Publisher without a re-encoder and with the default timeout
    pub fn new(registry: ProviderRegistry, credentials: Arc<CredentialManager>) -> Self {
        Self {
            registry,
            credentials,
            reencoder: None,
            timeout: Config::default().publish.timeout(),
        }
    }

    /// Publisher for the four real providers, JPEG re-encoding enabled
    pub fn from_config(config: &Config, shell: Arc<dyn HostShell>) -> Result<Self> {
        let credentials = Arc::new(CredentialManager::from_config(&config.credentials)?);
        Ok(Self::new(create_registry(config, shell), credentials)
            .with_reencoder(Arc::new(JpegReencoder))
            .with_timeout(config.publish.timeout()))
    }

    pub fn with_reencoder(mut self, reencoder: Arc<dyn Reencoder>) -> Self {
        self.reencoder = Some(reencoder);
        self
    }

    /// Upper bound for each provider call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Publish `request` to each of its targets
    ///
    /// Fails only when the request itself is invalid (blank text or no
    /// targets) or the credential record cannot be read. Otherwise the report
    /// holds exactly one outcome per requested provider.
    pub async fn publish(&self, request: &PostRequest) -> Result<PublishReport> {
        validate_request(request)?;

        let credentials = self.credentials.load()?;
        info!(targets = request.targets.len(), "Publishing post");

        let futures = request.targets.iter().map(|&provider| {
            let span = tracing::info_span!("publish", provider = %provider);
            let credentials = &credentials;
            async move {
                let result = self.publish_one(provider, request, credentials).await;
                match &result {
                    Ok(_) => info!("Published"),
                    Err(e) => warn!(kind = e.kind(), "Publish failed: {}", e.message()),
                }
                (provider, result)
            }
            .instrument(span)
        });

        let mut report = PublishReport::new();
        for (provider, result) in join_all(futures).await {
            report.record(provider, result);
        }
        Ok(report)
    }

    async fn publish_one(
        &self,
        provider_id: ProviderId,
        request: &PostRequest,
        credentials: &Credentials,
    ) -> std::result::Result<Outcome, PlatformError> {
        let provider = match self.registry.get(provider_id) {
            Some(provider) if provider.is_authenticated(credentials) => provider,
            _ => return Err(PlatformError::Authentication(NOT_AUTHENTICATED.to_string())),
        };

        // Fitting counts against the same limit as the upload
        let attempt = async {
            let image = match (&request.image, provider.payload_ceiling()) {
                (Some(image), Some(ceiling)) => Some(
                    asset::fit_attachment_blocking(image.clone(), ceiling, self.reencoder.clone())
                        .await?,
                ),
                (image, _) => image.clone(),
            };
            let content = PostContent {
                text: request.text.clone(),
                image,
            };
            provider.publish(&content, credentials).await
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result.map(Outcome::from),
            Err(_) => Err(PlatformError::Timeout(format!(
                "{} did not respond within {:?}",
                provider_id.display_name(),
                self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryStore;
    use crate::error::{AssetError, OmnipostError};
    use crate::platforms::mock::{MockConfig, MockProvider};
    use crate::types::{ImageAttachment, ImageMimeType};

    fn publisher(registry: ProviderRegistry) -> Publisher {
        Publisher::new(
            registry,
            Arc::new(CredentialManager::new(Arc::new(MemoryStore::new()))),
        )
    }

    /// Halves the input on every pass
    struct HalvingReencoder;

    impl Reencoder for HalvingReencoder {
        fn reencode(&self, bytes: &[u8], _quality: u8) -> std::result::Result<Vec<u8>, AssetError> {
            Ok(vec![0; bytes.len() / 2])
        }

        fn output_mime(&self) -> ImageMimeType {
            ImageMimeType::Jpeg
        }
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_both_outcomes() {
        let facebook = Arc::new(MockProvider::success_with_id(ProviderId::Facebook, "p1"));
        let bluesky = Arc::new(MockProvider::with_error(
            ProviderId::Bluesky,
            PlatformError::Network("network error".to_string()),
        ));
        let publisher = publisher(
            ProviderRegistry::new()
                .with(facebook.clone())
                .with(bluesky.clone()),
        );

        let request = PostRequest::new("hello", [ProviderId::Facebook, ProviderId::Bluesky]);
        let report = publisher.publish(&request).await.unwrap();

        assert_eq!(report.len(), 2);
        assert_eq!(
            report.get(ProviderId::Facebook),
            Some(&Outcome::Success {
                id: "p1".to_string(),
                note: None
            })
        );
        assert_eq!(
            report.get(ProviderId::Bluesky),
            Some(&Outcome::failure("network error"))
        );
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_empty_targets_contact_no_provider() {
        let facebook = Arc::new(MockProvider::success(ProviderId::Facebook));
        let publisher = publisher(ProviderRegistry::new().with(facebook.clone()));

        let request = PostRequest::new("hello", Vec::<ProviderId>::new());
        let err = publisher.publish(&request).await.unwrap_err();

        assert!(matches!(err, OmnipostError::Validation(_)));
        assert_eq!(facebook.call_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_text_contacts_no_provider() {
        let facebook = Arc::new(MockProvider::success(ProviderId::Facebook));
        let publisher = publisher(ProviderRegistry::new().with(facebook.clone()));

        let err = publisher
            .publish(&PostRequest::new("  ", [ProviderId::Facebook]))
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 3);
        assert_eq!(facebook.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_provider_is_not_called() {
        let twitter = Arc::new(MockProvider::not_authenticated(ProviderId::Twitter));
        let facebook = Arc::new(MockProvider::success(ProviderId::Facebook));
        let publisher = publisher(
            ProviderRegistry::new()
                .with(twitter.clone())
                .with(facebook.clone()),
        );

        let request = PostRequest::new("hello", [ProviderId::Twitter, ProviderId::Facebook]);
        let report = publisher.publish(&request).await.unwrap();

        assert_eq!(
            report.get(ProviderId::Twitter),
            Some(&Outcome::failure(NOT_AUTHENTICATED))
        );
        assert!(report.get(ProviderId::Facebook).unwrap().is_success());
        assert_eq!(twitter.call_count(), 0);
        assert_eq!(facebook.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_provider_reports_not_authenticated() {
        let publisher = publisher(ProviderRegistry::new());
        let report = publisher
            .publish(&PostRequest::new("hello", [ProviderId::Instagram]))
            .await
            .unwrap();

        assert_eq!(
            report.get(ProviderId::Instagram),
            Some(&Outcome::failure(NOT_AUTHENTICATED))
        );
        assert_eq!(report.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_hung_provider_times_out_alone() {
        let slow = Arc::new(MockProvider::with_delay(
            ProviderId::Bluesky,
            Duration::from_secs(30),
        ));
        let fast = Arc::new(MockProvider::success_with_id(ProviderId::Facebook, "fast"));
        let publisher = publisher(ProviderRegistry::new().with(slow).with(fast))
            .with_timeout(Duration::from_millis(50));

        let request = PostRequest::new("hello", [ProviderId::Bluesky, ProviderId::Facebook]);
        let started = std::time::Instant::now();
        let report = publisher.publish(&request).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        match report.get(ProviderId::Bluesky).unwrap() {
            Outcome::Failure { message } => {
                assert!(message.contains("Bluesky did not respond within"))
            }
            other => panic!("expected timeout failure, got {:?}", other),
        }
        assert!(report.get(ProviderId::Facebook).unwrap().is_success());
    }

    /// Shrinks to nothing, slowly
    struct SlowReencoder;

    impl Reencoder for SlowReencoder {
        fn reencode(&self, _bytes: &[u8], _quality: u8) -> std::result::Result<Vec<u8>, AssetError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Vec::new())
        }

        fn output_mime(&self) -> ImageMimeType {
            ImageMimeType::Jpeg
        }
    }

    #[tokio::test]
    async fn test_slow_fitting_counts_against_timeout() {
        let bluesky = Arc::new(MockProvider::new(MockConfig {
            payload_ceiling: Some(10),
            ..MockConfig::new(ProviderId::Bluesky)
        }));
        let publisher = publisher(ProviderRegistry::new().with(bluesky.clone()))
            .with_reencoder(Arc::new(SlowReencoder))
            .with_timeout(Duration::from_millis(50));

        let image = ImageAttachment::new(vec![0; 100], ImageMimeType::Png);
        let request = PostRequest::new("pic", [ProviderId::Bluesky]).with_image(image);
        let started = std::time::Instant::now();
        let report = publisher.publish(&request).await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(400));
        match report.get(ProviderId::Bluesky).unwrap() {
            Outcome::Failure { message } => {
                assert!(message.contains("Bluesky did not respond within"))
            }
            other => panic!("expected timeout failure, got {:?}", other),
        }
        assert_eq!(bluesky.call_count(), 0);
    }

    #[tokio::test]
    async fn test_providers_run_concurrently() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(MockProvider::with_delay(
                ProviderId::Facebook,
                Duration::from_millis(300),
            )))
            .with(Arc::new(MockProvider::with_delay(
                ProviderId::Bluesky,
                Duration::from_millis(300),
            )))
            .with(Arc::new(MockProvider::with_delay(
                ProviderId::Twitter,
                Duration::from_millis(300),
            )));
        let publisher = publisher(registry);

        let request = PostRequest::new(
            "hello",
            [ProviderId::Facebook, ProviderId::Bluesky, ProviderId::Twitter],
        );
        let started = std::time::Instant::now();
        let report = publisher.publish(&request).await.unwrap();

        assert!(report.all_succeeded());
        assert!(
            started.elapsed() < Duration::from_millis(800),
            "providers ran sequentially: {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_image_fitted_only_for_providers_with_ceiling() {
        let bluesky = Arc::new(MockProvider::new(MockConfig {
            payload_ceiling: Some(1000),
            ..MockConfig::new(ProviderId::Bluesky)
        }));
        let facebook = Arc::new(MockProvider::success(ProviderId::Facebook));
        let publisher = publisher(
            ProviderRegistry::new()
                .with(bluesky.clone())
                .with(facebook.clone()),
        )
        .with_reencoder(Arc::new(HalvingReencoder));

        let image = ImageAttachment::new(vec![7; 1500], ImageMimeType::Png);
        let request = PostRequest::new("pic", [ProviderId::Bluesky, ProviderId::Facebook])
            .with_image(image);
        publisher.publish(&request).await.unwrap();

        let fitted = bluesky.received()[0].image.clone().unwrap();
        assert_eq!(fitted.size_bytes(), 750);
        assert_eq!(fitted.mime_type, ImageMimeType::Jpeg);

        let untouched = facebook.received()[0].image.clone().unwrap();
        assert_eq!(untouched.size_bytes(), 1500);
        assert_eq!(untouched.mime_type, ImageMimeType::Png);
    }

    #[tokio::test]
    async fn test_unfittable_image_fails_that_provider_only() {
        let bluesky = Arc::new(MockProvider::new(MockConfig {
            payload_ceiling: Some(10),
            ..MockConfig::new(ProviderId::Bluesky)
        }));
        let twitter = Arc::new(MockProvider::success(ProviderId::Twitter));
        let publisher = publisher(
            ProviderRegistry::new()
                .with(bluesky.clone())
                .with(twitter.clone()),
        );

        let image = ImageAttachment::new(vec![0; 100], ImageMimeType::Png);
        let request =
            PostRequest::new("pic", [ProviderId::Bluesky, ProviderId::Twitter]).with_image(image);
        let report = publisher.publish(&request).await.unwrap();

        match report.get(ProviderId::Bluesky).unwrap() {
            Outcome::Failure { message } => {
                assert!(message.contains("100 bytes"));
                assert!(message.contains("resize the image manually"));
            }
            other => panic!("expected asset failure, got {:?}", other),
        }
        assert_eq!(bluesky.call_count(), 0);
        assert!(report.get(ProviderId::Twitter).unwrap().is_success());
    }

    #[tokio::test]
    async fn test_exit_code_all_auth_failures() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(MockProvider::with_error(
                ProviderId::Bluesky,
                PlatformError::Authentication("Invalid identifier or password".to_string()),
            )))
            .with(Arc::new(MockProvider::not_authenticated(ProviderId::Facebook)));
        let report = publisher(registry)
            .publish(&PostRequest::new(
                "hello",
                [ProviderId::Bluesky, ProviderId::Facebook],
            ))
            .await
            .unwrap();

        assert!(!report.all_succeeded());
        assert_eq!(report.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_report_serializes_as_provider_map() {
        let publisher = publisher(
            ProviderRegistry::new()
                .with(Arc::new(MockProvider::success_with_id(ProviderId::Facebook, "p1")))
                .with(Arc::new(MockProvider::failure(ProviderId::Bluesky, "rejected"))),
        );
        let report = publisher
            .publish(&PostRequest::new(
                "hello",
                [ProviderId::Facebook, ProviderId::Bluesky],
            ))
            .await
            .unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["facebook"]["success"], true);
        assert_eq!(json["facebook"]["id"], "p1");
        assert_eq!(json["bluesky"]["error"], "rejected");
    }
}
