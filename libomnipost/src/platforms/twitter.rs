//! Compose-intent provider
//!
//! Nothing is posted through an API. The outgoing text is merged into an
//! intent URL which the host opens in the user's browser, where the user
//! finishes the post.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::credentials::Credentials;
use crate::error::PlatformError;
use crate::host::HostShell;
use crate::platforms::Provider;
use crate::types::{PostContent, ProviderId, Published};

pub const MANUAL_IMAGE_NOTE: &str = "Twitter/X requires manual image attachment in browser";

pub struct TwitterProvider {
    default_template: String,
    shell: Arc<dyn HostShell>,
}

impl TwitterProvider {
    /// `default_template` is used when no template is stored with the credentials
    pub fn new(default_template: &str, shell: Arc<dyn HostShell>) -> Self {
        Self {
            default_template: default_template.to_string(),
            shell,
        }
    }

    fn stored_template<'a>(&self, credentials: &'a Credentials) -> Option<&'a str> {
        credentials
            .twitter
            .as_ref()
            .map(|b| b.template_url.trim())
            .filter(|t| !t.is_empty())
    }

    /// Intent URL for `text`, plus a note when the stored template was unusable
    fn intent_url(
        &self,
        credentials: &Credentials,
        text: &str,
    ) -> Result<(String, Option<String>), PlatformError> {
        if let Some(template) = self.stored_template(credentials) {
            match build_intent_url(template, text) {
                Ok(url) => return Ok((url, None)),
                Err(e) => {
                    tracing::warn!("Stored template unusable, using default: {}", e.message());
                    let note = format!("{}; used the default intent URL", e.message());
                    return Ok((build_intent_url(&self.default_template, text)?, Some(note)));
                }
            }
        }
        Ok((build_intent_url(&self.default_template, text)?, None))
    }
}

/// Merge `text` into `template`, keeping every other query parameter
///
/// An existing `text` parameter is replaced.
pub fn build_intent_url(template: &str, text: &str) -> Result<String, PlatformError> {
    let mut url = Url::parse(template)
        .map_err(|e| PlatformError::Validation(format!("Invalid intent URL '{}': {}", template, e)))?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "text")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("text", text);

    Ok(url.to_string())
}

#[async_trait]
impl Provider for TwitterProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Twitter
    }

    /// A default intent URL is always configured, so there is nothing to be missing
    fn is_authenticated(&self, _credentials: &Credentials) -> bool {
        true
    }

    async fn publish(
        &self,
        content: &PostContent,
        credentials: &Credentials,
    ) -> Result<Published, PlatformError> {
        let (url, template_note) = self.intent_url(credentials, &content.text)?;

        let mut notes: Vec<String> = template_note.into_iter().collect();
        if content.image.is_some() {
            notes.push(MANUAL_IMAGE_NOTE.to_string());
        }
        if let Err(e) = self.shell.open_external_url(&url) {
            tracing::warn!("Failed to open browser: {}", e);
            notes.push(format!("Open this URL to finish the post: {}", url));
        }

        tracing::info!(url = %url, "Opened compose intent");
        let published = Published::new(url);
        Ok(if notes.is_empty() {
            published
        } else {
            published.with_note(notes.join(". "))
        })
    }
}
