//! Pre-flight checks for post requests
//!
//! [`validate_request`] is the hard gate run by the publisher: blank text or
//! an empty target set aborts the whole publish. [`preflight`] is advisory and
//! reports, per provider, what will fail or needs attention, without
//! contacting anything.

use serde::Serialize;

use crate::credentials::Credentials;
use crate::error::{OmnipostError, Result};
use crate::platforms::instagram::IMAGE_REQUIRED;
use crate::platforms::twitter::MANUAL_IMAGE_NOTE;
use crate::platforms::{ProviderRegistry, NOT_AUTHENTICATED};
use crate::types::{PostRequest, ProviderId};

/// Reject requests no provider should ever see
pub fn validate_request(request: &PostRequest) -> Result<()> {
    if request.text.trim().is_empty() {
        return Err(OmnipostError::Validation("Text cannot be empty".to_string()));
    }
    if request.targets.is_empty() {
        return Err(OmnipostError::Validation("Select at least one platform".to_string()));
    }
    Ok(())
}

/// Advisory result for one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderCheck {
    pub provider: ProviderId,
    /// Whether the provider is expected to accept the post
    pub valid: bool,
    /// Problems that will make this provider fail
    pub errors: Vec<String>,
    /// Non-blocking notes
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    /// Whether every requested provider is expected to succeed
    pub valid: bool,
    pub results: Vec<ProviderCheck>,
}

impl PreflightReport {
    pub fn for_provider(&self, provider: ProviderId) -> Option<&ProviderCheck> {
        self.results.iter().find(|r| r.provider == provider)
    }
}

/// Check `request` against each target's limits and credentials
///
/// Requests that fail [`validate_request`] are returned as that error.
pub fn preflight(
    request: &PostRequest,
    registry: &ProviderRegistry,
    credentials: &Credentials,
) -> Result<PreflightReport> {
    validate_request(request)?;

    let mut results = Vec::new();
    for &id in &request.targets {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let Some(provider) = registry.get(id) else {
            errors.push(format!("{} is not available", id.display_name()));
            results.push(ProviderCheck {
                provider: id,
                valid: false,
                errors,
                warnings,
            });
            continue;
        };

        if !provider.is_authenticated(credentials) {
            errors.push(NOT_AUTHENTICATED.to_string());
        }

        if provider.requires_image() && request.image.is_none() {
            errors.push(IMAGE_REQUIRED.to_string());
        }

        if let Some(limit) = provider.character_limit() {
            let count = request.text.chars().count();
            if count > limit {
                errors.push(format!(
                    "Content exceeds {}'s {} character limit (current: {} characters)",
                    id.display_name(),
                    limit,
                    count
                ));
            }
        }

        if let (Some(ceiling), Some(image)) = (provider.payload_ceiling(), &request.image) {
            if image.size_bytes() > ceiling {
                warnings.push(format!(
                    "Image is {}KB but {} limit is {}KB. Will attempt compression.",
                    image.size_bytes() / 1024,
                    id.display_name(),
                    ceiling / 1024
                ));
            }
        }

        if id == ProviderId::Twitter && request.image.is_some() {
            warnings.push(MANUAL_IMAGE_NOTE.to_string());
        }

        results.push(ProviderCheck {
            provider: id,
            valid: errors.is_empty(),
            errors,
            warnings,
        });
    }

    Ok(PreflightReport {
        valid: results.iter().all(|r| r.valid),
        results,
    })
}
