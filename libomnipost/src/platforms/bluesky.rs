//! Bluesky provider over raw XRPC
//!
//! Each publish logs in with the stored handle and app password, uploads the
//! image as a blob when there is one, and creates an `app.bsky.feed.post`
//! record. Sessions are not cached between publishes.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::asset::BLUESKY_CEILING;
use crate::credentials::{BlueskyBundle, Credentials};
use crate::error::{AssetError, PlatformError};
use crate::platforms::{Provider, NOT_AUTHENTICATED};
use crate::types::{ImageAttachment, PostContent, ProviderId, Published};

pub const CHARACTER_LIMIT: usize = 300;

const ALT_TEXT_LIMIT: usize = 100;

const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Zero-width and bidirectional control characters that break handle resolution
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{2069}'
            | '\u{FEFF}'
    )
}

/// Normalize a user-typed handle: drop invisible characters, a leading `@`, and
/// surrounding whitespace
pub fn sanitize_handle(raw: &str) -> String {
    let visible: String = raw.chars().filter(|c| !is_invisible(*c)).collect();
    let trimmed = visible.trim();
    trimmed
        .strip_prefix('@')
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Logged-in XRPC session
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_jwt: String,
    pub did: String,
    #[serde(default)]
    pub handle: String,
}

#[derive(Debug, Deserialize)]
struct XrpcError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadBlobResponse {
    blob: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    uri: String,
}

/// Map a failed XRPC response to a `PlatformError`
///
/// The upstream `message` (or error code) is kept verbatim; `context` is only
/// used when the body carries neither.
fn map_xrpc_error(status: StatusCode, body: &str, context: &str) -> PlatformError {
    let parsed = serde_json::from_str::<XrpcError>(body).ok();
    let detail = parsed
        .as_ref()
        .and_then(|e| e.message.clone().or_else(|| e.error.clone()))
        .filter(|m| !m.trim().is_empty());
    let code = parsed.and_then(|e| e.error).unwrap_or_default();

    let message = detail.unwrap_or_else(|| format!("{} (status {})", context, status.as_u16()));

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || code == "AuthenticationRequired"
        || code == "ExpiredToken"
        || code == "InvalidToken"
    {
        return PlatformError::Authentication(message);
    }

    PlatformError::Upstream(message)
}

fn transport_error(error: reqwest::Error) -> PlatformError {
    let error = PlatformError::from(error);
    tracing::warn!(kind = error.kind(), "Bluesky request failed: {}", error.message());
    error
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

pub struct BlueskyProvider {
    client: Client,
    service: String,
}

impl BlueskyProvider {
    /// `service` is the PDS base URL, e.g. `https://bsky.social`
    pub fn new(service: &str) -> Self {
        Self {
            client: Client::new(),
            service: service.trim_end_matches('/').to_string(),
        }
    }

    fn xrpc_url(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.service, method)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
    ) -> Result<T, PlatformError> {
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            let error = map_xrpc_error(status, &body, context);
            tracing::warn!(
                status = status.as_u16(),
                kind = error.kind(),
                "Bluesky API error: {}",
                error.message()
            );
            return Err(error);
        }
        serde_json::from_str(&body).map_err(|e| {
            tracing::error!("Failed to parse Bluesky response: {}\nBody: {}", e, body);
            PlatformError::Upstream(format!("{} (unexpected response: {})", context, e))
        })
    }

    /// Log in with a sanitized handle and the raw app password
    pub async fn create_session(&self, bundle: &BlueskyBundle) -> Result<Session, PlatformError> {
        let identifier = sanitize_handle(&bundle.handle);
        tracing::debug!("Creating Bluesky session for handle: {}", identifier);

        let response = self
            .client
            .post(self.xrpc_url("com.atproto.server.createSession"))
            .json(&serde_json::json!({
                "identifier": identifier,
                "password": bundle.app_secret,
            }))
            .send()
            .await
            .map_err(transport_error)?;

        Self::read_json::<Session>(response, "Failed to authenticate with Bluesky")
            .await
            .map_err(|e| match e {
                PlatformError::Upstream(msg) | PlatformError::Authentication(msg) => {
                    PlatformError::Authentication(format!(
                        "Failed to authenticate with Bluesky: {}",
                        msg
                    ))
                }
                other => other,
            })
    }

    /// Check stored credentials by logging in, without posting
    pub async fn verify(&self, bundle: &BlueskyBundle) -> Result<Session, PlatformError> {
        if !bundle.is_complete() {
            return Err(PlatformError::Authentication(NOT_AUTHENTICATED.to_string()));
        }
        self.create_session(bundle).await
    }

    async fn upload_blob(
        &self,
        session: &Session,
        image: &ImageAttachment,
    ) -> Result<serde_json::Value, PlatformError> {
        if image.size_bytes() > BLUESKY_CEILING {
            return Err(AssetError::TooLarge {
                actual: image.size_bytes(),
                ceiling: BLUESKY_CEILING,
            }
            .into());
        }

        let response = self
            .client
            .post(self.xrpc_url("com.atproto.repo.uploadBlob"))
            .bearer_auth(&session.access_jwt)
            .header(reqwest::header::CONTENT_TYPE, image.mime_type.as_str())
            .body(image.bytes.clone())
            .send()
            .await
            .map_err(transport_error)?;

        let uploaded: UploadBlobResponse =
            Self::read_json(response, "Failed to upload image to Bluesky").await?;
        Ok(uploaded.blob)
    }

    async fn create_post(
        &self,
        session: &Session,
        text: &str,
        blob: Option<serde_json::Value>,
    ) -> Result<String, PlatformError> {
        let mut record = serde_json::json!({
            "$type": POST_COLLECTION,
            "text": text,
            "createdAt": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        if let Some(blob) = blob {
            record["embed"] = serde_json::json!({
                "$type": "app.bsky.embed.images",
                "images": [{
                    "alt": truncate_chars(text, ALT_TEXT_LIMIT),
                    "image": blob,
                }],
            });
        }

        let response = self
            .client
            .post(self.xrpc_url("com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&serde_json::json!({
                "repo": session.did,
                "collection": POST_COLLECTION,
                "record": record,
            }))
            .send()
            .await
            .map_err(transport_error)?;

        let created: CreateRecordResponse =
            Self::read_json(response, "Failed to create Bluesky post").await?;
        Ok(created.uri)
    }
}

#[async_trait]
impl Provider for BlueskyProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Bluesky
    }

    fn is_authenticated(&self, credentials: &Credentials) -> bool {
        credentials
            .bluesky
            .as_ref()
            .map(|b| b.is_complete())
            .unwrap_or(false)
    }

    fn payload_ceiling(&self) -> Option<u64> {
        Some(BLUESKY_CEILING)
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    async fn publish(
        &self,
        content: &PostContent,
        credentials: &Credentials,
    ) -> Result<Published, PlatformError> {
        let bundle = credentials
            .bluesky
            .as_ref()
            .filter(|b| b.is_complete())
            .ok_or_else(|| PlatformError::Authentication(NOT_AUTHENTICATED.to_string()))?;

        let session = self.create_session(bundle).await?;
        tracing::debug!(did = %session.did, "Bluesky session created");

        let blob = match &content.image {
            Some(image) => Some(self.upload_blob(&session, image).await?),
            None => None,
        };

        let uri = self.create_post(&session, &content.text, blob).await?;
        tracing::info!(uri = %uri, "Posted to Bluesky");
        Ok(Published::new(uri))
    }
}
