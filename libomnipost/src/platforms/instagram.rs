//! Graph business media provider
//!
//! Publishing is two-phase: create a media container on the business account,
//! then publish that container. Both calls use the user token. A container
//! that was created but failed to publish is left in place upstream.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::credentials::{Credentials, GraphBundle};
use crate::error::PlatformError;
use crate::graph::{GraphClient, IdResponse};
use crate::platforms::{Provider, NOT_AUTHENTICATED};
use crate::types::{ImageAttachment, PostContent, ProviderId, Published};

pub const IMAGE_REQUIRED: &str = "Instagram requires an image to be attached";

const NO_BUSINESS_ACCOUNT: &str = "No Instagram Business account found";

#[derive(Debug, Deserialize)]
struct PageBusinessAccount {
    #[serde(default)]
    instagram_business_account: Option<IdResponse>,
}

pub struct InstagramProvider {
    graph: GraphClient,
}

impl InstagramProvider {
    pub fn new(graph: GraphClient) -> Self {
        Self { graph }
    }

    /// Business account behind the pinned page, or the first page that has one
    async fn resolve_business_account(
        &self,
        bundle: &GraphBundle,
        user_token: &str,
    ) -> Result<String, PlatformError> {
        let found = match bundle.pinned_account_id.as_deref() {
            Some(pinned) => match bundle
                .linked_account(pinned)
                .and_then(|a| a.linked_sub_account_id.clone())
            {
                Some(id) => Some(id),
                None => {
                    let page: PageBusinessAccount = self
                        .graph
                        .get(
                            pinned,
                            &[
                                ("fields", "instagram_business_account"),
                                ("access_token", user_token),
                            ],
                            "Failed to get page info",
                        )
                        .await?;
                    page.instagram_business_account.map(|a| a.id)
                }
            },
            None => self
                .graph
                .fetch_linked_accounts(user_token, "Failed to get pages")
                .await?
                .into_iter()
                .find_map(|a| a.linked_sub_account_id),
        };

        found
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| PlatformError::Upstream(NO_BUSINESS_ACCOUNT.to_string()))
    }

    /// Phase one: container with the caption and the media
    async fn create_container(
        &self,
        account_id: &str,
        caption: &str,
        image: &ImageAttachment,
        user_token: &str,
    ) -> Result<String, PlatformError> {
        let path = format!("{}/media", account_id);
        let fallback = "Failed to create Instagram post";

        let created: IdResponse = match image.public_url.as_deref() {
            Some(image_url) => {
                self.graph
                    .post_json(
                        &path,
                        &serde_json::json!({
                            "image_url": image_url,
                            "caption": caption,
                            "access_token": user_token,
                        }),
                        fallback,
                    )
                    .await?
            }
            None => {
                let part = Part::bytes(image.bytes.clone())
                    .file_name(image.name.clone())
                    .mime_str(image.mime_type.as_str())
                    .map_err(|e| PlatformError::Asset(e.to_string()))?;
                let form = Form::new()
                    .text("caption", caption.to_string())
                    .text("access_token", user_token.to_string())
                    .part("source", part);
                self.graph.post_multipart(&path, form, fallback).await?
            }
        };

        Ok(created.id)
    }

    /// Phase two: publish the container
    async fn publish_container(
        &self,
        account_id: &str,
        creation_id: &str,
        user_token: &str,
    ) -> Result<String, PlatformError> {
        let published: IdResponse = self
            .graph
            .post_json(
                &format!("{}/media_publish", account_id),
                &serde_json::json!({
                    "creation_id": creation_id,
                    "access_token": user_token,
                }),
                "Failed to publish Instagram post",
            )
            .await?;
        Ok(published.id)
    }
}

#[async_trait]
impl Provider for InstagramProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Instagram
    }

    fn is_authenticated(&self, credentials: &Credentials) -> bool {
        credentials
            .instagram
            .as_ref()
            .and_then(|b| b.token())
            .is_some()
    }

    fn requires_image(&self) -> bool {
        true
    }

    async fn publish(
        &self,
        content: &PostContent,
        credentials: &Credentials,
    ) -> Result<Published, PlatformError> {
        let image = content
            .image
            .as_ref()
            .ok_or_else(|| PlatformError::Validation(IMAGE_REQUIRED.to_string()))?;

        let bundle = credentials
            .instagram
            .as_ref()
            .ok_or_else(|| PlatformError::Authentication(NOT_AUTHENTICATED.to_string()))?;
        let user_token = bundle
            .token()
            .ok_or_else(|| PlatformError::Authentication(NOT_AUTHENTICATED.to_string()))?;

        let account_id = self.resolve_business_account(bundle, user_token).await?;

        let creation_id = self
            .create_container(&account_id, &content.text, image, user_token)
            .await?;
        tracing::debug!(account = %account_id, creation_id = %creation_id, "Media container created");

        let post_id = self
            .publish_container(&account_id, &creation_id, user_token)
            .await
            .map_err(|e| {
                tracing::warn!(
                    creation_id = %creation_id,
                    "Container created but not published; it is left in place"
                );
                e
            })?;

        tracing::info!(post_id = %post_id, "Posted to Instagram");
        Ok(Published::new(post_id))
    }
}
