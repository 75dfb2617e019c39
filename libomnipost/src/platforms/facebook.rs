//! Graph page feed provider
//!
//! Posts as a managed page using that page's own token. Text goes to the
//! page's `feed` edge; a post with an image goes to its `photos` edge with the
//! text as caption.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::credentials::{Credentials, GraphBundle, LinkedAccount};
use crate::error::PlatformError;
use crate::graph::{GraphClient, IdResponse};
use crate::platforms::{Provider, NOT_AUTHENTICATED};
use crate::types::{ImageAttachment, PostContent, ProviderId, Published};

/// Reply from the `photos` edge
///
/// `id` names the photo object; the page post that carries it is `post_id`.
#[derive(Debug, Deserialize)]
struct PhotoResponse {
    id: String,
    #[serde(default)]
    post_id: Option<String>,
}

impl PhotoResponse {
    fn into_post_id(self) -> String {
        self.post_id.unwrap_or(self.id)
    }
}

pub struct FacebookProvider {
    graph: GraphClient,
}

impl FacebookProvider {
    pub fn new(graph: GraphClient) -> Self {
        Self { graph }
    }

    /// Page to publish as: the pinned one, else the first page the identity manages
    async fn select_page(
        &self,
        bundle: &GraphBundle,
        user_token: &str,
    ) -> Result<LinkedAccount, PlatformError> {
        if let Some(pinned) = bundle.pinned_account_id.as_deref() {
            // A pinned page without a stored page token is posted to with the user token
            return Ok(bundle
                .linked_account(pinned)
                .cloned()
                .unwrap_or_else(|| LinkedAccount {
                    id: pinned.to_string(),
                    page_token: user_token.to_string(),
                    ..Default::default()
                }));
        }

        let pages = self
            .graph
            .fetch_linked_accounts(user_token, "Failed to fetch pages")
            .await?;
        pages
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::Upstream("No pages found".to_string()))
    }

    async fn post_text(
        &self,
        page: &LinkedAccount,
        text: &str,
    ) -> Result<IdResponse, PlatformError> {
        self.graph
            .post_json(
                &format!("{}/feed", page.id),
                &serde_json::json!({
                    "message": text,
                    "access_token": page.page_token,
                }),
                "Failed to post to Facebook",
            )
            .await
    }

    async fn post_photo(
        &self,
        page: &LinkedAccount,
        text: &str,
        image: &ImageAttachment,
    ) -> Result<PhotoResponse, PlatformError> {
        let part = Part::bytes(image.bytes.clone())
            .file_name(image.name.clone())
            .mime_str(image.mime_type.as_str())
            .map_err(|e| PlatformError::Asset(e.to_string()))?;
        let form = Form::new()
            .text("message", text.to_string())
            .text("access_token", page.page_token.clone())
            .part("source", part);

        self.graph
            .post_multipart(
                &format!("{}/photos", page.id),
                form,
                "Failed to post to Facebook",
            )
            .await
    }
}

#[async_trait]
impl Provider for FacebookProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Facebook
    }

    fn is_authenticated(&self, credentials: &Credentials) -> bool {
        credentials
            .facebook
            .as_ref()
            .and_then(|b| b.token())
            .is_some()
    }

    async fn publish(
        &self,
        content: &PostContent,
        credentials: &Credentials,
    ) -> Result<Published, PlatformError> {
        let bundle = credentials
            .facebook
            .as_ref()
            .ok_or_else(|| PlatformError::Authentication(NOT_AUTHENTICATED.to_string()))?;
        let user_token = bundle
            .token()
            .ok_or_else(|| PlatformError::Authentication(NOT_AUTHENTICATED.to_string()))?;

        let page = self.select_page(bundle, user_token).await?;
        tracing::debug!(page = %page.id, "Publishing to page");

        let post_id = match &content.image {
            Some(image) => self
                .post_photo(&page, &content.text, image)
                .await?
                .into_post_id(),
            None => self.post_text(&page, &content.text).await?.id,
        };

        tracing::info!(post_id = %post_id, "Posted to Facebook");
        Ok(Published::new(post_id))
    }
}
