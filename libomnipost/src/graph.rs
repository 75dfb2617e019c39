//! Thin client for the versioned Graph-style REST API
//!
//! Shared by the feed provider, the business media provider and the OAuth
//! exchange. Every non-2xx response becomes an error carrying the upstream
//! `error.message` verbatim, or the caller's phase description when the body
//! has none.

use reqwest::multipart::Form;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::GraphConfig;
use crate::credentials::LinkedAccount;
use crate::error::PlatformError;

/// Graph error code for an invalid or expired access token
const INVALID_TOKEN_CODE: i64 = 190;

/// Sub-account fields requested whenever the page list is fetched
pub const LINKED_ACCOUNT_FIELDS: &str = "id,name,access_token,instagram_business_account";

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

/// `{"data": [...]}` list wrapper
#[derive(Debug, Deserialize)]
pub struct DataList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// `{"id": "..."}`, the shape of most create responses
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdResponse {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AccountEntry {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    instagram_business_account: Option<IdResponse>,
}

impl From<AccountEntry> for LinkedAccount {
    fn from(entry: AccountEntry) -> Self {
        LinkedAccount {
            id: entry.id,
            name: entry.name,
            page_token: entry.access_token,
            linked_sub_account_id: entry.instagram_business_account.map(|a| a.id),
        }
    }
}

#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    base_url: String,
}

impl GraphClient {
    /// `base_url` must already include the version segment
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &GraphConfig) -> Self {
        Self::new(config.versioned_base())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        fallback: &str,
    ) -> Result<T, PlatformError> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        read_response(response, fallback).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        fallback: &str,
    ) -> Result<T, PlatformError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        read_response(response, fallback).await
    }

    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: Form,
        fallback: &str,
    ) -> Result<T, PlatformError> {
        let response = self
            .client
            .post(self.url(path))
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        read_response(response, fallback).await
    }

    /// Pages managed by the identity behind `user_token`, in upstream order
    pub async fn fetch_linked_accounts(
        &self,
        user_token: &str,
        fallback: &str,
    ) -> Result<Vec<LinkedAccount>, PlatformError> {
        let list: DataList<AccountEntry> = self
            .get(
                "me/accounts",
                &[("fields", LINKED_ACCOUNT_FIELDS), ("access_token", user_token)],
                fallback,
            )
            .await?;
        Ok(list.data.into_iter().map(LinkedAccount::from).collect())
    }
}

fn transport_error(error: reqwest::Error) -> PlatformError {
    let error = PlatformError::from(error);
    tracing::warn!(kind = error.kind(), "Graph request failed: {}", error.message());
    error
}

async fn read_response<T: DeserializeOwned>(
    response: reqwest::Response,
    fallback: &str,
) -> Result<T, PlatformError> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        let error = upstream_error(&body, fallback);
        tracing::warn!(
            status = status.as_u16(),
            kind = error.kind(),
            "Graph API error: {}",
            error.message()
        );
        return Err(error);
    }

    serde_json::from_str(&body).map_err(|e| {
        tracing::error!("Failed to parse Graph response: {}\nBody: {}", e, body);
        PlatformError::Upstream(format!("{} (unexpected response: {})", fallback, e))
    })
}

/// Map an error body to a `PlatformError`, preferring the upstream message
pub fn upstream_error(body: &str, fallback: &str) -> PlatformError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let message = envelope
                .error
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| fallback.to_string());
            if envelope.error.code == Some(INVALID_TOKEN_CODE) {
                PlatformError::Authentication(message)
            } else {
                PlatformError::Upstream(message)
            }
        }
        Err(_) => PlatformError::Upstream(fallback.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_client(server: &MockServer) -> GraphClient {
        GraphClient::new(format!("{}/v18.0/", server.uri()))
    }

    #[test]
    fn test_upstream_error_prefers_message() {
        let error = upstream_error(
            r#"{"error":{"message":"(#100) Invalid parameter","code":100}}"#,
            "Failed to post to Facebook",
        );
        assert_eq!(error, PlatformError::Upstream("(#100) Invalid parameter".to_string()));
    }

    #[test]
    fn test_upstream_error_falls_back_to_phase() {
        assert_eq!(
            upstream_error("<html>bad gateway</html>", "Failed to create Instagram post"),
            PlatformError::Upstream("Failed to create Instagram post".to_string())
        );
        assert_eq!(
            upstream_error(r#"{"error":{}}"#, "Failed to get pages"),
            PlatformError::Upstream("Failed to get pages".to_string())
        );
    }

    #[test]
    fn test_invalid_token_is_authentication_error() {
        let error = upstream_error(
            r#"{"error":{"message":"Error validating access token","code":190}}"#,
            "x",
        );
        assert!(matches!(error, PlatformError::Authentication(_)));
        assert_eq!(error.message(), "Error validating access token");
    }

    #[tokio::test]
    async fn test_get_sends_query_to_versioned_path() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v18.0/42"))
            .and(query_param("fields", "instagram_business_account"))
            .and(query_param("access_token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "42"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_client(&server);
        let response: IdResponse = client
            .get(
                "/42",
                &[("fields", "instagram_business_account"), ("access_token", "tok")],
                "Failed",
            )
            .await
            .unwrap();

        assert_eq!(response.id, "42");
    }

    #[tokio::test]
    async fn test_post_json_surfaces_upstream_message() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v18.0/1/feed"))
            .and(body_json(serde_json::json!({"message": "hi", "access_token": "p"})))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "(#200) Permissions error", "code": 200}
            })))
            .mount(&server)
            .await;

        let client = make_client(&server);
        let err = client
            .post_json::<_, IdResponse>(
                "1/feed",
                &serde_json::json!({"message": "hi", "access_token": "p"}),
                "Failed to post to Facebook",
            )
            .await
            .unwrap_err();

        assert_eq!(err, PlatformError::Upstream("(#200) Permissions error".to_string()));
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_upstream_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v18.0/me"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"name\":"))
            .mount(&server)
            .await;

        let client = make_client(&server);
        let err = client
            .get::<IdResponse>("me", &[], "Failed to get user info")
            .await
            .unwrap_err();

        assert!(matches!(err, PlatformError::Upstream(ref m) if m.starts_with("Failed to get user info")));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let client = GraphClient::new("http://127.0.0.1:1/v18.0");
        let err = client
            .get::<IdResponse>("me", &[], "Failed")
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Network(_)));
    }

    #[tokio::test]
    async fn test_fetch_linked_accounts_maps_business_account() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v18.0/me/accounts"))
            .and(query_param("fields", LINKED_ACCOUNT_FIELDS))
            .and(query_param("access_token", "user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": "1", "name": "Plain Page", "access_token": "pt-1"},
                    {
                        "id": "2",
                        "name": "Shop",
                        "access_token": "pt-2",
                        "instagram_business_account": {"id": "ig-2"}
                    }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_client(&server);
        let accounts = client
            .fetch_linked_accounts("user-token", "Failed to get pages")
            .await
            .unwrap();

        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].page_token, "pt-1");
        assert_eq!(accounts[0].linked_sub_account_id, None);
        assert_eq!(accounts[1].linked_sub_account_id.as_deref(), Some("ig-2"));
    }
}
