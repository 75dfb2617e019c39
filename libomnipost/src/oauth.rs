//! Graph OAuth exchange
//!
//! Turns an authorization code captured from the browser redirect into a
//! long-lived token plus the identity and page list it unlocks:
//!
//! ```text
//! AwaitingCode -> ExchangingShortLived -> ExchangingLongLived
//!              -> FetchingIdentity -> FetchingLinkedAccounts -> Complete
//! ```
//!
//! Any step can fail, which ends the exchange with an [`OAuthError`] naming the
//! step. Intermediate tokens live only inside one [`OAuthExchange::run`] call.

use std::fmt;

use serde::Deserialize;

use crate::config::MetaAppConfig;
use crate::credentials::{CredentialManager, GraphBundle, Identity, LinkedAccount};
use crate::error::{OAuthError, PlatformError, Result};
use crate::graph::GraphClient;

const DIALOG_BASE: &str = "https://www.facebook.com";

/// Permissions requested from the user
pub const SCOPES: &[&str] = &[
    "pages_manage_posts",
    "pages_read_engagement",
    "pages_show_list",
    "instagram_basic",
    "instagram_content_publish",
    "business_management",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStep {
    AwaitingCode,
    ExchangingShortLived,
    ExchangingLongLived,
    FetchingIdentity,
    FetchingLinkedAccounts,
    Complete,
}

impl fmt::Display for ExchangeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExchangeStep::AwaitingCode => "waiting for the authorization code",
            ExchangeStep::ExchangingShortLived => "exchanging the code for a short-lived token",
            ExchangeStep::ExchangingLongLived => "exchanging for a long-lived token",
            ExchangeStep::FetchingIdentity => "fetching the account identity",
            ExchangeStep::FetchingLinkedAccounts => "fetching linked pages",
            ExchangeStep::Complete => "finishing",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Products of one exchange, accumulated step by step and dropped afterwards
#[derive(Debug, Default)]
struct OAuthSession {
    code: String,
    short_lived_token: Option<String>,
    long_lived_token: Option<String>,
    identity: Option<Identity>,
    linked_accounts: Option<Vec<LinkedAccount>>,
}

impl OAuthSession {
    fn into_bundle(self) -> GraphBundle {
        GraphBundle {
            access_token: self.long_lived_token,
            identity: self.identity,
            linked_accounts: self.linked_accounts.unwrap_or_default(),
            pinned_account_id: None,
        }
    }
}

fn failed(step: ExchangeStep, error: PlatformError) -> OAuthError {
    OAuthError {
        step,
        message: error.message().to_string(),
    }
}

pub struct OAuthExchange {
    graph: GraphClient,
    app: MetaAppConfig,
}

impl OAuthExchange {
    pub fn new(graph: GraphClient, app: MetaAppConfig) -> Self {
        Self { graph, app }
    }

    /// Run the whole exchange for `code`
    pub async fn run(&self, code: &str) -> std::result::Result<GraphBundle, OAuthError> {
        self.run_with_progress(code, |_| {}).await
    }

    /// Run the exchange, reporting each step as it is entered
    pub async fn run_with_progress<F>(
        &self,
        code: &str,
        mut on_step: F,
    ) -> std::result::Result<GraphBundle, OAuthError>
    where
        F: FnMut(ExchangeStep),
    {
        let mut session = OAuthSession {
            code: code.trim().to_string(),
            ..Default::default()
        };

        on_step(ExchangeStep::AwaitingCode);
        if session.code.is_empty() {
            return Err(OAuthError {
                step: ExchangeStep::AwaitingCode,
                message: "No authorization code received".to_string(),
            });
        }

        let mut step = ExchangeStep::ExchangingShortLived;
        on_step(step);
        let short: TokenResponse = self
            .graph
            .get(
                "oauth/access_token",
                &[
                    ("client_id", self.app.app_id.as_str()),
                    ("client_secret", self.app.app_secret.as_str()),
                    ("redirect_uri", self.app.redirect_uri.as_str()),
                    ("code", session.code.as_str()),
                ],
                "Failed to get access token",
            )
            .await
            .map_err(|e| failed(step, e))?;
        session.short_lived_token = Some(short.access_token);

        step = ExchangeStep::ExchangingLongLived;
        on_step(step);
        let short_token = session.short_lived_token.as_deref().unwrap_or_default();
        let long: TokenResponse = self
            .graph
            .get(
                "oauth/access_token",
                &[
                    ("grant_type", "fb_exchange_token"),
                    ("client_id", self.app.app_id.as_str()),
                    ("client_secret", self.app.app_secret.as_str()),
                    ("fb_exchange_token", short_token),
                ],
                "Failed to get long-lived token",
            )
            .await
            .map_err(|e| failed(step, e))?;
        session.long_lived_token = Some(long.access_token);
        let long_token = session.long_lived_token.clone().unwrap_or_default();

        step = ExchangeStep::FetchingIdentity;
        on_step(step);
        let identity: Identity = self
            .graph
            .get(
                "me",
                &[("fields", "id,name,email"), ("access_token", long_token.as_str())],
                "Failed to get user info",
            )
            .await
            .map_err(|e| failed(step, e))?;
        session.identity = Some(identity);

        step = ExchangeStep::FetchingLinkedAccounts;
        on_step(step);
        let accounts = self
            .graph
            .fetch_linked_accounts(&long_token, "Failed to get pages")
            .await
            .map_err(|e| failed(step, e))?;
        session.linked_accounts = Some(accounts);

        on_step(ExchangeStep::Complete);
        let bundle = session.into_bundle();
        tracing::info!(
            identity = bundle.identity.as_ref().map(|i| i.id.as_str()).unwrap_or_default(),
            pages = bundle.linked_accounts.len(),
            "Graph OAuth exchange complete"
        );
        Ok(bundle)
    }

    /// Run the exchange and store the result for both Graph providers in one update
    pub async fn connect(&self, code: &str, manager: &CredentialManager) -> Result<GraphBundle> {
        self.connect_with_progress(code, manager, |_| {}).await
    }

    /// [`OAuthExchange::connect`], reporting each step as it is entered
    pub async fn connect_with_progress<F>(
        &self,
        code: &str,
        manager: &CredentialManager,
        on_step: F,
    ) -> Result<GraphBundle>
    where
        F: FnMut(ExchangeStep),
    {
        let bundle = self.run_with_progress(code, on_step).await?;
        let grant = bundle.clone();
        manager.update(move |creds| creds.apply_graph_grant(grant))?;
        Ok(bundle)
    }
}

/// Pull the authorization code out of a captured redirect URL
///
/// A bare code (anything that is not an absolute URL) is returned as-is.
pub fn extract_authorization_code(input: &str) -> std::result::Result<String, OAuthError> {
    let input = input.trim();
    let awaiting = |message: String| OAuthError {
        step: ExchangeStep::AwaitingCode,
        message,
    };

    let url = match url::Url::parse(input) {
        Ok(url) => url,
        Err(_) if !input.is_empty() && !input.contains("://") => return Ok(input.to_string()),
        Err(e) => return Err(awaiting(format!("Invalid redirect URL: {}", e))),
    };

    let mut code = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(awaiting(description.unwrap_or(error)));
    }

    code.filter(|c| !c.trim().is_empty())
        .ok_or_else(|| awaiting("No authorization code in redirect URL".to_string()))
}

/// Login dialog URL the user opens to grant the app access
pub fn authorization_url(app: &MetaAppConfig, api_version: &str, state: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("client_id", &app.app_id)
        .append_pair("redirect_uri", &app.redirect_uri)
        .append_pair("scope", &SCOPES.join(","))
        .append_pair("response_type", "code")
        .append_pair("state", state)
        .finish();
    format!(
        "{}/{}/dialog/oauth?{}",
        DIALOG_BASE,
        api_version.trim_matches('/'),
        query
    )
}
