//! End-to-end publish tests against stubbed upstream APIs
//!
//! One wiremock server stands in for both the Graph API (under `/v18.0`) and
//! the Bluesky PDS (under `/xrpc`); credentials live in a file store inside a
//! temp directory, exactly as the binaries use them.

use std::sync::Arc;

use libomnipost::config::Config;
use libomnipost::credentials::{BlueskyBundle, CredentialManager, GraphBundle, RedirectBundle};
use libomnipost::graph::GraphClient;
use libomnipost::host::RecordingShell;
use libomnipost::oauth::OAuthExchange;
use libomnipost::platforms::instagram::IMAGE_REQUIRED;
use libomnipost::{Outcome, PostRequest, ProviderId, Publisher};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.graph.base_url = server.uri();
    config.bluesky.service = server.uri();
    config.credentials.path = temp
        .path()
        .join("credentials.json")
        .to_string_lossy()
        .to_string();
    config.meta_app.app_id = "app-1".to_string();
    config.meta_app.app_secret = "secret-1".to_string();
    config
}

fn manager(config: &Config) -> CredentialManager {
    CredentialManager::from_config(&config.credentials).unwrap()
}

async fn mount_pages(server: &MockServer, token: &str) {
    Mock::given(method("GET"))
        .and(path("/v18.0/me/accounts"))
        .and(query_param("access_token", token))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{
                "id": "page-1",
                "name": "Demo Page",
                "access_token": "page-token",
                "instagram_business_account": {"id": "ig-1"}
            }]
        })))
        .mount(server)
        .await;
}

async fn mount_feed(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v18.0/page-1/feed"))
        .and(body_partial_json(serde_json::json!({
            "message": "hello everyone",
            "access_token": "page-token"
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "page-1_42"})),
        )
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_bluesky(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.createSession"))
        .and(body_partial_json(serde_json::json!({
            "identifier": "example.bsky.social",
            "password": "app-pass"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessJwt": "jwt",
            "refreshJwt": "refresh",
            "did": "did:plc:abc",
            "handle": "example.bsky.social"
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.repo.createRecord"))
        .and(body_partial_json(serde_json::json!({
            "repo": "did:plc:abc",
            "record": {"text": "hello everyone"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "uri": "at://did:plc:abc/app.bsky.feed.post/1",
            "cid": "bafy"
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_publish_to_every_provider() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let config = config_for(&server, &temp);

    let graph = GraphBundle {
        access_token: Some("user-token".to_string()),
        ..Default::default()
    };
    manager(&config)
        .update(|creds| {
            creds.apply_graph_grant(graph);
            creds.bluesky = Some(BlueskyBundle {
                handle: " @example\u{200B}.bsky.social ".to_string(),
                app_secret: "app-pass".to_string(),
            });
            creds.twitter = Some(RedirectBundle {
                template_url: "https://x.example/intent?hashtags=demo".to_string(),
            });
        })
        .unwrap();

    mount_pages(&server, "user-token").await;
    mount_feed(&server).await;
    mount_bluesky(&server).await;
    Mock::given(method("POST"))
        .and(path("/v18.0/ig-1/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "c"})))
        .expect(0)
        .mount(&server)
        .await;

    let shell = Arc::new(RecordingShell::new());
    let publisher = Publisher::from_config(&config, shell.clone()).unwrap();
    let request = PostRequest::new("hello everyone", ProviderId::ALL);
    let report = publisher.publish(&request).await.unwrap();

    assert_eq!(report.len(), 4);
    assert_eq!(
        report.get(ProviderId::Facebook),
        Some(&Outcome::Success {
            id: "page-1_42".to_string(),
            note: None
        })
    );
    assert_eq!(
        report.get(ProviderId::Bluesky),
        Some(&Outcome::Success {
            id: "at://did:plc:abc/app.bsky.feed.post/1".to_string(),
            note: None
        })
    );
    assert_eq!(
        report.get(ProviderId::Instagram),
        Some(&Outcome::failure(IMAGE_REQUIRED))
    );

    let opened = shell.opened();
    assert_eq!(opened.len(), 1);
    assert!(opened[0].contains("hashtags=demo"));
    assert!(opened[0].contains("text=hello+everyone"));
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_missing_credentials_fail_per_provider() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let config = config_for(&server, &temp);

    let shell = Arc::new(RecordingShell::new());
    let publisher = Publisher::from_config(&config, shell.clone()).unwrap();
    let request = PostRequest::new(
        "hello",
        [ProviderId::Facebook, ProviderId::Bluesky, ProviderId::Twitter],
    );
    let report = publisher.publish(&request).await.unwrap();

    assert_eq!(
        report.get(ProviderId::Facebook),
        Some(&Outcome::failure("Not authenticated"))
    );
    assert_eq!(
        report.get(ProviderId::Bluesky),
        Some(&Outcome::failure("Not authenticated"))
    );
    // The intent provider needs no stored secret and uses the configured default
    assert!(report.get(ProviderId::Twitter).unwrap().is_success());
    assert!(shell.opened()[0].starts_with("https://twitter.com/intent/tweet?text=hello"));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_connect_then_publish_uses_exchanged_token() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let config = config_for(&server, &temp);

    Mock::given(method("GET"))
        .and(path("/v18.0/oauth/access_token"))
        .and(query_param("code", "the-code"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "short"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v18.0/oauth/access_token"))
        .and(query_param("grant_type", "fb_exchange_token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "long"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v18.0/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "u-1",
            "name": "Pat"
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_pages(&server, "long").await;
    mount_feed(&server).await;

    let credentials = manager(&config);
    let exchange = OAuthExchange::new(
        GraphClient::from_config(&config.graph),
        config.meta_app.clone(),
    );
    let bundle = exchange.connect("the-code", &credentials).await.unwrap();
    assert_eq!(bundle.token(), Some("long"));

    let stored = credentials.load().unwrap();
    assert_eq!(stored.facebook, stored.instagram);
    assert_eq!(
        stored.instagram.as_ref().unwrap().linked_accounts[0]
            .linked_sub_account_id
            .as_deref(),
        Some("ig-1")
    );

    let publisher = Publisher::from_config(&config, Arc::new(RecordingShell::new())).unwrap();
    let report = publisher
        .publish(&PostRequest::new("hello everyone", [ProviderId::Facebook]))
        .await
        .unwrap();
    assert!(report.all_succeeded());
    assert_eq!(report.exit_code(), 0);
}
