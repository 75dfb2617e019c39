//! omni-creds - Credential management tool for Omnipost
//!
//! Stores provider credentials, runs the Meta OAuth exchange and checks that
//! stored credentials still work.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Read, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use libomnipost::config::Config;
use libomnipost::credentials::{BlueskyBundle, CredentialManager, Credentials, GraphBundle, RedirectBundle};
use libomnipost::graph::GraphClient;
use libomnipost::host::{HostShell, PrintingShell, SystemBrowser};
use libomnipost::oauth::{authorization_url, extract_authorization_code, OAuthExchange};
use libomnipost::platforms::bluesky::{sanitize_handle, BlueskyProvider};
use libomnipost::platforms::twitter::build_intent_url;
use libomnipost::ProviderId;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "omni-creds")]
#[command(version)]
#[command(about = "Manage Omnipost platform credentials")]
#[command(long_about = "\
omni-creds - Manage Omnipost platform credentials

USAGE EXAMPLES:
    # Connect Facebook and Instagram (opens the Meta login dialog)
    omni-creds connect

    # Finish a login with a redirect URL captured elsewhere
    omni-creds connect --redirect-url 'omnipost://auth/meta/callback?code=...'

    # Post as a specific page instead of the first one
    omni-creds pin 1234567890

    # Store a Bluesky handle; the app password is prompted for
    omni-creds set bluesky you.bsky.social

    # Same, reading the app password from stdin (for automation)
    echo \"$APP_PASSWORD\" | omni-creds set bluesky you.bsky.social --stdin

    # Use a custom compose template for Twitter/X
    omni-creds set twitter 'https://twitter.com/intent/tweet?hashtags=omnipost'

    # Show what is stored (secrets masked) and check it
    omni-creds show
    omni-creds verify bluesky
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store credentials for a platform
    Set {
        #[command(subcommand)]
        target: SetTarget,
    },

    /// Connect Facebook and Instagram through the Meta login dialog
    Connect {
        /// Authorization code, if already known
        #[arg(long, conflicts_with = "redirect_url")]
        code: Option<String>,

        /// Full redirect URL captured after login
        #[arg(long)]
        redirect_url: Option<String>,

        /// Print the login URL instead of opening a browser
        #[arg(long, env = "OMNIPOST_NO_BROWSER")]
        no_browser: bool,
    },

    /// Publish to a specific Facebook page (and its Instagram account)
    Pin {
        /// Page id, as listed by `omni-creds show`
        #[arg(required_unless_present = "clear")]
        page_id: Option<String>,

        /// Go back to using the first page
        #[arg(long, conflicts_with = "page_id")]
        clear: bool,
    },

    /// Show stored credentials (secrets masked)
    Show {
        /// Output format (text or json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete stored credentials for a platform
    Clear {
        /// Platform name (facebook, instagram, bluesky, twitter)
        platform: ProviderId,
    },

    /// Check stored credentials against the platform
    Verify {
        /// Platform name (facebook, instagram, bluesky, twitter)
        platform: ProviderId,
    },
}

#[derive(Subcommand)]
enum SetTarget {
    /// Bluesky handle and app password
    Bluesky {
        /// Handle, e.g. you.bsky.social
        handle: String,

        /// Read the app password from stdin (for automation/agents)
        #[arg(long)]
        stdin: bool,
    },

    /// Compose template URL for Twitter/X
    Twitter {
        /// Intent URL; query parameters such as hashtags are kept
        template_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    libomnipost::logging::init_default(cli.verbose);

    if let Err(e) = run_command(cli.command).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run_command(command: Commands) -> Result<()> {
    let config = Config::load()?;
    let manager = CredentialManager::from_config(&config.credentials)?;

    match command {
        Commands::Set { target } => match target {
            SetTarget::Bluesky { handle, stdin } => set_bluesky(&manager, &handle, stdin),
            SetTarget::Twitter { template_url } => set_twitter(&manager, &template_url),
        },
        Commands::Connect {
            code,
            redirect_url,
            no_browser,
        } => connect_meta(&config, &manager, code, redirect_url, no_browser).await,
        Commands::Pin { page_id, clear } => pin_page(&manager, page_id.filter(|_| !clear)),
        Commands::Show { format } => show_credentials(&config, &manager, &format),
        Commands::Clear { platform } => clear_credentials(&manager, platform),
        Commands::Verify { platform } => verify_credentials(&config, &manager, platform).await,
    }
}

fn set_bluesky(manager: &CredentialManager, handle: &str, use_stdin: bool) -> Result<()> {
    let handle = sanitize_handle(handle);
    if handle.is_empty() {
        anyhow::bail!("Handle cannot be empty");
    }

    let app_secret = if use_stdin {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer.trim().to_string()
    } else {
        rpassword::prompt_password(format!("App password for {}: ", handle))?
            .trim()
            .to_string()
    };
    if app_secret.is_empty() {
        anyhow::bail!("App password cannot be empty");
    }

    let bundle = BlueskyBundle {
        handle: handle.clone(),
        app_secret,
    };
    manager.update(move |creds| creds.bluesky = Some(bundle))?;

    println!("✓ Stored Bluesky credentials for {}", handle);
    Ok(())
}

fn set_twitter(manager: &CredentialManager, template_url: &str) -> Result<()> {
    let template_url = template_url.trim().to_string();
    build_intent_url(&template_url, "").map_err(|e| anyhow::anyhow!(e.message().to_string()))?;

    let bundle = RedirectBundle {
        template_url: template_url.clone(),
    };
    manager.update(move |creds| creds.twitter = Some(bundle))?;

    println!("✓ Stored Twitter/X template {}", template_url);
    Ok(())
}

async fn connect_meta(
    config: &Config,
    manager: &CredentialManager,
    code: Option<String>,
    redirect_url: Option<String>,
    no_browser: bool,
) -> Result<()> {
    config.meta_app.require_complete()?;

    let input = match (code, redirect_url) {
        (Some(code), _) => code,
        (None, Some(url)) => url,
        (None, None) => {
            let shell: Arc<dyn HostShell> = if no_browser {
                Arc::new(PrintingShell)
            } else {
                Arc::new(SystemBrowser)
            };
            prompt_for_redirect(config, shell.as_ref())?
        }
    };
    let code = extract_authorization_code(&input)?;

    let exchange = OAuthExchange::new(GraphClient::from_config(&config.graph), config.meta_app.clone());
    let bundle = exchange
        .connect_with_progress(&code, manager, |step| {
            tracing::info!("OAuth: {}", step);
        })
        .await?;

    match &bundle.identity {
        Some(identity) => println!("✓ Connected as {} ({})", identity.name, identity.id),
        None => println!("✓ Connected"),
    }
    println!("  {} page(s) available", bundle.linked_accounts.len());
    for account in &bundle.linked_accounts {
        println!("  {}", describe_page(account));
    }
    Ok(())
}

/// Send the user to the login dialog and read back what the browser landed on
fn prompt_for_redirect(config: &Config, shell: &dyn HostShell) -> Result<String> {
    let state = uuid::Uuid::new_v4().to_string();
    let url = authorization_url(&config.meta_app, &config.graph.api_version, &state);

    eprintln!("Log in with Meta to grant access:");
    eprintln!("  {}", url);
    if let Err(e) = shell.open_external_url(&url) {
        tracing::warn!("Failed to open browser: {}", e);
    }

    eprint!("Paste the redirect URL (or the code): ");
    io::stderr().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn pin_page(manager: &CredentialManager, page_id: Option<String>) -> Result<()> {
    let current = manager.load()?;
    let Some(graph) = current.facebook.as_ref().or(current.instagram.as_ref()) else {
        anyhow::bail!("Facebook is not connected. Run 'omni-creds connect' first.");
    };

    if let Some(id) = &page_id {
        if graph.linked_account(id).is_none() {
            eprintln!(
                "Warning: page {} is not in the stored page list; its posts will use your user token",
                id
            );
        }
    }

    let pinned = page_id.clone();
    manager.update(move |creds| {
        for bundle in [creds.facebook.as_mut(), creds.instagram.as_mut()]
            .into_iter()
            .flatten()
        {
            bundle.pinned_account_id = pinned.clone();
        }
    })?;

    match page_id {
        Some(id) => println!("✓ Pinned page {}", id),
        None => println!("✓ Unpinned; the first page will be used"),
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ProviderSummary {
    provider: ProviderId,
    configured: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    details: BTreeMap<&'static str, String>,
}

fn mask(secret: &str) -> String {
    if secret.chars().count() <= 8 {
        return "********".to_string();
    }
    let visible: String = secret.chars().take(4).collect();
    format!("{}********", visible)
}

fn describe_page(account: &libomnipost::credentials::LinkedAccount) -> String {
    let mut text = format!("{} [{}]", account.name, account.id);
    if let Some(ig) = &account.linked_sub_account_id {
        text.push_str(&format!(" instagram: {}", ig));
    }
    text
}

fn summarize_graph(provider: ProviderId, bundle: Option<&GraphBundle>) -> ProviderSummary {
    let mut details = BTreeMap::new();
    let token = bundle.and_then(|b| b.token());
    if let (Some(bundle), Some(token)) = (bundle, token) {
        details.insert("token", mask(token));
        if let Some(identity) = &bundle.identity {
            details.insert("account", format!("{} ({})", identity.name, identity.id));
        }
        let pages: Vec<String> = bundle.linked_accounts.iter().map(describe_page).collect();
        details.insert("pages", pages.join(", "));
        if let Some(pinned) = &bundle.pinned_account_id {
            details.insert("pinned", pinned.clone());
        }
    }
    ProviderSummary {
        provider,
        configured: token.is_some(),
        details,
    }
}

fn summarize(config: &Config, creds: &Credentials) -> Vec<ProviderSummary> {
    let mut summaries = vec![
        summarize_graph(ProviderId::Facebook, creds.facebook.as_ref()),
        summarize_graph(ProviderId::Instagram, creds.instagram.as_ref()),
    ];

    let mut bluesky = BTreeMap::new();
    if let Some(bundle) = &creds.bluesky {
        bluesky.insert("handle", sanitize_handle(&bundle.handle));
        bluesky.insert("app_password", mask(&bundle.app_secret));
    }
    summaries.push(ProviderSummary {
        provider: ProviderId::Bluesky,
        configured: creds.bluesky.as_ref().is_some_and(|b| b.is_complete()),
        details: bluesky,
    });

    let mut twitter = BTreeMap::new();
    match &creds.twitter {
        Some(bundle) => twitter.insert("template", bundle.template_url.clone()),
        None => twitter.insert("template", format!("{} (default)", config.twitter.intent_url)),
    };
    summaries.push(ProviderSummary {
        provider: ProviderId::Twitter,
        configured: creds.twitter.is_some(),
        details: twitter,
    });

    summaries
}

fn show_credentials(config: &Config, manager: &CredentialManager, format: &str) -> Result<()> {
    let creds = manager.load()?;
    let summaries = summarize(config, &creds);

    match format.to_lowercase().as_str() {
        "json" => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "backend": manager.backend_name(),
                    "providers": summaries,
                }))?
            );
        }
        "text" => {
            println!("Credential backend: {}", manager.backend_name());
            for summary in &summaries {
                let status = if summary.configured {
                    "configured"
                } else {
                    "not configured"
                };
                println!("{}: {}", summary.provider, status);
                for (key, value) in &summary.details {
                    println!("  {}: {}", key, value);
                }
            }
        }
        other => anyhow::bail!("Invalid format '{}'. Valid options: text, json", other),
    }
    Ok(())
}

fn clear_credentials(manager: &CredentialManager, platform: ProviderId) -> Result<()> {
    manager.update(|creds| creds.clear(platform))?;
    println!("✓ Cleared {} credentials", platform.display_name());
    Ok(())
}

async fn verify_credentials(
    config: &Config,
    manager: &CredentialManager,
    platform: ProviderId,
) -> Result<()> {
    let creds = manager.load()?;

    match platform {
        ProviderId::Facebook | ProviderId::Instagram => {
            let token = creds
                .graph(platform)
                .and_then(|b| b.token())
                .with_context(|| format!("{} is not connected", platform.display_name()))?;
            let pages = GraphClient::from_config(&config.graph)
                .fetch_linked_accounts(token, "Failed to get pages")
                .await
                .map_err(|e| anyhow::anyhow!(e.message().to_string()))?;
            if platform == ProviderId::Instagram
                && !pages.iter().any(|p| p.linked_sub_account_id.is_some())
            {
                anyhow::bail!("No Instagram Business account found");
            }
            println!(
                "✓ {} token valid ({} page(s))",
                platform.display_name(),
                pages.len()
            );
        }
        ProviderId::Bluesky => {
            let bundle = creds
                .bluesky
                .as_ref()
                .context("Bluesky is not configured")?;
            let session = BlueskyProvider::new(&config.bluesky.service)
                .verify(bundle)
                .await
                .map_err(|e| anyhow::anyhow!(e.message().to_string()))?;
            println!("✓ Bluesky credentials valid ({})", session.did);
        }
        ProviderId::Twitter => {
            let template = creds
                .twitter
                .as_ref()
                .map(|b| b.template_url.clone())
                .unwrap_or_else(|| config.twitter.intent_url.clone());
            build_intent_url(&template, "").map_err(|e| anyhow::anyhow!(e.message().to_string()))?;
            println!("✓ Twitter/X template valid: {}", template);
        }
    }
    Ok(())
}
