//! omni-post - Publish one post to several social platforms

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use libomnipost::credentials::CredentialManager;
use libomnipost::host::{load_local_image, HostShell, PrintingShell, SystemBrowser};
use libomnipost::platforms::create_registry;
use libomnipost::validation::{preflight, validate_request, PreflightReport};
use libomnipost::{
    Config, OmnipostError, Outcome, PostRequest, ProviderId, PublishReport, Publisher, Result,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "omni-post")]
#[command(version)]
#[command(about = "Publish one post to several social platforms")]
#[command(long_about = "\
omni-post - Publish one post to several social platforms

DESCRIPTION:
    omni-post sends the same text, and optionally one image, to every
    selected platform at once. Each platform succeeds or fails on its own:
    one rejected post never stops the others.

    Twitter/X has no posting API here. omni-post opens a compose window in
    your browser with the text filled in; attach images there by hand.

USAGE EXAMPLES:
    # Post to Facebook and Bluesky
    omni-post \"Hello world\" --platform facebook,bluesky

    # Read the text from stdin
    echo \"Hello world\" | omni-post --platform bluesky

    # Post an image everywhere (Instagram requires one)
    omni-post \"Sunset\" --all --image sunset.jpg

    # Check what would fail, without posting
    omni-post \"Hello world\" --all --check

    # Machine-readable results
    omni-post \"Hello world\" -p bluesky --format json

CONFIGURATION:
    Configuration file: ~/.config/omnipost/config.toml
    Credentials are managed with omni-creds.

    Override with environment variables:
        OMNIPOST_CONFIG      - Path to config file
        OMNIPOST_NO_BROWSER  - Print compose URLs instead of opening them

EXIT CODES:
    0 - Success on every platform
    1 - Posting failed on at least one platform
    2 - Authentication error (every failure was a credential problem)
    3 - Invalid input (empty text, no platform, failed --check)
")]
struct Cli {
    /// Text to post (reads from stdin if not provided)
    content: Option<String>,

    /// Target platform(s): facebook, instagram, bluesky, twitter
    #[arg(short, long, value_delimiter = ',')]
    platform: Vec<ProviderId>,

    /// Target every platform
    #[arg(short, long, conflicts_with = "platform")]
    all: bool,

    /// Image file to attach (jpg, png, gif, webp; up to 10 MiB)
    #[arg(short, long, value_name = "PATH")]
    image: Option<PathBuf>,

    /// Public URL of the same image, used by Instagram instead of uploading
    #[arg(long, value_name = "URL", requires = "image")]
    image_url: Option<String>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Report per-platform problems without posting
    #[arg(long)]
    check: bool,

    /// Print compose URLs instead of opening a browser
    #[arg(long, env = "OMNIPOST_NO_BROWSER")]
    no_browser: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = OmnipostError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(OmnipostError::Validation(format!(
                "Invalid format '{}'. Valid options: text, json",
                other
            ))),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libomnipost::logging::init_default(cli.verbose);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let format: OutputFormat = cli.format.parse()?;
    let request = build_request(&cli)?;
    validate_request(&request)?;
    let config = Config::load()?;

    let shell: Arc<dyn HostShell> = if cli.no_browser {
        Arc::new(PrintingShell)
    } else {
        Arc::new(SystemBrowser)
    };

    if cli.check {
        let registry = create_registry(&config, shell);
        let credentials = CredentialManager::from_config(&config.credentials)?.load()?;
        let report = preflight(&request, &registry, &credentials)?;
        print_preflight(&report, format);
        return Ok(if report.valid { 0 } else { 3 });
    }

    let publisher = Publisher::from_config(&config, shell)?;
    let report = publisher.publish(&request).await?;
    print_report(&report, format);
    Ok(report.exit_code())
}

fn build_request(cli: &Cli) -> Result<PostRequest> {
    let text = match &cli.content {
        Some(content) => content.clone(),
        None => std::io::read_to_string(std::io::stdin())
            .map_err(|e| OmnipostError::Validation(format!("Failed to read stdin: {}", e)))?,
    };

    let targets = if cli.all {
        ProviderId::ALL.to_vec()
    } else {
        cli.platform.clone()
    };

    let mut request = PostRequest::new(text.trim(), targets);
    if let Some(path) = &cli.image {
        let mut image = load_local_image(path)?;
        image.public_url = cli.image_url.clone();
        request = request.with_image(image);
    }
    Ok(request)
}

fn print_report(report: &PublishReport, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json(report);
        return;
    }

    for (provider, outcome) in report.outcomes() {
        match outcome {
            Outcome::Success { id, note } => {
                println!("{}:{}", provider, id);
                if let Some(note) = note {
                    eprintln!("Note: {}: {}", provider.display_name(), note);
                }
            }
            Outcome::Failure { message } => {
                eprintln!("Error: {}: {}", provider.display_name(), message);
            }
        }
    }
}

fn print_preflight(report: &PreflightReport, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json(report);
        return;
    }

    for check in &report.results {
        let status = if check.valid { "ok" } else { "invalid" };
        println!("{}: {}", check.provider, status);
        for error in &check.errors {
            println!("  error: {}", error);
        }
        for warning in &check.warnings {
            println!("  warning: {}", warning);
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!("Failed to serialize output: {}", e),
    }
}
