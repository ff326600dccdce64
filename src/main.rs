//! Fetch Intercept Mock - CLI Entry Point
//!
//! Validates route files and dry-runs requests against them without
//! touching the network.

use anyhow::{Context, Result};
use clap::Parser;
use fetch_intercept_mock::{FetchClient, FetchMock, MockConfig, Offline, Request};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "fetch-intercept-mock",
    about = "Validate mock route files and dry-run requests against them",
    version
)]
struct Args {
    /// Path to route configuration file
    #[arg(short, long, default_value = "mock-routes.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Method of the dry-run request
    #[arg(short, long, default_value = "GET")]
    method: String,

    /// URL of the dry-run request
    #[arg(short, long)]
    url: Option<String>,

    /// Raw body of the dry-run request
    #[arg(short, long)]
    body: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        println!("{}", include_str!("../config/default-routes.yaml"));
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockConfig::from_file(&args.config)
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no routes)");
        MockConfig::default()
    };

    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} routes defined)",
            config.routes.len()
        );
        return Ok(());
    }

    let Some(url) = args.url else {
        anyhow::bail!("Nothing to do: pass --url for a dry run, or --validate");
    };

    // Fallback has nowhere to go in a dry run
    let client = Arc::new(FetchClient::new(Arc::new(Offline)));
    let mock = FetchMock::from_config(&client, &config)?;

    let mut request = Request::new(args.method, url);
    if let Some(body) = args.body {
        request = request.with_body(body);
    }

    let result = client.fetch(request).await;
    mock.restore();

    let response = result?;
    println!("{} {}", response.status, response.status_text);
    println!("{}", response.text());

    Ok(())
}
