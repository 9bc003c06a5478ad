//! scholar-fetch - Google Scholar profile publication fetcher
//!
//! Fetches an author's publications for a year range, routing through the
//! first working proxy and falling back to page scraping when the structured
//! client fails.
//!
//! ## Usage
//!
//! ```bash
//! scholar-fetch fetch qc6CJjYAAAAJ --start 2021 --end 2023 --format json
//! scholar-fetch extract saved_profile.html --start 2020
//! scholar-fetch proxy
//! ```

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Local};
use clap::{Parser, Subcommand};
use scholar_fetch::extract::RecordExtractor;
use scholar_fetch::orchestrator::{DataSource, FetchOutcome};
use scholar_fetch::render::{self, OutputFormat};
use scholar_fetch::transport::TransportClient;
use scholar_fetch::{
    gscholar, FetchConfig, FetchOrchestrator, ProxyContext, ProxyCredentials,
    ProxyStrategyRegistry, YearRange,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

// ============================================================================
// CLI Definition
// ============================================================================

/// Google Scholar profile publication fetcher
#[derive(Parser)]
#[command(name = "scholar-fetch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Scholar base URL (mirror)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Disable request pacing and retry backoff
    #[arg(long, global = true)]
    no_delay: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a profile's publications within a year range
    Fetch {
        /// Scholar profile ID (the `user=` parameter of the profile URL)
        profile_id: String,

        /// First year to include (default: end year - 2)
        #[arg(long)]
        start: Option<i32>,

        /// Last year to include (default: current year)
        #[arg(long)]
        end: Option<i32>,

        /// Output format
        #[arg(long, default_value = "text", value_parser = ["text", "json", "csv"])]
        format: String,

        /// Write output to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip the structured client and scrape the profile page directly
        #[arg(long)]
        markup_only: bool,

        /// Do not provision a proxy
        #[arg(long)]
        no_proxy: bool,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Extract publications from a saved profile page
    Extract {
        /// Saved profile page HTML
        html_file: PathBuf,

        /// First year to include (default: end year - 2)
        #[arg(long)]
        start: Option<i32>,

        /// Last year to include (default: current year)
        #[arg(long)]
        end: Option<i32>,

        /// Output format
        #[arg(long, default_value = "text", value_parser = ["text", "json", "csv"])]
        format: String,
    },

    /// Provision a proxy and test connectivity through it
    Proxy,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.json_logs {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let mut config = FetchConfig::default();
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url.as_str());
    }
    if cli.no_delay {
        config = config.without_delays();
    }

    match cli.command {
        Commands::Fetch {
            profile_id,
            start,
            end,
            format,
            output,
            markup_only,
            no_proxy,
            timeout,
        } => {
            config.fetch_timeout = timeout.map(Duration::from_secs);
            let options = FetchOptions {
                markup_only,
                no_proxy,
                format: format.parse()?,
                output,
            };
            run_fetch(config, &profile_id, start, end, options).await
        }
        Commands::Extract {
            html_file,
            start,
            end,
            format,
        } => run_extract(&config, &html_file, start, end, format.parse()?),
        Commands::Proxy => run_proxy(&config).await,
    }
}

/// Resolve the year window: end defaults to the current year, start to end - 2
fn year_window(start: Option<i32>, end: Option<i32>) -> (i32, i32) {
    let end = end.unwrap_or_else(|| Local::now().year());
    let start = start.unwrap_or(end - 2);
    (start, end)
}

// ============================================================================
// Fetch
// ============================================================================

struct FetchOptions {
    markup_only: bool,
    no_proxy: bool,
    format: OutputFormat,
    output: Option<PathBuf>,
}

async fn run_fetch(
    config: FetchConfig,
    profile_id: &str,
    start: Option<i32>,
    end: Option<i32>,
    options: FetchOptions,
) -> Result<()> {
    let (start, end) = year_window(start, end);

    let registry = if options.no_proxy {
        ProxyStrategyRegistry::direct_only()
    } else {
        ProxyStrategyRegistry::from_credentials(&ProxyCredentials::from_env(), &config)
    };
    info!(strategies = ?registry.strategy_names(), "Proxy strategies loaded");

    let mut orchestrator =
        FetchOrchestrator::from_config(&config, registry).context("Failed to set up fetch clients")?;
    if options.markup_only {
        orchestrator = orchestrator.only(DataSource::MarkupFallback);
    }

    eprintln!("Fetching publications for {} ({}-{})...", profile_id, start, end);
    let outcome = orchestrator
        .fetch(profile_id, start, end)
        .await
        .with_context(|| format!("Failed to fetch publications for '{}'", profile_id))?;

    report(&outcome, start, end);
    render::save_outcome(&outcome, options.format, options.output.as_deref())
        .context("Failed to write output")?;
    if let Some(path) = &options.output {
        eprintln!("Saved: {}", path.display());
    }
    Ok(())
}

fn report(outcome: &FetchOutcome, start: i32, end: i32) {
    for warning in &outcome.warnings {
        eprintln!("warning: {}", warning);
    }
    eprintln!(
        "Found {} papers between {} and {} (via {}).",
        outcome.records.len(),
        start,
        end,
        outcome.source
    );
}

// ============================================================================
// Offline Extraction
// ============================================================================

fn run_extract(
    config: &FetchConfig,
    html_file: &Path,
    start: Option<i32>,
    end: Option<i32>,
    format: OutputFormat,
) -> Result<()> {
    let (start, end) = year_window(start, end);
    let range = YearRange::new(start, end)?;

    let markup = std::fs::read_to_string(html_file)
        .with_context(|| format!("Failed to read {}", html_file.display()))?;

    let extractor = RecordExtractor::new(&config.base_url)?;
    let extraction = extractor
        .extract(&markup, &range)
        .with_context(|| format!("Failed to extract publications from {}", html_file.display()))?;

    // undated entries cannot satisfy a year range
    let records = extraction
        .records
        .into_iter()
        .filter(|r| range.admits(r.year))
        .collect();
    let outcome = FetchOutcome {
        records,
        source: DataSource::MarkupFallback,
        warnings: extraction.warnings,
    };

    report(&outcome, start, end);
    render::save_outcome(&outcome, format, None).context("Failed to write output")?;
    Ok(())
}

// ============================================================================
// Proxy Check
// ============================================================================

async fn run_proxy(config: &FetchConfig) -> Result<()> {
    let registry = ProxyStrategyRegistry::from_credentials(&ProxyCredentials::from_env(), config);
    println!("Strategies (priority order): {}", registry.strategy_names().join(", "));

    let context = ProxyContext::new();
    let state = registry.provision(&context).await;

    match (&state.active_strategy, &state.transport) {
        (Some(strategy), Some(endpoints)) => println!("Active proxy: {} {:?}", strategy, endpoints),
        (Some(strategy), None) => println!("Active proxy: {} (no transport proxy)", strategy),
        (None, _) => println!("Active proxy: none, using direct egress"),
    }

    let transport = TransportClient::new(config, context).context("Failed to build HTTP client")?;

    let probe_url = Url::parse(&config.probe_url).context("Invalid probe URL")?;
    match transport.get(&probe_url, true).await {
        Ok(response) => println!("Egress check: {}", response.body.trim()),
        Err(e) => warn!(error = %e, "Egress check failed"),
    }

    let home = Url::parse(&config.base_url).context("Invalid base URL")?;
    let response = transport
        .get(&home, true)
        .await
        .context("Connection test against Scholar failed")?;
    if gscholar::is_blocked_page(&response.body) {
        bail!("Connection test reached Scholar but was served a CAPTCHA page");
    }
    println!("Connection test: OK (HTTP {})", response.status);
    Ok(())
}
