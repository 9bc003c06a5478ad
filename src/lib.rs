//! # scholar-fetch
//!
//! Fetch an author's publications from a Google Scholar profile, filtered to
//! a year range and sorted newest first.
//!
//! Retrieval goes through a proxy chosen from an ordered list of strategies,
//! tries the structured profile/detail client first and falls back to
//! scraping the profile page's publication table.
//!
//! ## Modules
//!
//! - [`orchestrator`] - Fetch state machine and retrieval strategy chain
//! - [`structured`] - Profile lookup with retry and per-publication detail fill
//! - [`extract`] - Profile page markup extraction and the fallback strategy
//! - [`proxy`] - Proxy strategies, liveness probing and shared proxy state
//! - [`transport`] - Paced HTTP client with browser headers
//! - [`gscholar`] - Google Scholar URL and page conventions
//! - [`record`] - Publication records and year ranges
//! - [`render`] - Text, JSON and CSV output
//! - [`config`] - Timeouts, delays and proxy credentials
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scholar_fetch::{FetchConfig, FetchOrchestrator, ProxyCredentials, ProxyStrategyRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = FetchConfig::default();
//!     let registry = ProxyStrategyRegistry::from_credentials(&ProxyCredentials::from_env(), &config);
//!     let orchestrator = FetchOrchestrator::from_config(&config, registry)?;
//!
//!     let outcome = orchestrator.fetch("qc6CJjYAAAAJ", 2021, 2023).await?;
//!     println!("Found {} papers via {}", outcome.records.len(), outcome.source);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod gscholar;
pub mod orchestrator;
pub mod proxy;
pub mod record;
pub mod render;
pub mod structured;
pub mod transport;

pub use config::{FetchConfig, ProxyCredentials};
pub use error::{FetchError, Result};
pub use orchestrator::{DataSource, FetchOrchestrator, FetchOutcome};
pub use proxy::{ProxyContext, ProxyStrategyRegistry};
pub use record::{PublicationRecord, YearRange};
