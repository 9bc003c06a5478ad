//! Fetch orchestration.
//!
//! A fetch walks a small state machine: validate input, provision the proxy
//! (once per orchestrator), try each retrieval strategy in order until one
//! succeeds, then filter and sort the records it produced.

use crate::config::FetchConfig;
use crate::error::{FetchError, InputError, Result, StrategyError, StrategyFailure};
use crate::extract::MarkupFallback;
use crate::proxy::{ProxyContext, ProxyState, ProxyStrategyRegistry};
use crate::record::{dedup_records, sort_by_recency, PublicationRecord, YearRange};
use crate::structured::{ProfilePageSource, RetryPolicy, StructuredClient};
use crate::transport::TransportClient;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Which retrieval strategy produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Structured,
    MarkupFallback,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Structured => write!(f, "structured"),
            DataSource::MarkupFallback => write!(f, "markup fallback"),
        }
    }
}

/// Validated fetch input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub profile_id: String,
    pub year_range: YearRange,
}

impl FetchRequest {
    pub fn new(profile_id: &str, start: i32, end: i32) -> std::result::Result<Self, InputError> {
        let profile_id = profile_id.trim();
        if profile_id.is_empty() {
            return Err(InputError::EmptyProfileId);
        }
        Ok(Self {
            profile_id: profile_id.to_string(),
            year_range: YearRange::new(start, end)?,
        })
    }
}

/// Records and warnings from one successful strategy attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Retrieved {
    pub records: Vec<PublicationRecord>,
    pub warnings: Vec<String>,
}

/// One way of retrieving a profile's publications
#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn source(&self) -> DataSource;

    async fn attempt(&self, request: &FetchRequest) -> std::result::Result<Retrieved, StrategyError>;
}

/// Result of a successful fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchOutcome {
    /// In-range records, newest first
    pub records: Vec<PublicationRecord>,
    /// Strategy that produced the records
    pub source: DataSource,
    /// Failed strategies and skipped entries
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchState {
    Idle,
    ProvisioningProxy,
    TryingStructured,
    TryingMarkupFallback,
    Filtering,
    Done,
    Failed,
}

impl FetchState {
    fn trying(source: DataSource) -> Self {
        match source {
            DataSource::Structured => FetchState::TryingStructured,
            DataSource::MarkupFallback => FetchState::TryingMarkupFallback,
        }
    }
}

fn advance(state: &mut FetchState, next: FetchState) {
    debug!(from = ?state, to = ?next, "Fetch state transition");
    *state = next;
}

/// Sequences proxy provisioning and the retrieval strategies
pub struct FetchOrchestrator {
    registry: ProxyStrategyRegistry,
    proxy: ProxyContext,
    provisioned: Mutex<Option<Arc<ProxyState>>>,
    strategies: Vec<Box<dyn RetrievalStrategy>>,
    fetch_timeout: Option<Duration>,
}

impl FetchOrchestrator {
    pub fn new(
        registry: ProxyStrategyRegistry,
        proxy: ProxyContext,
        strategies: Vec<Box<dyn RetrievalStrategy>>,
    ) -> Self {
        Self {
            registry,
            proxy,
            provisioned: Mutex::new(None),
            strategies,
            fetch_timeout: None,
        }
    }

    /// Structured client first, markup fallback second, both sharing one
    /// transport routed through the registry's proxy.
    pub fn from_config(
        config: &FetchConfig,
        registry: ProxyStrategyRegistry,
    ) -> std::result::Result<Self, StrategyError> {
        let proxy = ProxyContext::new();
        let transport = Arc::new(TransportClient::new(config, proxy.clone())?);

        let structured = StructuredClient::new(
            ProfilePageSource::new(config, Arc::clone(&transport))?,
            RetryPolicy::from_config(config),
        );
        let markup = MarkupFallback::new(config, transport)?;

        let strategies: Vec<Box<dyn RetrievalStrategy>> = vec![Box::new(structured), Box::new(markup)];
        Ok(Self::new(registry, proxy, strategies).with_fetch_timeout(config.fetch_timeout))
    }

    /// Deadline for a whole fetch, proxy provisioning included
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Keep only strategies producing the given source
    pub fn only(mut self, source: DataSource) -> Self {
        self.strategies.retain(|s| s.source() == source);
        self
    }

    /// Strategy names in attempt order
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn proxy_context(&self) -> &ProxyContext {
        &self.proxy
    }

    /// Provision the proxy unless already done
    pub async fn ensure_proxy(&self) -> Arc<ProxyState> {
        let mut provisioned = self.provisioned.lock().await;
        if let Some(state) = provisioned.as_ref() {
            return Arc::clone(state);
        }
        let state = self.registry.provision(&self.proxy).await;
        *provisioned = Some(Arc::clone(&state));
        state
    }

    /// Provision again, replacing whatever configuration is active
    pub async fn refresh_proxy(&self) -> Arc<ProxyState> {
        let mut provisioned = self.provisioned.lock().await;
        let state = self.registry.provision(&self.proxy).await;
        *provisioned = Some(Arc::clone(&state));
        state
    }

    /// Fetch a profile's publications with `start <= year <= end`.
    ///
    /// Input is validated before any network activity. Strategies are tried
    /// in order, each at most once; the first success wins and earlier
    /// failures are reported as warnings on the outcome.
    pub async fn fetch(&self, profile_id: &str, start: i32, end: i32) -> Result<FetchOutcome> {
        let request = FetchRequest::new(profile_id, start, end)?;

        match self.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(&request))
                .await
                .map_err(|_| {
                    warn!(profile = %request.profile_id, timeout = ?limit, "Fetch timed out");
                    FetchError::TimedOut(limit)
                })?,
            None => self.run(&request).await,
        }
    }

    async fn run(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        let mut state = FetchState::Idle;

        advance(&mut state, FetchState::ProvisioningProxy);
        let proxy = self.ensure_proxy().await;
        debug!(strategy = ?proxy.active_strategy, proxied = proxy.routes_through_proxy(), "Proxy ready");

        let mut warnings = Vec::new();
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            advance(&mut state, FetchState::trying(strategy.source()));
            info!(profile = %request.profile_id, strategy = strategy.name(), "Trying retrieval strategy");

            match strategy.attempt(request).await {
                Ok(retrieved) => {
                    advance(&mut state, FetchState::Filtering);
                    let records = filter_records(retrieved.records, &request.year_range);
                    warnings.extend(retrieved.warnings);

                    advance(&mut state, FetchState::Done);
                    info!(
                        profile = %request.profile_id,
                        source = %strategy.source(),
                        records = records.len(),
                        warnings = warnings.len(),
                        "Fetch complete"
                    );
                    return Ok(FetchOutcome {
                        records,
                        source: strategy.source(),
                        warnings,
                    });
                }
                Err(error) => {
                    warn!(strategy = strategy.name(), error = %error, "Retrieval strategy failed");
                    warnings.push(format!("{} retrieval failed: {}", strategy.name(), error));
                    failures.push(StrategyFailure {
                        strategy: strategy.name().to_string(),
                        error,
                    });
                }
            }
        }

        advance(&mut state, FetchState::Failed);
        Err(FetchError::AllStrategiesFailed { failures })
    }
}

/// Range filter (undated excluded), de-duplication, newest-first sort
fn filter_records(records: Vec<PublicationRecord>, range: &YearRange) -> Vec<PublicationRecord> {
    let in_range: Vec<_> = records.into_iter().filter(|r| range.admits(r.year)).collect();
    let mut records = dedup_records(in_range);
    sort_by_recency(&mut records);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyCredentials;
    use crate::error::{ExtractionError, ProxyError, StructuredError, TransportError};
    use crate::proxy::{ConnectivityProbe, HttpProbe, ProxyCandidate, ProxyStrategy};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Strategy with a fixed result and a call counter
    struct StubStrategy {
        name: &'static str,
        source: DataSource,
        result: std::result::Result<Retrieved, StrategyError>,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl StubStrategy {
        fn boxed(
            source: DataSource,
            result: std::result::Result<Retrieved, StrategyError>,
        ) -> (Box<dyn RetrievalStrategy>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let name = match source {
                DataSource::Structured => "structured",
                DataSource::MarkupFallback => "markup",
            };
            let strategy = StubStrategy {
                name,
                source,
                result,
                delay: Duration::ZERO,
                calls: Arc::clone(&calls),
            };
            (Box::new(strategy), calls)
        }
    }

    #[async_trait]
    impl RetrievalStrategy for StubStrategy {
        fn name(&self) -> &str {
            self.name
        }

        fn source(&self) -> DataSource {
            self.source
        }

        async fn attempt(&self, _: &FetchRequest) -> std::result::Result<Retrieved, StrategyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result.clone()
        }
    }

    fn records(years: &[Option<i32>]) -> Retrieved {
        Retrieved {
            records: years
                .iter()
                .enumerate()
                .map(|(i, y)| PublicationRecord::new(format!("Paper {}", i)).with_year(*y))
                .collect(),
            warnings: Vec::new(),
        }
    }

    fn orchestrator(strategies: Vec<Box<dyn RetrievalStrategy>>) -> FetchOrchestrator {
        FetchOrchestrator::new(ProxyStrategyRegistry::direct_only(), ProxyContext::new(), strategies)
    }

    #[tokio::test]
    async fn test_structured_success_skips_fallback() {
        let (structured, s_calls) = StubStrategy::boxed(
            DataSource::Structured,
            Ok(records(&[Some(2020), Some(2023), Some(2021)])),
        );
        let (markup, m_calls) = StubStrategy::boxed(DataSource::MarkupFallback, Ok(records(&[])));

        let outcome = orchestrator(vec![structured, markup])
            .fetch("abc", 2020, 2023)
            .await
            .expect("fetch succeeds");

        assert_eq!(outcome.source, DataSource::Structured);
        let years: Vec<_> = outcome.records.iter().map(|r| r.year).collect();
        assert_eq!(years, vec![Some(2023), Some(2021), Some(2020)]);
        assert!(outcome.warnings.is_empty());
        assert_eq!(s_calls.load(Ordering::SeqCst), 1);
        assert_eq!(m_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_response_falls_back_once() {
        let (structured, s_calls) = StubStrategy::boxed(
            DataSource::Structured,
            Err(StructuredError::MalformedResponse("no publications".to_string()).into()),
        );
        let (markup, m_calls) =
            StubStrategy::boxed(DataSource::MarkupFallback, Ok(records(&[Some(2022)])));

        let outcome = orchestrator(vec![structured, markup])
            .fetch("abc", 2020, 2023)
            .await
            .expect("fallback succeeds");

        assert_eq!(outcome.source, DataSource::MarkupFallback);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].starts_with("structured retrieval failed"));
        assert_eq!(s_calls.load(Ordering::SeqCst), 1);
        assert_eq!(m_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_strategies_failed_names_each() {
        let (structured, _) = StubStrategy::boxed(
            DataSource::Structured,
            Err(StructuredError::TransientFailure {
                attempts: 3,
                last: "blocked by anti-abuse check".to_string(),
            }
            .into()),
        );
        let (markup, _) = StubStrategy::boxed(
            DataSource::MarkupFallback,
            Err(TransportError::Timeout.into()),
        );

        let err = orchestrator(vec![structured, markup])
            .fetch("abc", 2020, 2023)
            .await
            .expect_err("both fail");

        let FetchError::AllStrategiesFailed { failures } = &err else {
            panic!("unexpected error: {err}");
        };
        let names: Vec<_> = failures.iter().map(|f| f.strategy.as_str()).collect();
        assert_eq!(names, vec!["structured", "markup"]);

        let message = err.to_string();
        assert!(message.contains("structured: profile lookup failed after 3 attempts"));
        assert!(message.contains("markup: request timed out"));
    }

    #[tokio::test]
    async fn test_invalid_input_makes_no_calls() {
        let (structured, s_calls) = StubStrategy::boxed(DataSource::Structured, Ok(records(&[])));
        let orch = orchestrator(vec![structured]);

        assert_eq!(
            orch.fetch("abc", 2024, 2020).await,
            Err(FetchError::Input(InputError::InvalidYearRange {
                start: 2024,
                end: 2020
            }))
        );
        assert_eq!(
            orch.fetch("  ", 2020, 2024).await,
            Err(FetchError::Input(InputError::EmptyProfileId))
        );
        assert_eq!(
            orch.fetch("abc", 99, 2024).await,
            Err(FetchError::Input(InputError::YearOutOfBounds(99)))
        );
        assert_eq!(s_calls.load(Ordering::SeqCst), 0);
        assert!(orch.provisioned.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_filtering_excludes_undated_and_duplicates() {
        let mut retrieved = records(&[Some(2019), None, Some(2021), Some(2024)]);
        retrieved.records.push(PublicationRecord::new("  paper   2 ").with_year(Some(2021)));
        retrieved.records.push(PublicationRecord::new("Paper 2").with_year(Some(2021)));
        retrieved.warnings.push("skipped publication entry 7: empty title".to_string());
        let (markup, _) = StubStrategy::boxed(DataSource::MarkupFallback, Ok(retrieved));

        let outcome = orchestrator(vec![markup])
            .fetch("abc", 2020, 2023)
            .await
            .expect("fetch succeeds");

        let titles: Vec<_> = outcome.records.iter().map(|r| r.title.as_str()).collect();
        // first occurrence wins among titles equal after normalization
        assert_eq!(titles, vec!["Paper 2"]);
        assert_eq!(outcome.warnings, vec!["skipped publication entry 7: empty title"]);
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let slow = StubStrategy {
            name: "slow",
            source: DataSource::MarkupFallback,
            result: Ok(records(&[])),
            delay: Duration::from_secs(30),
            calls: Arc::new(AtomicUsize::new(0)),
        };

        let limit = Duration::from_millis(50);
        let err = orchestrator(vec![Box::new(slow)])
            .with_fetch_timeout(Some(limit))
            .fetch("abc", 2020, 2023)
            .await
            .expect_err("deadline elapses");

        assert_eq!(err, FetchError::TimedOut(limit));
    }

    #[tokio::test]
    async fn test_no_strategies() {
        let err = orchestrator(Vec::new())
            .fetch("abc", 2020, 2023)
            .await
            .expect_err("nothing to try");
        assert_eq!(
            err.to_string(),
            "all retrieval strategies failed: no strategies configured"
        );
    }

    #[tokio::test]
    async fn test_only_keeps_matching_strategies() {
        let (structured, _) = StubStrategy::boxed(DataSource::Structured, Ok(records(&[])));
        let (markup, _) = StubStrategy::boxed(DataSource::MarkupFallback, Ok(records(&[])));
        let orch = orchestrator(vec![structured, markup]).only(DataSource::MarkupFallback);
        assert_eq!(orch.strategy_names(), vec!["markup"]);
    }

    /// Proxy strategy that counts provisioning attempts and never succeeds
    struct CountingProxy(Arc<AtomicUsize>);

    #[async_trait]
    impl ProxyStrategy for CountingProxy {
        fn name(&self) -> &str {
            "counting"
        }

        fn candidates(&self) -> Vec<ProxyCandidate> {
            Vec::new()
        }

        async fn attempt(
            &self,
            _: &dyn ConnectivityProbe,
        ) -> std::result::Result<ProxyState, ProxyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ProxyError::NotConfigured)
        }
    }

    #[tokio::test]
    async fn test_proxy_provisioned_once_per_orchestrator() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let registry = ProxyStrategyRegistry::new(
            vec![Box::new(CountingProxy(Arc::clone(&attempts)))],
            Arc::new(HttpProbe),
        );
        let (markup, _) = StubStrategy::boxed(
            DataSource::MarkupFallback,
            Err(ExtractionError::NoEntries.into()),
        );
        let orch = FetchOrchestrator::new(registry, ProxyContext::new(), vec![markup]);

        for _ in 0..3 {
            let _ = orch.fetch("abc", 2020, 2023).await;
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        let state = orch.refresh_proxy().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(*state, ProxyState::direct());
        assert_eq!(*orch.proxy_context().snapshot(), ProxyState::direct());
    }

    #[test]
    fn test_from_config_strategy_order() {
        let config = FetchConfig::default();
        let registry = ProxyStrategyRegistry::from_credentials(&ProxyCredentials::default(), &config);
        let orch = FetchOrchestrator::from_config(&config, registry).expect("builds");
        assert_eq!(orch.strategy_names(), vec!["structured", "markup"]);
    }
}
