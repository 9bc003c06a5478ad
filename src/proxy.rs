//! Proxy provisioning with ordered fallback.
//!
//! The registry walks its strategies in priority order. A strategy offers
//! candidate configurations; a candidate is accepted only after a live probe
//! through it succeeds. The winning state replaces the shared [`ProxyContext`]
//! snapshot wholesale. When nothing works the context is reset to direct
//! egress, provisioning itself never fails.

use crate::config::{FetchConfig, ProxyCredentials};
use crate::error::{ProxyError, TransportError};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const SCRAPERAPI_HOST: &str = "proxy-server.scraperapi.com";
const SCRAPERAPI_PORT: u16 = 8001;
const SMARTPROXY_HOST: &str = "gate.smartproxy.com";
const SMARTPROXY_PORT: u16 = 7000;
const BRIGHTDATA_HOST: &str = "brd.superproxy.io";
const BRIGHTDATA_PORT: u16 = 22225;
const TOR_SOCKS_URL: &str = "socks5h://127.0.0.1:9050";

/// Scheme → proxy URL mapping applied to outgoing requests
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ProxyEndpoints(BTreeMap<String, String>);

impl ProxyEndpoints {
    /// Route both http and https through the same proxy
    pub fn uniform(proxy_url: impl Into<String>) -> Self {
        let proxy_url = proxy_url.into();
        let mut map = BTreeMap::new();
        map.insert("http".to_string(), proxy_url.clone());
        map.insert("https".to_string(), proxy_url);
        Self(map)
    }

    pub fn get(&self, scheme: &str) -> Option<&str> {
        self.0.get(scheme).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Install the endpoints on a client builder
    pub fn apply(
        &self,
        mut builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, TransportError> {
        for (scheme, proxy_url) in &self.0 {
            let proxy = match scheme.as_str() {
                "http" => reqwest::Proxy::http(proxy_url),
                "https" => reqwest::Proxy::https(proxy_url),
                _ => reqwest::Proxy::all(proxy_url),
            }
            .map_err(|e| {
                TransportError::Client(format!("invalid proxy URL '{}': {}", redact(proxy_url), e))
            })?;
            builder = builder.proxy(proxy);
        }
        Ok(builder)
    }
}

// Credentials stay out of logs
impl fmt::Debug for ProxyEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(k, v)| (k, redact(v))))
            .finish()
    }
}

/// Strip the password from a proxy URL for display
pub fn redact(proxy_url: &str) -> String {
    match Url::parse(proxy_url) {
        Ok(mut url) if url.password().is_some() => {
            // set_password only fails for cannot-be-a-base URLs, which have no password
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        Ok(url) => url.to_string(),
        Err(_) => "<invalid proxy url>".to_string(),
    }
}

/// The currently active proxy configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProxyState {
    /// Name of the strategy that produced this state
    pub active_strategy: Option<String>,
    /// Endpoints to route through, `None` for direct egress
    pub transport: Option<ProxyEndpoints>,
}

impl ProxyState {
    /// No proxy, direct egress
    pub fn direct() -> Self {
        Self::default()
    }

    /// Whether requests asking for a proxy will actually be proxied
    pub fn routes_through_proxy(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| !t.is_empty())
    }
}

/// Shared, replaceable proxy state.
///
/// Readers get an immutable snapshot; [`ProxyContext::replace`] swaps the
/// whole state at once.
#[derive(Debug, Clone, Default)]
pub struct ProxyContext {
    current: Arc<RwLock<Arc<ProxyState>>>,
}

impl ProxyContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn snapshot(&self) -> Arc<ProxyState> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the state and return the new snapshot
    pub fn replace(&self, state: ProxyState) -> Arc<ProxyState> {
        let state = Arc::new(state);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::clone(&state);
        state
    }
}

/// Where and how to check that a candidate works
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl ProbeTarget {
    /// Standard liveness check against the configured probe URL
    pub fn liveness(config: &FetchConfig) -> Self {
        Self {
            url: config.probe_url.clone(),
            headers: Vec::new(),
            timeout: config.probe_timeout,
        }
    }
}

/// One configuration a strategy would like to use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCandidate {
    /// Endpoints to install if accepted; `None` means direct egress
    pub transport: Option<ProxyEndpoints>,
    pub probe: ProbeTarget,
}

/// Checks that a candidate configuration reaches the outside world
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self, candidate: &ProxyCandidate) -> Result<(), ProxyError>;
}

/// Probe that issues a real GET through the candidate
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpProbe;

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self, candidate: &ProxyCandidate) -> Result<(), ProxyError> {
        let mut builder = reqwest::Client::builder().timeout(candidate.probe.timeout);
        builder = match &candidate.transport {
            Some(endpoints) => endpoints.apply(builder)?,
            None => builder.no_proxy(),
        };
        let client = builder
            .build()
            .map_err(|e| ProxyError::Invalid(e.to_string()))?;

        let mut request = client.get(&candidate.probe.url);
        for (name, value) in &candidate.probe.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProxyError::from(TransportError::from(e)))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProxyError::ProbeFailed(format!("HTTP status {}", status.as_u16())))
        }
    }
}

/// One way of obtaining network egress
#[async_trait]
pub trait ProxyStrategy: Send + Sync {
    /// Stable name, reported as the active strategy
    fn name(&self) -> &str;

    /// Configurations to try, in order; empty when not configured
    fn candidates(&self) -> Vec<ProxyCandidate>;

    /// Probe candidates until one is live
    async fn attempt(&self, probe: &dyn ConnectivityProbe) -> Result<ProxyState, ProxyError> {
        let candidates = self.candidates();
        if candidates.is_empty() {
            return Err(ProxyError::NotConfigured);
        }

        let mut last_error = None;
        for candidate in candidates {
            match probe.check(&candidate).await {
                Ok(()) => {
                    return Ok(ProxyState {
                        active_strategy: Some(self.name().to_string()),
                        transport: candidate.transport,
                    });
                }
                Err(e) => {
                    debug!(strategy = self.name(), endpoints = ?candidate.transport, error = %e, "Candidate rejected");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(ProxyError::NotConfigured))
    }
}

/// Cloud VM with its own managed egress, detected via the metadata service
#[derive(Debug, Clone)]
pub struct NativeEgress {
    enabled: bool,
    probe: ProbeTarget,
}

impl NativeEgress {
    pub fn new(enabled: bool, config: &FetchConfig) -> Self {
        Self {
            enabled,
            probe: ProbeTarget {
                url: config.metadata_url.clone(),
                headers: vec![("Metadata".to_string(), "true".to_string())],
                timeout: config.metadata_timeout,
            },
        }
    }
}

impl ProxyStrategy for NativeEgress {
    fn name(&self) -> &str {
        "native-egress"
    }

    fn candidates(&self) -> Vec<ProxyCandidate> {
        if !self.enabled {
            return Vec::new();
        }
        vec![ProxyCandidate {
            transport: None,
            probe: self.probe.clone(),
        }]
    }
}

/// Authenticated HTTP proxy at a fixed gateway (ScraperAPI, SmartProxy, BrightData)
#[derive(Debug, Clone)]
pub struct GatewayProxy {
    name: &'static str,
    endpoint: Option<String>,
    probe: ProbeTarget,
}

impl GatewayProxy {
    /// Build from optional credentials; missing ones leave the strategy unconfigured
    pub fn new(
        name: &'static str,
        host: &str,
        port: u16,
        user: Option<&str>,
        pass: Option<&str>,
        config: &FetchConfig,
    ) -> Self {
        let endpoint = match (user, pass) {
            (Some(user), Some(pass)) => gateway_url(host, port, user, pass),
            _ => None,
        };
        Self {
            name,
            endpoint,
            probe: ProbeTarget::liveness(config),
        }
    }

    /// Rotating-API proxy; the API key is the password
    pub fn scraperapi(key: Option<&str>, config: &FetchConfig) -> Self {
        Self::new("scraperapi", SCRAPERAPI_HOST, SCRAPERAPI_PORT, key.map(|_| "scraperapi"), key, config)
    }

    pub fn smartproxy(user: Option<&str>, pass: Option<&str>, config: &FetchConfig) -> Self {
        Self::new("smartproxy", SMARTPROXY_HOST, SMARTPROXY_PORT, user, pass, config)
    }

    pub fn brightdata(user: Option<&str>, pass: Option<&str>, config: &FetchConfig) -> Self {
        Self::new("brightdata", BRIGHTDATA_HOST, BRIGHTDATA_PORT, user, pass, config)
    }
}

impl ProxyStrategy for GatewayProxy {
    fn name(&self) -> &str {
        self.name
    }

    fn candidates(&self) -> Vec<ProxyCandidate> {
        self.endpoint
            .iter()
            .map(|endpoint| ProxyCandidate {
                transport: Some(ProxyEndpoints::uniform(endpoint.clone())),
                probe: self.probe.clone(),
            })
            .collect()
    }
}

fn gateway_url(host: &str, port: u16, user: &str, pass: &str) -> Option<String> {
    let mut url = Url::parse(&format!("http://{}:{}", host, port)).ok()?;
    url.set_username(user).ok()?;
    url.set_password(Some(pass)).ok()?;
    Some(url.to_string())
}

/// Operator-supplied proxy list, tried in random order
#[derive(Debug, Clone)]
pub struct CustomProxyList {
    proxies: Vec<String>,
    probe: ProbeTarget,
}

impl CustomProxyList {
    pub fn new(proxies: Vec<String>, config: &FetchConfig) -> Self {
        Self {
            proxies,
            probe: ProbeTarget::liveness(config),
        }
    }
}

impl ProxyStrategy for CustomProxyList {
    fn name(&self) -> &str {
        "custom"
    }

    fn candidates(&self) -> Vec<ProxyCandidate> {
        let mut proxies = self.proxies.clone();
        proxies.shuffle(&mut rand::thread_rng());
        proxies
            .into_iter()
            .map(|p| ProxyCandidate {
                transport: Some(ProxyEndpoints::uniform(p)),
                probe: self.probe.clone(),
            })
            .collect()
    }
}

/// Local Tor daemon SOCKS port
#[derive(Debug, Clone)]
pub struct TorProxy {
    enabled: bool,
    probe: ProbeTarget,
}

impl TorProxy {
    pub fn new(enabled: bool, config: &FetchConfig) -> Self {
        Self {
            enabled,
            probe: ProbeTarget::liveness(config),
        }
    }
}

impl ProxyStrategy for TorProxy {
    fn name(&self) -> &str {
        "tor"
    }

    fn candidates(&self) -> Vec<ProxyCandidate> {
        if !self.enabled {
            return Vec::new();
        }
        vec![ProxyCandidate {
            transport: Some(ProxyEndpoints::uniform(TOR_SOCKS_URL)),
            probe: self.probe.clone(),
        }]
    }
}

/// Ordered list of proxy strategies
pub struct ProxyStrategyRegistry {
    strategies: Vec<Box<dyn ProxyStrategy>>,
    probe: Arc<dyn ConnectivityProbe>,
}

impl ProxyStrategyRegistry {
    pub fn new(strategies: Vec<Box<dyn ProxyStrategy>>, probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self { strategies, probe }
    }

    /// Registry with no strategies; always provisions direct egress
    pub fn direct_only() -> Self {
        Self::new(Vec::new(), Arc::new(HttpProbe))
    }

    /// Standard priority order: native egress, rotating API, residential
    /// gateways, custom list, Tor
    pub fn from_credentials(creds: &ProxyCredentials, config: &FetchConfig) -> Self {
        let strategies: Vec<Box<dyn ProxyStrategy>> = vec![
            Box::new(NativeEgress::new(creds.detect_native_egress, config)),
            Box::new(GatewayProxy::scraperapi(creds.scraperapi_key.as_deref(), config)),
            Box::new(GatewayProxy::smartproxy(
                creds.smartproxy_user.as_deref(),
                creds.smartproxy_pass.as_deref(),
                config,
            )),
            Box::new(GatewayProxy::brightdata(
                creds.brightdata_user.as_deref(),
                creds.brightdata_pass.as_deref(),
                config,
            )),
            Box::new(CustomProxyList::new(creds.custom_proxies.clone(), config)),
            Box::new(TorProxy::new(creds.enable_tor, config)),
        ];
        Self::new(strategies, Arc::new(HttpProbe))
    }

    /// Strategy names in priority order
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Find a working configuration and install it in `context`.
    pub async fn provision(&self, context: &ProxyContext) -> Arc<ProxyState> {
        for strategy in &self.strategies {
            match strategy.attempt(self.probe.as_ref()).await {
                Ok(state) => {
                    info!(
                        strategy = strategy.name(),
                        proxied = state.routes_through_proxy(),
                        "Proxy configured"
                    );
                    return context.replace(state);
                }
                Err(ProxyError::NotConfigured) => {
                    debug!(strategy = strategy.name(), "Proxy strategy not configured, skipping");
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Proxy strategy failed");
                }
            }
        }

        warn!("No proxy configured, proceeding with direct egress");
        context.replace(ProxyState::direct())
    }
}
