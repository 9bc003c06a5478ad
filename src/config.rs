//! Runtime configuration.
//!
//! [`FetchConfig`] carries endpoints, timeouts and pacing. [`ProxyCredentials`]
//! is read once from the environment when the proxy registry is built; a
//! provider with missing credentials is simply skipped.

use std::time::Duration;

/// Default Google Scholar URL
pub const DEFAULT_SCHOLAR_URL: &str = "https://scholar.google.com";

/// Endpoint used to check that a proxy candidate actually forwards traffic
pub const DEFAULT_PROBE_URL: &str = "http://httpbin.org/ip";

/// Cloud instance metadata endpoint used for native egress detection
pub const DEFAULT_METADATA_URL: &str =
    "http://169.254.169.254/metadata/instance?api-version=2021-02-01";

/// Settings shared by the transport, the clients and the orchestrator
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Base URL of the profile source (overridable for mirrors and tests)
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// TCP/TLS connect timeout
    pub connect_timeout: Duration,
    /// Lower bound of the random pause before each request
    pub delay_min: Duration,
    /// Upper bound of the random pause before each request
    pub delay_max: Duration,
    /// Profile lookup attempts made by the structured client
    pub max_attempts: u32,
    /// Lower bound of the backoff between lookup attempts
    pub backoff_min: Duration,
    /// Upper bound of the backoff between lookup attempts
    pub backoff_max: Duration,
    /// Liveness probe target for proxy candidates
    pub probe_url: String,
    /// Timeout for a proxy liveness probe
    pub probe_timeout: Duration,
    /// Metadata endpoint for native egress detection
    pub metadata_url: String,
    /// Timeout for the metadata probe
    pub metadata_timeout: Duration,
    /// Optional deadline for a whole fetch
    pub fetch_timeout: Option<Duration>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SCHOLAR_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            delay_min: Duration::from_secs(1),
            delay_max: Duration::from_secs(4),
            max_attempts: 3,
            backoff_min: Duration::from_secs(2),
            backoff_max: Duration::from_secs(5),
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_timeout: Duration::from_secs(10),
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            metadata_timeout: Duration::from_secs(2),
            fetch_timeout: None,
        }
    }
}

impl FetchConfig {
    /// Point the clients at a different source, e.g. a mirror
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Disable request pacing and retry backoff
    pub fn without_delays(mut self) -> Self {
        self.delay_min = Duration::ZERO;
        self.delay_max = Duration::ZERO;
        self.backoff_min = Duration::ZERO;
        self.backoff_max = Duration::ZERO;
        self
    }
}

/// Credentials for the proxy providers, keyed by environment variable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyCredentials {
    /// Probe the cloud metadata endpoint before trying any provider
    pub detect_native_egress: bool,
    pub scraperapi_key: Option<String>,
    pub smartproxy_user: Option<String>,
    pub smartproxy_pass: Option<String>,
    pub brightdata_user: Option<String>,
    pub brightdata_pass: Option<String>,
    /// Proxy URLs such as `http://10.0.0.2:3128`
    pub custom_proxies: Vec<String>,
    pub enable_tor: bool,
}

impl ProxyCredentials {
    /// Read credentials from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read credentials through an arbitrary key-value lookup.
    ///
    /// Blank values count as absent.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let flag = |key: &str, default: bool| {
            get(key)
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(default)
        };

        Self {
            detect_native_egress: flag("SCHOLAR_NATIVE_EGRESS", true),
            scraperapi_key: get("SCRAPERAPI_KEY"),
            smartproxy_user: get("SMARTPROXY_USER"),
            smartproxy_pass: get("SMARTPROXY_PASS"),
            brightdata_user: get("BRIGHTDATA_USER"),
            brightdata_pass: get("BRIGHTDATA_PASS"),
            custom_proxies: get("CUSTOM_PROXIES")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            enable_tor: flag("ENABLE_TOR", false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_environment() {
        let creds = ProxyCredentials::from_lookup(|_| None);
        assert!(creds.detect_native_egress);
        assert!(creds.scraperapi_key.is_none());
        assert!(creds.custom_proxies.is_empty());
        assert!(!creds.enable_tor);
    }

    #[test]
    fn test_parses_lists_and_flags() {
        let creds = ProxyCredentials::from_lookup(lookup(&[
            ("SCRAPERAPI_KEY", "  key123 "),
            ("SMARTPROXY_USER", ""),
            ("CUSTOM_PROXIES", "http://a:1, ,http://b:2"),
            ("ENABLE_TOR", "TRUE"),
            ("SCHOLAR_NATIVE_EGRESS", "false"),
        ]));
        assert_eq!(creds.scraperapi_key.as_deref(), Some("key123"));
        assert!(creds.smartproxy_user.is_none());
        assert_eq!(creds.custom_proxies, vec!["http://a:1", "http://b:2"]);
        assert!(creds.enable_tor);
        assert!(!creds.detect_native_egress);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = FetchConfig::default().with_base_url("http://127.0.0.1:8080/");
        assert_eq!(config.base_url, "http://127.0.0.1:8080");
    }
}
