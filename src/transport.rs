//! HTTP transport with browser-like headers, request pacing and proxy routing.
//!
//! Every call sleeps a random delay first, then goes out with a freshly drawn
//! User-Agent / Accept-Language pair. Retries are left to callers.

use crate::config::FetchConfig;
use crate::error::TransportError;
use crate::proxy::{ProxyContext, ProxyState};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// User agents rotated across requests
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
];

const ACCEPT_LANGUAGES: &[&str] = &["en-US,en;q=0.9", "en-GB,en;q=0.8", "en-US,en;q=0.5"];

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// Status and body of a successful response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Client for the profile source.
///
/// Holds one direct client and one proxied client that is rebuilt whenever
/// the proxy snapshot changes.
pub struct TransportClient {
    proxy: ProxyContext,
    direct: reqwest::Client,
    proxied: Mutex<Option<(Arc<ProxyState>, reqwest::Client)>>,
    request_timeout: Duration,
    connect_timeout: Duration,
    delay_min: Duration,
    delay_max: Duration,
}

impl TransportClient {
    pub fn new(config: &FetchConfig, proxy: ProxyContext) -> Result<Self, TransportError> {
        let direct = client_builder(config.request_timeout, config.connect_timeout)
            .build()
            .map_err(|e| TransportError::Client(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            proxy,
            direct,
            proxied: Mutex::new(None),
            request_timeout: config.request_timeout,
            connect_timeout: config.connect_timeout,
            delay_min: config.delay_min,
            delay_max: config.delay_max,
        })
    }

    /// GET a page
    pub async fn get(&self, url: &Url, use_proxy: bool) -> Result<RawResponse, TransportError> {
        let client = self.client_for(use_proxy)?;
        self.pause().await;
        debug!(url = %url, use_proxy, "GET");
        self.send(client.get(url.as_str())).await
    }

    /// POST a form
    pub async fn post(
        &self,
        url: &Url,
        form: &[(&str, &str)],
        use_proxy: bool,
    ) -> Result<RawResponse, TransportError> {
        let client = self.client_for(use_proxy)?;
        self.pause().await;
        debug!(url = %url, use_proxy, "POST");
        self.send(client.post(url.as_str()).form(form)).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<RawResponse, TransportError> {
        let response = request.headers(browser_headers()).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Request failed");
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(RawResponse {
            status: status.as_u16(),
            body,
        })
    }

    /// Pick the client matching the request and the current proxy snapshot
    fn client_for(&self, use_proxy: bool) -> Result<reqwest::Client, TransportError> {
        if !use_proxy {
            return Ok(self.direct.clone());
        }

        let snapshot = self.proxy.snapshot();
        let Some(endpoints) = snapshot.transport.as_ref().filter(|t| !t.is_empty()) else {
            return Ok(self.direct.clone());
        };

        let mut cached = self.proxied.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((state, client)) = cached.as_ref() {
            if Arc::ptr_eq(state, &snapshot) {
                return Ok(client.clone());
            }
        }

        let client = endpoints
            .apply(client_builder(self.request_timeout, self.connect_timeout))?
            .build()
            .map_err(|e| TransportError::Client(format!("Failed to build proxied client: {}", e)))?;
        debug!(strategy = ?snapshot.active_strategy, "Built proxied HTTP client");
        *cached = Some((Arc::clone(&snapshot), client.clone()));
        Ok(client)
    }

    async fn pause(&self) {
        let delay = jitter(self.delay_min, self.delay_max);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn client_builder(timeout: Duration, connect_timeout: Duration) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .cookie_store(true)
}

/// Uniformly random duration in `[min, max]`
pub(crate) fn jitter(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let low = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
    let high = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}

/// Browser navigation headers with a rotated fingerprint
fn browser_headers() -> HeaderMap {
    let mut rng = rand::thread_rng();
    let user_agent = USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0]);
    let language = ACCEPT_LANGUAGES
        .choose(&mut rng)
        .copied()
        .unwrap_or(ACCEPT_LANGUAGES[0]);

    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(user_agent));
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(language));
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Pragma", HeaderValue::from_static("no-cache"));
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
    headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
    headers.insert("Sec-Fetch-User", HeaderValue::from_static("?1"));
    headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyEndpoints;
    use mockito::{Matcher, Server};

    fn client(proxy: ProxyContext) -> TransportClient {
        let config = FetchConfig::default().without_delays();
        TransportClient::new(&config, proxy).expect("client builds")
    }

    fn url(base: &str, path: &str) -> Url {
        Url::parse(&format!("{}{}", base, path)).expect("valid url")
    }

    #[tokio::test]
    async fn test_get_sends_browser_headers() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/citations")
            .match_header("user-agent", Matcher::Regex("^Mozilla/5.0".to_string()))
            .match_header("accept-language", Matcher::Regex("^en".to_string()))
            .match_header("sec-fetch-mode", "navigate")
            .with_status(200)
            .with_body("<html>ok</html>")
            .create_async()
            .await;

        let response = client(ProxyContext::new())
            .get(&url(&server.url(), "/citations"), true)
            .await
            .expect("request succeeds");

        assert_eq!(response.status, 200);
        assert_eq!(response.body, "<html>ok</html>");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let err = client(ProxyContext::new())
            .get(&url(&server.url(), "/missing"), false)
            .await
            .expect_err("404 should fail");

        assert_eq!(err, TransportError::Status(404));
    }

    #[tokio::test]
    async fn test_post_sends_form() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/form")
            .match_body(Matcher::UrlEncoded("user".to_string(), "abc".to_string()))
            .with_status(200)
            .with_body("done")
            .create_async()
            .await;

        let response = client(ProxyContext::new())
            .post(&url(&server.url(), "/form"), &[("user", "abc")], false)
            .await
            .expect("post succeeds");

        assert_eq!(response.body, "done");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let err = client(ProxyContext::new())
            .get(&url("http://127.0.0.1:1", "/"), false)
            .await
            .expect_err("nothing listens on port 1");

        assert!(matches!(err, TransportError::ConnectionRefused(_)));
    }

    #[tokio::test]
    async fn test_proxy_only_applied_when_requested() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_body("direct")
            .create_async()
            .await;

        let proxy = ProxyContext::new();
        proxy.replace(ProxyState {
            active_strategy: Some("custom".to_string()),
            transport: Some(ProxyEndpoints::uniform("not a proxy url")),
        });
        let transport = client(proxy);

        // the bogus proxy only matters when routing through it
        let direct = transport.get(&url(&server.url(), "/"), false).await;
        assert_eq!(direct.map(|r| r.body), Ok("direct".to_string()));

        let proxied = transport.get(&url(&server.url(), "/"), true).await;
        assert!(matches!(proxied, Err(TransportError::Client(_))));
    }

    #[test]
    fn test_jitter_stays_in_window() {
        let min = Duration::from_millis(10);
        let max = Duration::from_millis(20);
        for _ in 0..100 {
            let d = jitter(min, max);
            assert!(d >= min && d <= max);
        }
        assert_eq!(jitter(max, min), max);
    }
}
