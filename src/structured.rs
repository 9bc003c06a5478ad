//! Structured retrieval: profile lookup followed by per-publication detail fill.
//!
//! [`ScholarSource`] is the seam to the source's semi-typed objects.
//! [`StructuredClient`] adds the retry policy and normalization on top of it.
//! [`ProfilePageSource`] is the production source, reading the profile page
//! and each publication's citation-detail page.

use crate::config::FetchConfig;
use crate::error::{ExtractionError, LookupError, StrategyError, StructuredError, TransportError};
use crate::extract::RecordExtractor;
use crate::gscholar::{self, first_text};
use crate::orchestrator::{DataSource, FetchRequest, RetrievalStrategy, Retrieved};
use crate::record::{sort_by_recency, PublicationRecord, YearRange};
use crate::transport::{jitter, TransportClient};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Publication as listed on the profile, before detail fill
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublicationStub {
    pub title: String,
    pub year: Option<i32>,
    pub authors: Option<String>,
    pub citations: u32,
    /// Absolute link to the publication's detail page
    pub detail_url: Option<String>,
}

/// Author profile as returned by a lookup
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthorProfile {
    pub name: String,
    /// `None` when the response lacks the publication list entirely
    pub publications: Option<Vec<PublicationStub>>,
    /// Listed publications that could not be read, one message each
    pub unreadable: Vec<String>,
}

/// Fields available from a publication's detail view
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublicationDetail {
    pub title: Option<String>,
    pub authors: Option<String>,
    pub year: Option<i32>,
    pub abstract_text: Option<String>,
    pub citations: Option<u32>,
    pub url: Option<String>,
}

/// Source of author profiles and publication details
#[async_trait]
pub trait ScholarSource: Send + Sync {
    /// Look up a profile; `Ok(None)` means the source returned nothing usable
    async fn lookup_profile(&self, profile_id: &str) -> Result<Option<AuthorProfile>, LookupError>;

    /// Fetch details for one publication
    async fn fill_publication(&self, stub: &PublicationStub) -> Result<PublicationDetail, LookupError>;
}

/// Attempts and backoff window for profile lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_min: config.backoff_min,
            backoff_max: config.backoff_max,
        }
    }
}

/// Retrieval through a [`ScholarSource`] with bounded retries
pub struct StructuredClient<S> {
    source: S,
    retry: RetryPolicy,
}

impl<S: ScholarSource> StructuredClient<S> {
    pub fn new(source: S, retry: RetryPolicy) -> Self {
        Self { source, retry }
    }

    /// Fetch and normalize every in-range publication of a profile.
    ///
    /// One failing detail fill skips that publication only. A profile whose
    /// lookup never succeeds, or that comes back without a publication list,
    /// is an error rather than an empty result.
    pub async fn fetch_all(
        &self,
        profile_id: &str,
        range: &YearRange,
    ) -> Result<Retrieved, StructuredError> {
        let profile = self.lookup_with_retry(profile_id).await?;

        let Some(stubs) = profile.publications else {
            return Err(StructuredError::MalformedResponse(format!(
                "profile '{}' has no publication list",
                profile_id
            )));
        };
        if stubs.is_empty() && !profile.unreadable.is_empty() {
            return Err(StructuredError::MalformedResponse(format!(
                "none of the {} listed publications of '{}' could be read",
                profile.unreadable.len(),
                profile_id
            )));
        }

        info!(
            profile = profile_id,
            author = %profile.name,
            publications = stubs.len(),
            "Profile retrieved"
        );

        let mut retrieved = Retrieved {
            warnings: profile.unreadable,
            ..Default::default()
        };
        for stub in stubs.iter().filter(|s| range.admits(s.year)) {
            match self.source.fill_publication(stub).await {
                Ok(detail) => retrieved.records.push(normalize(stub, detail)),
                Err(e) => {
                    warn!(title = %stub.title, error = %e, "Skipping publication, detail fill failed");
                    retrieved
                        .warnings
                        .push(format!("skipped publication '{}': {}", stub.title, e));
                }
            }
        }

        sort_by_recency(&mut retrieved.records);
        Ok(retrieved)
    }

    async fn lookup_with_retry(&self, profile_id: &str) -> Result<AuthorProfile, StructuredError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=max_attempts {
            debug!(profile = profile_id, attempt, "Looking up profile");
            match self.source.lookup_profile(profile_id).await {
                Ok(Some(profile)) => return Ok(profile),
                Ok(None) => {
                    warn!(profile = profile_id, attempt, "Profile lookup returned nothing");
                    last = "empty lookup result".to_string();
                }
                Err(LookupError::NotFound) => {
                    return Err(StructuredError::ProfileNotFound(profile_id.to_string()));
                }
                Err(e) => {
                    warn!(profile = profile_id, attempt, error = %e, "Profile lookup failed");
                    last = e.to_string();
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(jitter(self.retry.backoff_min, self.retry.backoff_max)).await;
            }
        }

        Err(StructuredError::TransientFailure {
            attempts: max_attempts,
            last,
        })
    }
}

#[async_trait]
impl<S: ScholarSource> RetrievalStrategy for StructuredClient<S> {
    fn name(&self) -> &str {
        "structured"
    }

    fn source(&self) -> DataSource {
        DataSource::Structured
    }

    async fn attempt(&self, request: &FetchRequest) -> Result<Retrieved, StrategyError> {
        Ok(self.fetch_all(&request.profile_id, &request.year_range).await?)
    }
}

/// Merge a stub with its detail view
fn normalize(stub: &PublicationStub, detail: PublicationDetail) -> PublicationRecord {
    let title = detail
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| stub.title.clone());
    let citations = if stub.citations > 0 {
        stub.citations
    } else {
        detail.citations.unwrap_or(0)
    };

    PublicationRecord::new(title)
        .with_year(stub.year.or(detail.year))
        .with_authors(detail.authors.or_else(|| stub.authors.clone()).unwrap_or_default())
        .with_citations(citations)
        .with_abstract(detail.abstract_text)
        .with_url(detail.url.or_else(|| stub.detail_url.clone()))
}

struct DetailSelectors {
    profile_name: Selector,
    publication_table: Selector,
    title: Selector,
    title_link: Selector,
    field_row: Selector,
    field_name: Selector,
    field_value: Selector,
    cited_by: Regex,
}

impl DetailSelectors {
    fn compile() -> Result<Self, ExtractionError> {
        let s = |css: &str| gscholar::selector(css).map_err(ExtractionError::Selector);
        Ok(Self {
            profile_name: s("#gsc_prf_in")?,
            publication_table: s("#gsc_a_b")?,
            title: s("#gsc_oci_title")?,
            title_link: s("a.gsc_oci_title_link")?,
            field_row: s("#gsc_oci_table .gs_scl")?,
            field_name: s(".gsc_oci_field")?,
            field_value: s(".gsc_oci_value")?,
            // English ("Cited by 12") and Chinese ("被引用 12 次") labels
            cited_by: Regex::new(r"(?:Cited by\s*|被引用\s*)(\d+)")
                .map_err(|e| ExtractionError::Selector(e.to_string()))?,
        })
    }
}

/// [`ScholarSource`] backed by the profile and citation-detail pages
pub struct ProfilePageSource {
    transport: Arc<TransportClient>,
    base_url: String,
    extractor: RecordExtractor,
    selectors: DetailSelectors,
}

impl ProfilePageSource {
    pub fn new(config: &FetchConfig, transport: Arc<TransportClient>) -> Result<Self, ExtractionError> {
        Ok(Self {
            transport,
            base_url: config.base_url.clone(),
            extractor: RecordExtractor::new(&config.base_url)?,
            selectors: DetailSelectors::compile()?,
        })
    }

    async fn get_page(&self, url: &Url) -> Result<String, LookupError> {
        let response = self.transport.get(url, true).await.map_err(|e| match e {
            TransportError::Status(404) => LookupError::NotFound,
            other => LookupError::Transport(other),
        })?;
        if gscholar::is_blocked_page(&response.body) {
            return Err(LookupError::Blocked);
        }
        Ok(response.body)
    }

    /// Parse a profile page; `None` when it carries no profile at all
    pub fn parse_profile(&self, html: &str) -> Option<AuthorProfile> {
        let document = Html::parse_document(html);
        let root = document.root_element();

        let name = first_text(&root, &self.selectors.profile_name)?;

        if document.select(&self.selectors.publication_table).next().is_none() {
            return Some(AuthorProfile {
                name,
                publications: None,
                unreadable: Vec::new(),
            });
        }

        let mut stubs = Vec::new();
        let mut unreadable = Vec::new();
        for (index, entry) in self.extractor.parse_entries(&document).into_iter().enumerate() {
            match entry {
                Ok(record) => stubs.push(PublicationStub {
                    title: record.title,
                    year: record.year,
                    authors: Some(record.authors).filter(|a| a != crate::record::UNKNOWN_AUTHORS),
                    citations: record.citation_count,
                    detail_url: record.url,
                }),
                Err(reason) => {
                    let err = ExtractionError::Entry { index, reason };
                    warn!(error = %err, "Unreadable profile row");
                    unreadable.push(format!("skipped publication {}", err));
                }
            }
        }

        Some(AuthorProfile {
            name,
            publications: Some(stubs),
            unreadable,
        })
    }

    /// Parse a citation-detail page
    pub fn parse_detail(&self, html: &str) -> Result<PublicationDetail, LookupError> {
        let document = Html::parse_document(html);
        let root = document.root_element();
        let sel = &self.selectors;

        let title_elem = document
            .select(&sel.title)
            .next()
            .ok_or_else(|| LookupError::Parse("detail page has no title".to_string()))?;

        let mut detail = PublicationDetail {
            title: Some(title_elem.text().collect::<String>().trim().to_string()),
            url: root
                .select(&sel.title_link)
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| gscholar::resolve_link(&self.base_url, href))
                .map(|u| u.to_string()),
            ..Default::default()
        };

        for row in document.select(&sel.field_row) {
            let Some(field) = first_text(&row, &sel.field_name) else {
                continue;
            };
            let Some(value) = first_text(&row, &sel.field_value) else {
                continue;
            };

            match field.to_lowercase().as_str() {
                "authors" | "inventors" => detail.authors = Some(value),
                "publication date" => detail.year = gscholar::find_year(&value),
                "description" => detail.abstract_text = Some(value),
                "total citations" => {
                    detail.citations = sel
                        .cited_by
                        .captures(&value)
                        .and_then(|c| c.get(1))
                        .and_then(|m| m.as_str().parse().ok());
                }
                _ => {}
            }
        }

        Ok(detail)
    }
}

#[async_trait]
impl ScholarSource for ProfilePageSource {
    async fn lookup_profile(&self, profile_id: &str) -> Result<Option<AuthorProfile>, LookupError> {
        let url = gscholar::profile_url(&self.base_url, profile_id)?;
        let html = self.get_page(&url).await?;
        Ok(self.parse_profile(&html))
    }

    async fn fill_publication(&self, stub: &PublicationStub) -> Result<PublicationDetail, LookupError> {
        let link = stub
            .detail_url
            .as_deref()
            .ok_or_else(|| LookupError::Parse("publication has no detail link".to_string()))?;
        let url = Url::parse(link).map_err(|e| LookupError::Parse(format!("bad detail link: {}", e)))?;
        let html = self.get_page(&url).await?;
        self.parse_detail(&html)
    }
}
