//! Markup extraction of profile publications.
//!
//! [`RecordExtractor`] turns a profile page into [`PublicationRecord`]s, one
//! table row at a time. A bad row becomes a warning and the rest still parse.
//! [`MarkupFallback`] downloads the page and runs the extractor; it is the
//! last resort when the structured client fails, and it cannot supply abstracts.

use crate::config::FetchConfig;
use crate::error::{ExtractionError, StrategyError, TransportError};
use crate::gscholar::{self, first_text};
use crate::orchestrator::{DataSource, FetchRequest, RetrievalStrategy, Retrieved};
use crate::record::{sort_by_recency, PublicationRecord, YearRange};
use crate::transport::TransportClient;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Records pulled from one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// In-range records, newest first
    pub records: Vec<PublicationRecord>,
    /// One message per skipped entry
    pub warnings: Vec<String>,
    /// Entries that parsed, whether or not they were in range
    pub entries_parsed: usize,
}

struct Selectors {
    row: Selector,
    row_alt: Selector,
    title: Selector,
    any_link: Selector,
    year: Selector,
    authors: Selector,
    citations: Selector,
}

impl Selectors {
    fn compile() -> Result<Self, ExtractionError> {
        let s = |css: &str| gscholar::selector(css).map_err(ExtractionError::Selector);
        Ok(Self {
            row: s("tr.gsc_a_tr")?,
            row_alt: s("div.gsc_a_tr")?,
            title: s("a.gsc_a_at")?,
            any_link: s("a")?,
            year: s(".gsc_a_y")?,
            authors: s("div.gs_gray")?,
            // count link sits in the `gsc_a_c` cell; older layouts tag the link itself
            citations: s(".gsc_a_c a, a.gsc_a_ac, a.gsc_a_c")?,
        })
    }
}

/// Parses profile pages into publication records
pub struct RecordExtractor {
    base_url: String,
    selectors: Selectors,
}

impl RecordExtractor {
    /// `base_url` is used to absolutize publication links
    pub fn new(base_url: &str) -> Result<Self, ExtractionError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            selectors: Selectors::compile()?,
        })
    }

    /// Extract in-range publications from a profile page.
    ///
    /// Entries without a year are kept; entries with a year outside `range`
    /// are dropped. Fails only when the document as a whole is unusable.
    pub fn extract(&self, markup: &str, range: &YearRange) -> Result<Extraction, ExtractionError> {
        if markup.trim().is_empty() {
            return Err(ExtractionError::Unparsable("empty document".to_string()));
        }
        if gscholar::is_blocked_page(markup) {
            return Err(ExtractionError::Blocked);
        }

        let document = Html::parse_document(markup);
        let entries = self.parse_entries(&document);

        if entries.is_empty() && !gscholar::is_profile_page(markup) {
            return Err(ExtractionError::Unparsable(
                "no profile or publication table found".to_string(),
            ));
        }

        debug!(entries = entries.len(), "Found publication entries");

        let mut extraction = Extraction::default();
        for (index, entry) in entries.into_iter().enumerate() {
            match entry {
                Ok(record) => {
                    extraction.entries_parsed += 1;
                    if record.year.is_some_and(|y| !range.contains(y)) {
                        continue;
                    }
                    extraction.records.push(record);
                }
                Err(reason) => {
                    let err = ExtractionError::Entry { index, reason };
                    warn!(error = %err, "Skipping publication");
                    extraction.warnings.push(format!("skipped publication {}", err));
                }
            }
        }

        sort_by_recency(&mut extraction.records);
        Ok(extraction)
    }

    /// Parse every publication row, unfiltered and in page order
    pub(crate) fn parse_entries(&self, document: &Html) -> Vec<Result<PublicationRecord, String>> {
        let mut rows: Vec<ElementRef<'_>> = document.select(&self.selectors.row).collect();
        if rows.is_empty() {
            rows = document.select(&self.selectors.row_alt).collect();
        }
        rows.iter().map(|row| self.parse_entry(row)).collect()
    }

    fn parse_entry(&self, row: &ElementRef<'_>) -> Result<PublicationRecord, String> {
        let sel = &self.selectors;

        let link = row
            .select(&sel.title)
            .next()
            .or_else(|| row.select(&sel.any_link).next())
            .ok_or_else(|| "missing title link".to_string())?;
        let title = link.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            return Err("empty title".to_string());
        }

        let url = link
            .value()
            .attr("href")
            .and_then(|href| gscholar::resolve_link(&self.base_url, href))
            .map(|u| u.to_string());

        let year = first_text(row, &sel.year).and_then(|t| gscholar::find_year(&t));

        let authors = first_text(row, &sel.authors).unwrap_or_default();

        let citations = match first_text(row, &sel.citations) {
            Some(text) => parse_citation_count(&text)?,
            None => 0,
        };

        Ok(PublicationRecord::new(title)
            .with_year(year)
            .with_authors(authors)
            .with_citations(citations)
            .with_url(url))
    }
}

/// Citation count from a text field, non-digits stripped.
///
/// Empty and `-` mean zero; a number that does not fit is an error.
pub fn parse_citation_count(text: &str) -> Result<u32, String> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Ok(0);
    }
    digits
        .parse()
        .map_err(|_| format!("citation count '{}' out of range", text.trim()))
}

/// Retrieval by downloading and scraping the profile page
pub struct MarkupFallback {
    transport: Arc<TransportClient>,
    extractor: RecordExtractor,
    base_url: String,
}

impl MarkupFallback {
    pub fn new(config: &FetchConfig, transport: Arc<TransportClient>) -> Result<Self, ExtractionError> {
        Ok(Self {
            transport,
            extractor: RecordExtractor::new(&config.base_url)?,
            base_url: config.base_url.clone(),
        })
    }

    /// Fetch the profile page and extract in-range records
    pub async fn fetch_from_markup(
        &self,
        profile_id: &str,
        range: &YearRange,
    ) -> Result<Extraction, StrategyError> {
        let url = gscholar::profile_url(&self.base_url, profile_id)?;
        info!(profile = profile_id, "Fetching profile page for markup extraction");

        let response = match self.transport.get(&url, true).await {
            Ok(response) => response,
            Err(TransportError::Status(404)) => {
                return Err(StrategyError::ProfileNotFound(profile_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let extraction = self.extractor.extract(&response.body, range)?;
        if extraction.entries_parsed == 0 {
            return Err(ExtractionError::NoEntries.into());
        }

        info!(
            profile = profile_id,
            parsed = extraction.entries_parsed,
            in_range = extraction.records.len(),
            skipped = extraction.warnings.len(),
            "Markup extraction complete"
        );
        Ok(extraction)
    }
}

#[async_trait]
impl RetrievalStrategy for MarkupFallback {
    fn name(&self) -> &str {
        "markup"
    }

    fn source(&self) -> DataSource {
        DataSource::MarkupFallback
    }

    async fn attempt(&self, request: &FetchRequest) -> Result<Retrieved, StrategyError> {
        let extraction = self
            .fetch_from_markup(&request.profile_id, &request.year_range)
            .await?;
        Ok(Retrieved {
            records: extraction.records,
            warnings: extraction.warnings,
        })
    }
}
