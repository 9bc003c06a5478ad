//! Publication records and the year-range filter.
//!
//! Every retrieval strategy normalizes its source-specific shape into
//! [`PublicationRecord`] before handing results upward.

use crate::error::InputError;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;

/// Authors value used when the source does not expose an author line
pub const UNKNOWN_AUTHORS: &str = "unknown";

const MIN_YEAR: i32 = 1000;
const MAX_YEAR: i32 = 9999;

/// A single publication from a researcher's profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    /// Publication title
    pub title: String,
    /// Publication year, `None` when the source shows none
    pub year: Option<i32>,
    /// Author line as free text
    pub authors: String,
    /// Number of citations
    pub citation_count: u32,
    /// Abstract, only available from the structured path
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    /// Link to the publication
    pub url: Option<String>,
}

impl PublicationRecord {
    /// Create a record with the given title and defaults everywhere else
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            year: None,
            authors: UNKNOWN_AUTHORS.to_string(),
            citation_count: 0,
            abstract_text: None,
            url: None,
        }
    }

    /// Set the year
    pub fn with_year(mut self, year: Option<i32>) -> Self {
        self.year = year;
        self
    }

    /// Set the author line, keeping the default if blank
    pub fn with_authors(mut self, authors: impl AsRef<str>) -> Self {
        let authors = authors.as_ref().trim();
        if !authors.is_empty() {
            self.authors = authors.to_string();
        }
        self
    }

    /// Set the citation count
    pub fn with_citations(mut self, count: u32) -> Self {
        self.citation_count = count;
        self
    }

    /// Set the abstract, ignoring blank text
    pub fn with_abstract(mut self, text: Option<String>) -> Self {
        self.abstract_text = text.filter(|t| !t.trim().is_empty());
        self
    }

    /// Set the URL, ignoring blank values
    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url.filter(|u| !u.trim().is_empty());
        self
    }
}

/// Inclusive range of publication years.
///
/// Only constructible through [`YearRange::new`], so `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct YearRange {
    start: i32,
    end: i32,
}

impl YearRange {
    /// Validate and build a range
    pub fn new(start: i32, end: i32) -> Result<Self, InputError> {
        for year in [start, end] {
            if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
                return Err(InputError::YearOutOfBounds(year));
            }
        }
        if start > end {
            return Err(InputError::InvalidYearRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Whether a concrete year lies in the range
    pub fn contains(&self, year: i32) -> bool {
        self.start <= year && year <= self.end
    }

    /// Range predicate for records: absent year never matches
    pub fn admits(&self, year: Option<i32>) -> bool {
        year.is_some_and(|y| self.contains(y))
    }
}

/// Stable sort by year descending; absent years go last.
pub fn sort_by_recency(records: &mut [PublicationRecord]) {
    // Option<i32> orders None below Some, so Reverse puts it last
    records.sort_by_key(|r| Reverse(r.year));
}

/// Drop repeated publications, keeping the first occurrence.
///
/// Two records are the same publication when their whitespace-normalized,
/// lowercased titles, their years and their author lines match.
pub fn dedup_records(records: Vec<PublicationRecord>) -> Vec<PublicationRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert((normalize_text(&r.title), r.year, normalize_text(&r.authors))))
        .collect()
}

fn normalize_text(text: &str) -> String {
    text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
