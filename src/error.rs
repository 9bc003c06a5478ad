//! Error types for scholar-fetch.
//!
//! Errors are layered the same way the pipeline is: transport errors feed
//! source lookups, lookups feed strategies, strategies feed the orchestrator.
//! Per-entry extraction problems never leave the extractor; they become warnings.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Caller input rejected before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// Profile identifier is empty or whitespace
    #[error("profile id must not be empty")]
    EmptyProfileId,

    /// Year range with start after end
    #[error("invalid year range: start {start} is after end {end}")]
    InvalidYearRange {
        /// First year of the range
        start: i32,
        /// Last year of the range
        end: i32,
    },

    /// Year outside the supported 4-digit window
    #[error("year {0} is outside the supported range 1000-9999")]
    YearOutOfBounds(i32),
}

/// HTTP-level failure from the transport client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Non-2xx response
    #[error("HTTP status {0}")]
    Status(u16),

    /// Request or connect timeout elapsed
    #[error("request timed out")]
    Timeout,

    /// TCP/TLS connection could not be established
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// Any other network failure (body read, redirect loop, ...)
    #[error("network error: {0}")]
    Network(String),

    /// The HTTP client itself could not be built (bad proxy URL, TLS backend)
    #[error("client error: {0}")]
    Client(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::ConnectionRefused(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status(status.as_u16())
        } else if err.is_builder() {
            TransportError::Client(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Why a proxy strategy did not produce a usable configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    /// Strategy has no credentials or is disabled
    #[error("not configured")]
    NotConfigured,

    /// Every candidate failed its liveness probe
    #[error("liveness probe failed: {0}")]
    ProbeFailed(String),

    /// Candidate configuration could not be turned into a client
    #[error("invalid proxy configuration: {0}")]
    Invalid(String),
}

impl From<TransportError> for ProxyError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Client(msg) => ProxyError::Invalid(msg),
            other => ProxyError::ProbeFailed(other.to_string()),
        }
    }
}

/// Failure reported by a [`crate::structured::ScholarSource`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// The source says the profile or publication does not exist
    #[error("not found")]
    NotFound,

    /// Network failure while talking to the source
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Source answered with a CAPTCHA or block page
    #[error("blocked by anti-abuse check")]
    Blocked,

    /// Response could not be interpreted
    #[error("parse error: {0}")]
    Parse(String),
}

/// Failure of the structured client as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuredError {
    /// Profile does not exist; retrying will not help
    #[error("profile '{0}' not found")]
    ProfileNotFound(String),

    /// Lookup kept failing until the retry bound was exhausted
    #[error("profile lookup failed after {attempts} attempts: {last}")]
    TransientFailure {
        /// Number of lookup attempts made
        attempts: u32,
        /// Description of the last failure
        last: String,
    },

    /// Lookup succeeded but the response lacks the publication collection
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Markup extraction failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// Page is a CAPTCHA / unusual-traffic interstitial
    #[error("CAPTCHA or unusual-traffic page returned")]
    Blocked,

    /// Document is not a profile page at all
    #[error("unparsable document: {0}")]
    Unparsable(String),

    /// A CSS selector failed to compile
    #[error("selector error: {0}")]
    Selector(String),

    /// Non-empty page yielded no usable publication entries
    #[error("page contained no publication entries")]
    NoEntries,

    /// A single entry could not be parsed; always absorbed as a warning
    #[error("entry {index}: {reason}")]
    Entry {
        /// Zero-based position of the entry in the document
        index: usize,
        /// What was wrong with it
        reason: String,
    },
}

/// Failure of one retrieval strategy, as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    /// Structured client failed
    #[error(transparent)]
    Structured(#[from] StructuredError),

    /// Page download failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Page downloaded but could not be extracted
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// Source reported that the profile does not exist
    #[error("profile '{0}' not found")]
    ProfileNotFound(String),
}

/// One strategy's failure inside a composite [`FetchError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    /// Strategy name, e.g. "structured"
    pub strategy: String,
    /// Why it failed
    pub error: StrategyError,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.error)
    }
}

/// Top-level error returned from [`crate::orchestrator::FetchOrchestrator::fetch`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Caller input was invalid; nothing was fetched
    #[error("input error: {0}")]
    Input(#[from] InputError),

    /// Every retrieval strategy failed
    #[error("all retrieval strategies failed: {}", join_failures(.failures))]
    AllStrategiesFailed {
        /// Failures in the order the strategies were attempted
        failures: Vec<StrategyFailure>,
    },

    /// Whole-fetch deadline elapsed
    #[error("fetch timed out after {0:?}")]
    TimedOut(Duration),
}

/// Failure writing a fetch outcome to a sink.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Unknown output format name
    #[error("unknown output format '{0}' (expected text, json or csv)")]
    UnknownFormat(String),
}

fn join_failures(failures: &[StrategyFailure]) -> String {
    if failures.is_empty() {
        return "no strategies configured".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias using `FetchError`
pub type Result<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_error_names_every_strategy() {
        let err = FetchError::AllStrategiesFailed {
            failures: vec![
                StrategyFailure {
                    strategy: "structured".to_string(),
                    error: StructuredError::TransientFailure {
                        attempts: 3,
                        last: "request timed out".to_string(),
                    }
                    .into(),
                },
                StrategyFailure {
                    strategy: "markup".to_string(),
                    error: TransportError::Timeout.into(),
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains("structured: profile lookup failed after 3 attempts"));
        assert!(msg.contains("markup: request timed out"));
    }

    #[test]
    fn test_input_error_display() {
        let err = InputError::InvalidYearRange {
            start: 2024,
            end: 2020,
        };
        assert_eq!(
            err.to_string(),
            "invalid year range: start 2024 is after end 2020"
        );
    }
}
