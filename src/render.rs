//! Output sinks for fetch results: numbered text, JSON, CSV.

use crate::error::RenderError;
use crate::orchestrator::FetchOutcome;
use crate::record::PublicationRecord;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

const SEPARATOR_WIDTH: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(RenderError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        };
        f.write_str(name)
    }
}

/// CSV column layout
#[derive(Serialize)]
struct CsvRow<'a> {
    title: &'a str,
    year: Option<i32>,
    authors: &'a str,
    citations: u32,
    url: Option<&'a str>,
    #[serde(rename = "abstract")]
    abstract_text: Option<&'a str>,
}

impl<'a> From<&'a PublicationRecord> for CsvRow<'a> {
    fn from(record: &'a PublicationRecord) -> Self {
        Self {
            title: &record.title,
            year: record.year,
            authors: &record.authors,
            citations: record.citation_count,
            url: record.url.as_deref(),
            abstract_text: record.abstract_text.as_deref(),
        }
    }
}

/// Numbered plain-text listing, one block per record
pub fn render_text(records: &[PublicationRecord]) -> String {
    let separator = "=".repeat(SEPARATOR_WIDTH);
    let mut out = String::new();

    for (i, record) in records.iter().enumerate() {
        let year = record
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "N/A".to_string());

        out.push_str(&format!("{}. {} ({})\n", i + 1, record.title, year));
        out.push_str(&format!("Authors: {}\n", record.authors));
        out.push_str(&format!("Citations: {}\n", record.citation_count));
        if let Some(abstract_text) = &record.abstract_text {
            out.push_str(&format!("Abstract: {}\n", abstract_text));
        }
        if let Some(url) = &record.url {
            out.push_str(&format!("URL: {}\n", url));
        }
        out.push('\n');
        out.push_str(&separator);
        out.push_str("\n\n");
    }

    out
}

/// Write records as CSV with a header row
pub fn write_csv<W: Write>(records: &[PublicationRecord], writer: W) -> Result<(), RenderError> {
    let mut wtr = csv::WriterBuilder::new().has_headers(true).from_writer(writer);
    for record in records {
        wtr.serialize(CsvRow::from(record))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write a whole outcome in the chosen format
pub fn write_outcome<W: Write>(
    outcome: &FetchOutcome,
    format: OutputFormat,
    mut writer: W,
) -> Result<(), RenderError> {
    match format {
        OutputFormat::Text => writer.write_all(render_text(&outcome.records).as_bytes())?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, outcome)?;
            writer.write_all(b"\n")?;
        }
        OutputFormat::Csv => write_csv(&outcome.records, &mut writer)?,
    }
    writer.flush()?;
    Ok(())
}

/// Write an outcome to `path`, or to stdout when `path` is `None`
pub fn save_outcome(
    outcome: &FetchOutcome,
    format: OutputFormat,
    path: Option<&Path>,
) -> Result<(), RenderError> {
    match path {
        Some(path) => write_outcome(outcome, format, BufWriter::new(File::create(path)?)),
        None => write_outcome(outcome, format, io::stdout().lock()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::DataSource;

    fn outcome() -> FetchOutcome {
        FetchOutcome {
            records: vec![
                PublicationRecord::new("Deep Learning")
                    .with_year(Some(2023))
                    .with_authors("Y LeCun, Y Bengio")
                    .with_citations(1500)
                    .with_abstract(Some("A review.".to_string()))
                    .with_url(Some("https://example.org/dl".to_string())),
                PublicationRecord::new("Notes, with \"quotes\"").with_year(Some(2021)),
            ],
            source: DataSource::Structured,
            warnings: vec!["skipped publication 'X': not found".to_string()],
        }
    }

    #[test]
    fn test_render_text() {
        let text = render_text(&outcome().records);
        let separator = "=".repeat(80);

        assert!(text.starts_with(
            "1. Deep Learning (2023)\nAuthors: Y LeCun, Y Bengio\nCitations: 1500\nAbstract: A review.\nURL: https://example.org/dl\n\n"
        ));
        assert!(text.contains(&format!(
            "2. Notes, with \"quotes\" (2021)\nAuthors: unknown\nCitations: 0\n\n{}\n\n",
            separator
        )));
        assert_eq!(text.matches(&separator).count(), 2);
    }

    #[test]
    fn test_render_text_empty() {
        assert_eq!(render_text(&[]), "");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().ok(), Some(OutputFormat::Json));
        assert_eq!("csv".parse::<OutputFormat>().ok(), Some(OutputFormat::Csv));
        assert!(matches!(
            "xml".parse::<OutputFormat>(),
            Err(RenderError::UnknownFormat(f)) if f == "xml"
        ));
    }

    #[test]
    fn test_json_output() {
        let mut buf = Vec::new();
        write_outcome(&outcome(), OutputFormat::Json, &mut buf).expect("writes");

        let value: serde_json::Value = serde_json::from_slice(&buf).expect("valid json");
        assert_eq!(value["source"], "structured");
        assert_eq!(value["records"][0]["citation_count"], 1500);
        assert_eq!(value["records"][0]["abstract"], "A review.");
        assert_eq!(value["records"][1]["abstract"], serde_json::Value::Null);
        assert_eq!(value["warnings"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_csv_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("papers.csv");

        save_outcome(&outcome(), OutputFormat::Csv, Some(&path)).expect("saves");

        let content = std::fs::read_to_string(&path).expect("readable");
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("title,year,authors,citations,url,abstract"));
        assert_eq!(
            lines.next(),
            Some("Deep Learning,2023,\"Y LeCun, Y Bengio\",1500,https://example.org/dl,A review.")
        );
        assert_eq!(lines.next(), Some("\"Notes, with \"\"quotes\"\"\",2021,unknown,0,,"));
        assert_eq!(lines.next(), None);
    }
}
