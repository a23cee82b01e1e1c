//! Core data models used throughout Homewatch.
//!
//! These types represent the homework records, raw portal payloads, and
//! snapshots that flow through the scrape and query pipeline.

use chrono::NaiveDate;
use serde::Serialize;

use crate::markup::Node;

/// Hour label used when the source carries no lesson-slot information.
pub const UNKNOWN_HOUR: &str = "unknown";

/// Scrape mode selecting which portal view a payload came from and how
/// the extractor should interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The "current day" view: tree-shaped markup, dated relative to today.
    Daily,
    /// The multi-day retrospective view: a JSON document grouped by day.
    Historical,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Daily => "daily",
            Mode::Historical => "historical",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw portal payload after parsing, tagged by shape.
///
/// The extractor dispatches on the variant; a variant/mode mismatch is
/// treated as malformed input, not a panic.
#[derive(Debug, Clone)]
pub enum RawContent {
    /// Parsed markup tree (daily view).
    Tree(Node),
    /// Parsed JSON document (historical view).
    Document(serde_json::Value),
}

/// Canonical homework record produced by the extractor.
///
/// The tuple (date, hour, subject) is the record's identity: storage never
/// holds two rows with the same identity. `created_at`/`updated_at` live on
/// [`StoredRecord`] and are set by the store, never by the extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeworkRecord {
    /// Lesson date, `YYYY-MM-DD`.
    pub date: String,
    /// Lesson-slot label; [`UNKNOWN_HOUR`] when the source has none.
    pub hour: String,
    pub subject: String,
    /// Human-readable summary derived from topic/teacher metadata.
    pub description: String,
    /// The assignment text itself; never empty for a valid record.
    pub homework_text: String,
    /// Explicit due date if a source ever provides one; `None` in all
    /// currently known formats.
    pub due_date: Option<String>,
    pub teacher: Option<String>,
    pub class_description: Option<String>,
}

impl HomeworkRecord {
    pub fn identity(&self) -> (&str, &str, &str) {
        (&self.date, &self.hour, &self.subject)
    }
}

/// A [`HomeworkRecord`] plus storage metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: String,
    pub date: String,
    pub hour: String,
    pub subject: String,
    pub description: String,
    pub homework_text: String,
    pub due_date: Option<String>,
    pub teacher: Option<String>,
    pub class_description: Option<String>,
    /// RFC 3339 UTC, set on first insert.
    pub created_at: String,
    /// RFC 3339 UTC, bumped on every content change.
    pub updated_at: String,
}

/// Raw fetched payload persisted per (mode, date) before extraction, so a
/// day can be reparsed after an extractor fix.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: String,
    pub mode: String,
    pub date: String,
    pub content: String,
    /// sha256 of `content`, hex-encoded.
    pub content_hash: String,
    pub parser_version: i64,
    pub fetched_at: String,
}

/// Summary counters returned by one scrape run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScrapeSummary {
    pub extracted: u64,
    pub written: u64,
}

/// Formats a date as the canonical `YYYY-MM-DD` record form.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Normalizes an optional hour label, mapping absent/blank to the sentinel.
pub fn normalize_hour(hour: Option<&str>) -> String {
    match hour.map(str::trim) {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => UNKNOWN_HOUR.to_string(),
    }
}
