//! Keyword classification of free-text questions and advisory filtering of
//! stored records.
//!
//! Classification is deliberately shallow: a handful of regexes over the
//! lowercased question, Hebrew and English alternates side by side. The
//! filter narrows a subject-grouped record set by the classified intent but
//! never narrows it to nothing; an over-constrained filter falls back to the
//! unfiltered input.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use regex::Regex;

use crate::models::{format_date, StoredRecord};

/// What a question appears to ask for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryIntent {
    pub about_today: bool,
    pub about_tomorrow: bool,
    pub wants_all: bool,
    pub about_due_date: bool,
    /// Lowercased subject name found in the question, if any.
    pub subject_filter: Option<String>,
}

/// Compiled question patterns. Built once at startup and shared.
pub struct IntentClassifier {
    today: Regex,
    tomorrow: Regex,
    all: Regex,
    due_date: Regex,
    subjects: Vec<String>,
}

// Hebrew keywords are matched by bare containment because prefix letters
// attach to the word (להיום, ומחר); the English alternates keep word
// boundaries so "now" does not fire inside "know".
const TODAY_PATTERN: &str = r"(?i)\b(today|tonight|current|now)\b|היום";
const TOMORROW_PATTERN: &str = r"(?i)\b(tomorrow|next day)\b|מחר";
const ALL_PATTERN: &str = r"(?i)\b(all|everything|full|list)\b|הכל|הכול";
const DUE_DATE_PATTERN: &str = r"(?i)\b(due|deadline|when)\b|מתי|להגיש|הגשה";

const KNOWN_SUBJECTS: &[&str] = &[
    "מתמטיקה",
    "אנגלית",
    "עברית",
    "לשון",
    "ספרות",
    "תנך",
    "היסטוריה",
    "אזרחות",
    "גאוגרפיה",
    "גיאוגרפיה",
    "מדעים",
    "פיזיקה",
    "כימיה",
    "ביולוגיה",
    "ספורט",
    "מחשבים",
    "math",
    "english",
    "science",
    "computer",
    "history",
    "geography",
];

impl IntentClassifier {
    pub fn new() -> Self {
        let mut subjects: Vec<String> = KNOWN_SUBJECTS.iter().map(|s| s.to_string()).collect();
        // Longer names first so a containing name wins over a contained one.
        subjects.sort_by_key(|s| std::cmp::Reverse(s.chars().count()));
        Self {
            today: Regex::new(TODAY_PATTERN).unwrap(),
            tomorrow: Regex::new(TOMORROW_PATTERN).unwrap(),
            all: Regex::new(ALL_PATTERN).unwrap(),
            due_date: Regex::new(DUE_DATE_PATTERN).unwrap(),
            subjects,
        }
    }

    pub fn classify(&self, question: &str) -> QueryIntent {
        let q = question.to_lowercase();
        QueryIntent {
            about_today: self.today.is_match(&q),
            about_tomorrow: self.tomorrow.is_match(&q),
            wants_all: self.all.is_match(&q),
            about_due_date: self.due_date.is_match(&q),
            subject_filter: self
                .subjects
                .iter()
                .find(|s| q.contains(s.as_str()))
                .cloned(),
        }
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Groups records by subject. BTreeMap keeps subject order deterministic;
/// records inside a subject keep their input order.
pub fn group_by_subject(records: Vec<StoredRecord>) -> BTreeMap<String, Vec<StoredRecord>> {
    let mut grouped: BTreeMap<String, Vec<StoredRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.subject.clone()).or_default().push(record);
    }
    grouped
}

/// Narrows `grouped` by the classified intent. If every filter together
/// leaves nothing, the original input comes back unchanged.
pub fn filter_records(
    grouped: &BTreeMap<String, Vec<StoredRecord>>,
    intent: &QueryIntent,
    today: NaiveDate,
) -> BTreeMap<String, Vec<StoredRecord>> {
    let today_str = format_date(today);
    let tomorrow_str = today.succ_opt().map(format_date).unwrap_or_default();

    let mut filtered: BTreeMap<String, Vec<StoredRecord>> = BTreeMap::new();
    for (subject, records) in grouped {
        if let Some(wanted) = &intent.subject_filter {
            if subject.to_lowercase() != *wanted {
                continue;
            }
        }
        let surviving: Vec<StoredRecord> = records
            .iter()
            .filter(|r| {
                if intent.about_today && r.date != today_str {
                    return false;
                }
                if intent.about_tomorrow && r.date != tomorrow_str {
                    return false;
                }
                true
            })
            .cloned()
            .collect();
        if !surviving.is_empty() {
            filtered.insert(subject.clone(), surviving);
        }
    }

    if filtered.is_empty() {
        return grouped.clone();
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(date: &str, subject: &str) -> StoredRecord {
        StoredRecord {
            id: "x".to_string(),
            date: date.to_string(),
            hour: "1".to_string(),
            subject: subject.to_string(),
            description: String::new(),
            homework_text: "hw".to_string(),
            due_date: None,
            teacher: None,
            class_description: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn classifies_hebrew_questions() {
        let classifier = IntentClassifier::new();

        let intent = classifier.classify("מה יש להיום?");
        assert!(intent.about_today);
        assert!(!intent.about_tomorrow);

        let intent = classifier.classify("מה שיעורי הבית למחר?");
        assert!(intent.about_tomorrow);

        let intent = classifier.classify("תראה לי הכל");
        assert!(intent.wants_all);

        let intent = classifier.classify("מתי צריך להגיש?");
        assert!(intent.about_due_date);
    }

    #[test]
    fn classifies_english_with_word_boundaries() {
        let classifier = IntentClassifier::new();

        let intent = classifier.classify("What homework is due today?");
        assert!(intent.about_today);
        assert!(intent.about_due_date);

        // "know" must not trigger the "now" keyword.
        let intent = classifier.classify("I don't know the page");
        assert!(!intent.about_today);
    }

    #[test]
    fn finds_subject_in_question() {
        let classifier = IntentClassifier::new();

        let intent = classifier.classify("מה יש במתמטיקה?");
        assert_eq!(intent.subject_filter.as_deref(), Some("מתמטיקה"));

        let intent = classifier.classify("Any English homework?");
        assert_eq!(intent.subject_filter.as_deref(), Some("english"));

        let intent = classifier.classify("מה נשמע");
        assert_eq!(intent.subject_filter, None);
    }

    #[test]
    fn subject_filter_drops_other_subjects() {
        let grouped = group_by_subject(vec![
            record("2025-10-26", "Math"),
            record("2025-10-26", "English"),
        ]);
        let intent = QueryIntent {
            subject_filter: Some("math".to_string()),
            ..Default::default()
        };

        let filtered = filter_records(&grouped, &intent, day("2025-10-26"));
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("Math"));
    }

    #[test]
    fn today_predicate_keeps_only_matching_dates() {
        let grouped = group_by_subject(vec![
            record("2025-10-26", "Math"),
            record("2025-10-27", "Math"),
        ]);
        let intent = QueryIntent {
            about_today: true,
            ..Default::default()
        };

        let filtered = filter_records(&grouped, &intent, day("2025-10-26"));
        assert_eq!(filtered["Math"].len(), 1);
        assert_eq!(filtered["Math"][0].date, "2025-10-26");
    }

    #[test]
    fn tomorrow_predicate_uses_next_calendar_day() {
        let grouped = group_by_subject(vec![
            record("2025-10-26", "Math"),
            record("2025-10-27", "Math"),
        ]);
        let intent = QueryIntent {
            about_tomorrow: true,
            ..Default::default()
        };

        let filtered = filter_records(&grouped, &intent, day("2025-10-26"));
        assert_eq!(filtered["Math"].len(), 1);
        assert_eq!(filtered["Math"][0].date, "2025-10-27");
    }

    #[test]
    fn over_constrained_filter_falls_back_to_input() {
        let grouped = group_by_subject(vec![record("2025-10-20", "Math")]);
        let intent = QueryIntent {
            about_today: true,
            ..Default::default()
        };

        let filtered = filter_records(&grouped, &intent, day("2025-10-26"));
        assert_eq!(filtered, grouped);
    }

    #[test]
    fn grouping_is_deterministic_and_ordered() {
        let grouped = group_by_subject(vec![
            record("2025-10-26", "ערבית"),
            record("2025-10-26", "English"),
            record("2025-10-27", "English"),
        ]);
        let subjects: Vec<&String> = grouped.keys().collect();
        assert_eq!(subjects, vec!["English", "ערבית"]);
        assert_eq!(grouped["English"].len(), 2);
    }
}
