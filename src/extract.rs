//! Record extraction from raw portal payloads.
//!
//! Turns fetched content into canonical [`HomeworkRecord`]s without
//! performing any I/O. Two shapes exist in the wild: the daily view is
//! tree-shaped markup (either a flat row list for "today" or day cards with
//! a date in the title), the historical view is a JSON document grouped by
//! day and lesson hour. Individual rows, cards, or slots that fail a local
//! precondition are skipped with a log line; extraction itself only comes
//! back empty when the payload has the wrong overall shape.

use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;

use crate::markup::Node;
use crate::models::{format_date, normalize_hour, HomeworkRecord, Mode, RawContent};

/// Bumped whenever extraction semantics change; stored alongside each raw
/// snapshot so older snapshots can be reparsed after a fix.
pub const PARSER_VERSION: i64 = 3;

/// Placeholder the portal shows in the homework cell when nothing was entered.
pub const NONE_ENTERED: &str = "לא הוזן";

/// Prefix for the synthesized daily-mode description.
const TOPIC_PREFIX: &str = "נושא: ";

/// Cells per daily row: hour, subject, teacher, status, topic, homework.
const MIN_ROW_CELLS: usize = 6;

const CELL_HOUR: usize = 0;
const CELL_SUBJECT: usize = 1;
const CELL_TEACHER: usize = 2;
const CELL_TOPIC: usize = 4;
const CELL_HOMEWORK: usize = 5;

/// Extracts homework records from a raw payload.
///
/// `today` anchors the flat daily variant, which carries no dates of its
/// own. The input is never mutated; a payload whose shape does not match
/// `mode` yields an empty sequence and a warning.
pub fn extract(raw: &RawContent, mode: Mode, today: NaiveDate) -> Vec<HomeworkRecord> {
    match (raw, mode) {
        (RawContent::Tree(root), Mode::Daily) => extract_daily(root, today),
        (RawContent::Document(doc), Mode::Historical) => extract_historical(doc),
        (raw, mode) => {
            tracing::warn!(
                mode = %mode,
                payload = raw_kind(raw),
                "payload shape does not match mode, nothing extracted"
            );
            Vec::new()
        }
    }
}

fn raw_kind(raw: &RawContent) -> &'static str {
    match raw {
        RawContent::Tree(_) => "tree",
        RawContent::Document(_) => "document",
    }
}

// ============ Daily mode ============

fn extract_daily(root: &Node, today: NaiveDate) -> Vec<HomeworkRecord> {
    let cards = root.find_all_by_class("day-card");
    if cards.is_empty() {
        // Flat variant: the page reflects "now", every row is today's.
        let rows = root.find_all_by_class("table-row");
        return extract_rows(&rows, &format_date(today));
    }

    let mut records = Vec::new();
    for card in cards {
        let title = match card.find_by_class("card-title") {
            Some(t) => t.text(),
            None => {
                tracing::warn!("day card without a title, skipping card");
                continue;
            }
        };
        let date = match parse_title_date(&title) {
            Some(d) => d,
            None => {
                tracing::warn!(title = %title, "unparseable date in card title, skipping card");
                continue;
            }
        };
        let rows = card.find_all_by_class("table-row");
        records.extend(extract_rows(&rows, &format_date(date)));
    }
    records
}

fn extract_rows(rows: &[&Node], date: &str) -> Vec<HomeworkRecord> {
    let mut records = Vec::new();
    for row in rows {
        if row.has_class("header") {
            continue;
        }
        let cells = row.find_all_by_class("table-cell");
        if cells.len() < MIN_ROW_CELLS {
            tracing::debug!(cells = cells.len(), "row with too few cells, skipping");
            continue;
        }

        let subject = match cells[CELL_SUBJECT].find("a") {
            Some(a) => a.text(),
            None => {
                tracing::warn!("row without a subject anchor, skipping");
                continue;
            }
        };
        if subject.is_empty() {
            tracing::warn!("row with an empty subject, skipping");
            continue;
        }

        let homework = cells[CELL_HOMEWORK].text();
        if homework.is_empty() || homework == NONE_ENTERED {
            // Nothing was entered for this lesson; not a record.
            tracing::debug!(subject = %subject, "no homework entered, skipping row");
            continue;
        }

        let topic = cells[CELL_TOPIC].text();
        records.push(HomeworkRecord {
            date: date.to_string(),
            hour: normalize_hour(Some(&cells[CELL_HOUR].text())),
            subject,
            description: format!("{}{}", TOPIC_PREFIX, topic),
            homework_text: homework,
            due_date: None,
            teacher: none_if_empty(cells[CELL_TEACHER].text()),
            class_description: None,
        });
    }
    records
}

/// Pulls a `DD/MM/YYYY` date out of a card title such as
/// `יום ראשון | 26/10/2025 | ד׳ חֶשְׁוָן תשפ״ו`. Returns `None` for titles
/// without one or with an impossible calendar date.
fn parse_title_date(title: &str) -> Option<NaiveDate> {
    let re = Regex::new(r"(\d{2})/(\d{2})/(\d{4})").ok()?;
    let caps = re.captures(title)?;
    let day: u32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let year: i32 = caps.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn none_if_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ============ Historical mode ============

/// One calendar day in the historical document.
#[derive(Debug, Deserialize)]
struct DayEntry {
    #[serde(default)]
    date: String,
    #[serde(default, rename = "hoursData")]
    hours_data: Vec<HourEntry>,
}

/// One lesson hour within a day.
#[derive(Debug, Deserialize)]
struct HourEntry {
    /// Number or string in the wild; stringified into the hour label.
    #[serde(default)]
    hour: Option<serde_json::Value>,
    /// The portal API's own spelling.
    #[serde(default, rename = "scheduale")]
    schedule: Vec<ScheduleEntry>,
}

/// One subject-level slot within an hour.
#[derive(Debug, Deserialize)]
struct ScheduleEntry {
    #[serde(default)]
    subject_name: String,
    #[serde(default)]
    teacher: Option<String>,
    #[serde(default, rename = "homeWork")]
    home_work: String,
    #[serde(default, rename = "descClass")]
    desc_class: Option<String>,
}

fn extract_historical(doc: &serde_json::Value) -> Vec<HomeworkRecord> {
    let status = doc
        .get("status")
        .and_then(|s| s.as_bool())
        .unwrap_or(false);
    let days = doc.get("data").and_then(|d| d.as_array());

    let Some(days) = days else {
        tracing::warn!("historical document missing data array, nothing extracted");
        return Vec::new();
    };
    if !status {
        tracing::warn!("historical document status is not ok, nothing extracted");
        return Vec::new();
    }

    let mut records = Vec::new();
    for day in days {
        match serde_json::from_value::<DayEntry>(day.clone()) {
            Ok(day) => extract_day(&day, &mut records),
            Err(e) => tracing::warn!(error = %e, "malformed day entry, skipping"),
        }
    }
    records
}

fn extract_day(day: &DayEntry, records: &mut Vec<HomeworkRecord>) {
    if day.date.trim().is_empty() {
        tracing::warn!("day entry without a date, skipping");
        return;
    }
    // First 10 characters cover both date-only and full-timestamp forms.
    let date: String = day.date.chars().take(10).collect();

    for hour_entry in &day.hours_data {
        let hour = hour_label(hour_entry.hour.as_ref());
        for slot in &hour_entry.schedule {
            let homework = slot.home_work.trim();
            if homework.is_empty() {
                continue;
            }
            let subject = slot.subject_name.trim();
            if subject.is_empty() {
                tracing::warn!(date = %date, "schedule slot without a subject, skipping");
                continue;
            }
            records.push(HomeworkRecord {
                date: date.clone(),
                hour: hour.clone(),
                subject: subject.to_string(),
                // The raw assignment text doubles as the description in
                // this mode; downstream display relies on both being set.
                description: homework.to_string(),
                homework_text: homework.to_string(),
                due_date: None,
                teacher: slot.teacher.clone().and_then(none_if_empty),
                class_description: slot.desc_class.clone().and_then(none_if_empty),
            });
        }
    }
}

fn hour_label(hour: Option<&serde_json::Value>) -> String {
    match hour {
        Some(serde_json::Value::String(s)) => normalize_hour(Some(s)),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => normalize_hour(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup;
    use crate::models::UNKNOWN_HOUR;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 3).unwrap()
    }

    fn row(hour: &str, subject: &str, teacher: &str, topic: &str, homework: &str) -> String {
        format!(
            concat!(
                r#"<div class="table-row">"#,
                r#"<div class="table-cell">{}</div>"#,
                r##"<div class="table-cell"><a href="#">{}</a></div>"##,
                r#"<div class="table-cell">{}</div>"#,
                r#"<div class="table-cell"></div>"#,
                r#"<div class="table-cell">{}</div>"#,
                r#"<div class="table-cell">{}</div>"#,
                r#"</div>"#
            ),
            hour, subject, teacher, topic, homework
        )
    }

    fn tree(html: &str) -> RawContent {
        RawContent::Tree(markup::parse(html).unwrap())
    }

    #[test]
    fn daily_flat_rows_use_injected_today() {
        let html = format!(
            "<div>{}{}</div>",
            row("שיעור 1", "Math", "T1", "חזרה", "עמוד 12"),
            row("שיעור 2", "English", "T2", "", NONE_ENTERED),
        );
        let records = extract(&tree(&html), Mode::Daily, today());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, "2025-11-03");
        assert_eq!(records[0].hour, "שיעור 1");
        assert_eq!(records[0].subject, "Math");
        assert_eq!(records[0].description, "נושא: חזרה");
        assert_eq!(records[0].homework_text, "עמוד 12");
        assert_eq!(records[0].teacher.as_deref(), Some("T1"));
    }

    #[test]
    fn daily_sentinel_homework_yields_nothing() {
        let html = format!("<div>{}</div>", row("שיעור 3", "Bible", "T3", "x", NONE_ENTERED));
        assert!(extract(&tree(&html), Mode::Daily, today()).is_empty());
    }

    #[test]
    fn daily_empty_topic_still_gets_prefix() {
        let html = format!("<div>{}</div>", row("שיעור 1", "Math", "", "", "תרגיל 4"));
        let records = extract(&tree(&html), Mode::Daily, today());
        assert_eq!(records[0].description, "נושא: ");
        assert_eq!(records[0].teacher, None);
    }

    #[test]
    fn daily_skips_header_and_short_rows() {
        let html = concat!(
            r#"<div>"#,
            r#"<div class="table-row header"><div class="table-cell">שעה</div></div>"#,
            r#"<div class="table-row"><div class="table-cell">1</div><div class="table-cell">x</div></div>"#,
            r#"</div>"#
        );
        assert!(extract(&tree(html), Mode::Daily, today()).is_empty());
    }

    #[test]
    fn daily_skips_row_without_subject_anchor() {
        let html = concat!(
            r#"<div><div class="table-row">"#,
            r#"<div class="table-cell">1</div>"#,
            r#"<div class="table-cell">Math</div>"#,
            r#"<div class="table-cell">T</div>"#,
            r#"<div class="table-cell"></div>"#,
            r#"<div class="table-cell">topic</div>"#,
            r#"<div class="table-cell">hw</div>"#,
            r#"</div></div>"#
        );
        assert!(extract(&tree(html), Mode::Daily, today()).is_empty());
    }

    #[test]
    fn daily_cards_take_date_from_title() {
        let html = format!(
            concat!(
                r#"<div>"#,
                r#"<div class="day-card">"#,
                r#"<div class="card-title">יום ראשון | 26/10/2025 | ד׳ חשון</div>"#,
                "{}",
                r#"</div>"#,
                r#"<div class="day-card">"#,
                r#"<div class="card-title">יום שני | someday | ה׳ חשון</div>"#,
                "{}",
                r#"</div>"#,
                r#"</div>"#
            ),
            row("שיעור 1", "Math", "T1", "שברים", "עמוד 3"),
            row("שיעור 1", "English", "T2", "", "unit 2"),
        );
        let records = extract(&tree(&html), Mode::Daily, today());
        // Whole second card is dropped because its title date fails to parse.
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, "2025-10-26");
        assert_eq!(records[0].subject, "Math");
    }

    #[test]
    fn daily_card_with_impossible_date_is_skipped() {
        let html = format!(
            concat!(
                r#"<div><div class="day-card">"#,
                r#"<div class="card-title">יום שלישי | 31/02/2025 | תאריך</div>"#,
                "{}",
                r#"</div></div>"#
            ),
            row("שיעור 1", "Math", "T1", "t", "hw"),
        );
        assert!(extract(&tree(&html), Mode::Daily, today()).is_empty());
    }

    #[test]
    fn historical_single_slot_document() {
        let doc = json!({
            "status": true,
            "data": [{
                "date": "2025-10-26T00:00:00",
                "dayIndex": 0,
                "hoursData": [{
                    "hour": 1,
                    "scheduale": [{
                        "subject_name": "Math",
                        "teacher": "T1",
                        "homeWork": "pg 5"
                    }]
                }]
            }]
        });
        let records = extract(&RawContent::Document(doc), Mode::Historical, today());
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.date, "2025-10-26");
        assert_eq!(r.hour, "1");
        assert_eq!(r.subject, "Math");
        assert_eq!(r.teacher.as_deref(), Some("T1"));
        assert_eq!(r.description, "pg 5");
        assert_eq!(r.homework_text, "pg 5");
        assert_eq!(r.due_date, None);
    }

    #[test]
    fn historical_trims_and_skips_empty_homework() {
        let doc = json!({
            "status": true,
            "data": [{
                "date": "2025-10-26",
                "hoursData": [{
                    "hour": 2,
                    "scheduale": [
                        {"subject_name": "Math", "homeWork": "   "},
                        {"subject_name": "English", "homeWork": "  read ch. 3  "}
                    ]
                }]
            }]
        });
        let records = extract(&RawContent::Document(doc), Mode::Historical, today());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject, "English");
        assert_eq!(records[0].homework_text, "read ch. 3");
    }

    #[test]
    fn historical_missing_hour_becomes_sentinel() {
        let doc = json!({
            "status": true,
            "data": [{
                "date": "2025-10-26",
                "hoursData": [{
                    "scheduale": [{"subject_name": "Math", "homeWork": "hw"}]
                }]
            }]
        });
        let records = extract(&RawContent::Document(doc), Mode::Historical, today());
        assert_eq!(records[0].hour, UNKNOWN_HOUR);
    }

    #[test]
    fn historical_missing_structure_is_empty() {
        for doc in [
            json!({}),
            json!({"status": false, "data": []}),
            json!({"status": true}),
            json!({"data": []}),
        ] {
            assert!(
                extract(&RawContent::Document(doc), Mode::Historical, today()).is_empty()
            );
        }
    }

    #[test]
    fn historical_skips_malformed_day_and_keeps_rest() {
        let doc = json!({
            "status": true,
            "data": [
                {"date": 17},
                {
                    "date": "2025-10-27",
                    "hoursData": [{
                        "hour": "3",
                        "scheduale": [{"subject_name": "Bible", "homeWork": "verses"}]
                    }]
                }
            ]
        });
        let records = extract(&RawContent::Document(doc), Mode::Historical, today());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, "2025-10-27");
        assert_eq!(records[0].hour, "3");
    }

    #[test]
    fn historical_skips_slot_without_subject() {
        let doc = json!({
            "status": true,
            "data": [{
                "date": "2025-10-26",
                "hoursData": [{
                    "hour": 1,
                    "scheduale": [{"subject_name": "  ", "homeWork": "hw"}]
                }]
            }]
        });
        assert!(extract(&RawContent::Document(doc), Mode::Historical, today()).is_empty());
    }

    #[test]
    fn mismatched_payload_shape_is_empty() {
        let doc = json!({"status": true, "data": []});
        assert!(extract(&RawContent::Document(doc), Mode::Daily, today()).is_empty());
        let t = tree("<div></div>");
        assert!(extract(&t, Mode::Historical, today()).is_empty());
    }

    #[test]
    fn title_date_parsing() {
        assert_eq!(
            parse_title_date("יום ראשון | 26/10/2025 | ד׳ חשון"),
            NaiveDate::from_ymd_opt(2025, 10, 26)
        );
        assert_eq!(parse_title_date("no date here"), None);
        assert_eq!(parse_title_date("31/02/2025"), None);
    }
}
