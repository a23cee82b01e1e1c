//! The question-answering pipeline.
//!
//! classify → pick a read scope → group by subject → advisory filter →
//! render a context block → complete. The only async edges are the store
//! reads and the LLM call; everything in between is pure.

use anyhow::Result;
use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::filter::{filter_records, group_by_subject, IntentClassifier, QueryIntent};
use crate::llm::{ChatTurn, LlmClient};
use crate::models::{format_date, StoredRecord};
use crate::store::HomeworkStore;

const SYSTEM_PROMPT: &str = "אתה עוזר שיעורי בית. ענה בעברית, בקצרה ולעניין, \
ורק על סמך נתוני שיעורי הבית שסופקו לך. אם המידע המבוקש אינו מופיע בנתונים, אמור זאת.";

/// Fixed reply when the chosen read scope has nothing in it. The LLM is not
/// called in that case.
pub const EMPTY_STORE_REPLY: &str = "אין שיעורי בית רשומים כרגע 🎉";

pub struct HomeworkAgent {
    classifier: IntentClassifier,
    llm: LlmClient,
}

impl HomeworkAgent {
    pub fn new(llm: LlmClient) -> Self {
        Self {
            classifier: IntentClassifier::new(),
            llm,
        }
    }

    /// Answers one question against the store, with `history` carrying the
    /// sender's previous turns.
    pub async fn answer(
        &self,
        store: &dyn HomeworkStore,
        question: &str,
        history: &[ChatTurn],
        today: NaiveDate,
    ) -> Result<String> {
        let intent = self.classifier.classify(question);
        match build_context(store, &intent, today).await? {
            None => Ok(EMPTY_STORE_REPLY.to_string()),
            Some(context) => {
                let prompt = format!("{context}\nשאלה: {question}");
                self.llm.complete(SYSTEM_PROMPT, history, &prompt).await
            }
        }
    }
}

/// Reads the scope the intent asks for, filters it, and renders the context
/// block for the model. `None` means the scope came back empty.
///
/// Questions about everything or about due dates read the whole store;
/// anything else reads from today onward.
pub async fn build_context(
    store: &dyn HomeworkStore,
    intent: &QueryIntent,
    today: NaiveDate,
) -> Result<Option<String>> {
    let records = if intent.wants_all || intent.about_due_date {
        store.list_all().await?
    } else {
        store.list_from_date(&format_date(today)).await?
    };

    if records.is_empty() {
        return Ok(None);
    }

    let grouped = group_by_subject(records);
    let filtered = filter_records(&grouped, intent, today);
    Ok(Some(render_context(&filtered)))
}

fn render_context(grouped: &BTreeMap<String, Vec<StoredRecord>>) -> String {
    let mut out = String::from("שיעורי בית רשומים:\n");
    for (subject, records) in grouped {
        out.push_str(&format!("\n{subject}:\n"));
        for record in records {
            out.push_str(&format!(
                "- {} ({}): {}",
                record.date, record.hour, record.homework_text
            ));
            if let Some(teacher) = &record.teacher {
                out.push_str(&format!(" [{teacher}]"));
            }
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HomeworkRecord;
    use crate::store::memory::MemoryStore;
    use crate::store::upsert_records;

    fn record(date: &str, subject: &str, homework: &str) -> HomeworkRecord {
        HomeworkRecord {
            date: date.to_string(),
            hour: "1".to_string(),
            subject: subject.to_string(),
            description: homework.to_string(),
            homework_text: homework.to_string(),
            due_date: None,
            teacher: Some("כהן".to_string()),
            class_description: None,
        }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn empty_store_yields_no_context() {
        let store = MemoryStore::new();
        let intent = QueryIntent::default();
        let context = build_context(&store, &intent, day("2025-10-26")).await.unwrap();
        assert!(context.is_none());
    }

    #[tokio::test]
    async fn default_scope_starts_at_today() {
        let store = MemoryStore::new();
        upsert_records(
            &store,
            &[
                record("2025-10-20", "Math", "old pages"),
                record("2025-10-26", "Math", "new pages"),
            ],
        )
        .await;

        let intent = QueryIntent::default();
        let context = build_context(&store, &intent, day("2025-10-26"))
            .await
            .unwrap()
            .unwrap();
        assert!(context.contains("new pages"));
        assert!(!context.contains("old pages"));
    }

    #[tokio::test]
    async fn wants_all_reads_the_whole_store() {
        let store = MemoryStore::new();
        upsert_records(
            &store,
            &[
                record("2025-10-20", "Math", "old pages"),
                record("2025-10-26", "Math", "new pages"),
            ],
        )
        .await;

        let intent = QueryIntent {
            wants_all: true,
            ..Default::default()
        };
        let context = build_context(&store, &intent, day("2025-10-26"))
            .await
            .unwrap()
            .unwrap();
        assert!(context.contains("old pages"));
        assert!(context.contains("new pages"));
    }

    #[test]
    fn context_lists_subject_then_records() {
        let grouped = group_by_subject(vec![StoredRecord {
            id: "x".to_string(),
            date: "2025-10-26".to_string(),
            hour: "שיעור 2".to_string(),
            subject: "מתמטיקה".to_string(),
            description: String::new(),
            homework_text: "עמוד 12".to_string(),
            due_date: None,
            teacher: Some("כהן".to_string()),
            class_description: None,
            created_at: String::new(),
            updated_at: String::new(),
        }]);
        let context = render_context(&grouped);
        assert!(context.contains("מתמטיקה:"));
        assert!(context.contains("- 2025-10-26 (שיעור 2): עמוד 12 [כהן]"));
    }
}
