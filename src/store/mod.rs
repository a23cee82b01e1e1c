//! Storage abstraction and the deduplicating upsert engine.
//!
//! The [`HomeworkStore`] trait defines the small CRUD surface the engine
//! needs, enabling pluggable backends: SQLite for real runs, in-memory for
//! tests. The change-detection logic itself lives here in
//! [`upsert_records`], above the trait, so every backend dedupes the same
//! way.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{HomeworkRecord, Snapshot, StoredRecord};

/// Abstract storage backend for homework records and raw snapshots.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](HomeworkStore::get) | Look up one record by identity |
/// | [`insert`](HomeworkStore::insert) | Insert a brand-new record |
/// | [`update`](HomeworkStore::update) | Overwrite an existing identity's mutable fields |
/// | [`list_by_date`](HomeworkStore::list_by_date) | All records for one date |
/// | [`list_from_date`](HomeworkStore::list_from_date) | All records from a date onward |
/// | [`list_all`](HomeworkStore::list_all) | Everything |
/// | [`count`](HomeworkStore::count) | Number of stored records |
/// | [`upsert_snapshot`](HomeworkStore::upsert_snapshot) | Persist a raw fetched payload |
///
/// All list methods return records ordered by (date, hour, subject)
/// ascending, compared lexicographically; the `"unknown"` hour sentinel
/// sorts by its literal value.
#[async_trait]
pub trait HomeworkStore: Send + Sync {
    /// Fetch the stored record addressed by (date, hour, subject), if any.
    async fn get(&self, date: &str, hour: &str, subject: &str) -> Result<Option<StoredRecord>>;

    /// Insert a record whose identity is not yet stored.
    async fn insert(&self, record: &StoredRecord) -> Result<()>;

    /// Replace the stored row for `record`'s identity.
    async fn update(&self, record: &StoredRecord) -> Result<()>;

    async fn list_by_date(&self, date: &str) -> Result<Vec<StoredRecord>>;

    /// Inclusive lower bound, unbounded upper.
    async fn list_from_date(&self, start: &str) -> Result<Vec<StoredRecord>>;

    async fn list_all(&self) -> Result<Vec<StoredRecord>>;

    async fn count(&self) -> Result<u64>;

    /// Persist a raw snapshot, overwriting any previous one for its
    /// (mode, date).
    async fn upsert_snapshot(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Merges extracted records into the store and returns the number of rows
/// actually written.
///
/// For each record, in input order: a new identity is inserted; an existing
/// identity is updated only when its homework text or description differ
/// from what is stored; an unchanged record is a no-op and does not count.
/// Duplicate identities within one batch resolve last-wins through the same
/// sequence. A single record's storage failure is logged and skipped; the
/// batch always runs to completion.
pub async fn upsert_records(store: &dyn HomeworkStore, records: &[HomeworkRecord]) -> u64 {
    let mut written = 0u64;
    for record in records {
        match upsert_one(store, record).await {
            Ok(true) => written += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    date = %record.date,
                    hour = %record.hour,
                    subject = %record.subject,
                    "upsert failed, skipping record"
                );
            }
        }
    }
    written
}

async fn upsert_one(store: &dyn HomeworkStore, record: &HomeworkRecord) -> Result<bool> {
    let (date, hour, subject) = record.identity();
    let now = chrono::Utc::now().to_rfc3339();

    match store.get(date, hour, subject).await? {
        None => {
            store
                .insert(&StoredRecord {
                    id: Uuid::new_v4().to_string(),
                    date: record.date.clone(),
                    hour: record.hour.clone(),
                    subject: record.subject.clone(),
                    description: record.description.clone(),
                    homework_text: record.homework_text.clone(),
                    due_date: record.due_date.clone(),
                    teacher: record.teacher.clone(),
                    class_description: record.class_description.clone(),
                    created_at: now.clone(),
                    updated_at: now,
                })
                .await?;
            Ok(true)
        }
        Some(existing) => {
            if !record_changed(&existing, record) {
                return Ok(false);
            }
            // Only the mutable fields move; provenance metadata and
            // created_at stay as first recorded.
            store
                .update(&StoredRecord {
                    description: record.description.clone(),
                    homework_text: record.homework_text.clone(),
                    due_date: record.due_date.clone(),
                    updated_at: now,
                    ..existing
                })
                .await?;
            Ok(true)
        }
    }
}

/// Whether an incoming record carries content changes worth a write.
/// Homework text and description are the change-bearing fields; both sides
/// compare with absent values normalized to the empty string.
fn record_changed(existing: &StoredRecord, incoming: &HomeworkRecord) -> bool {
    existing.homework_text.trim() != incoming.homework_text.trim()
        || existing.description != incoming.description
}
