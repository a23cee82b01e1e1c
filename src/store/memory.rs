//! In-memory [`HomeworkStore`] backed by `HashMap`s.
//!
//! Used by tests and by anything that wants store semantics without a
//! database file. Not persistent.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Snapshot, StoredRecord};
use crate::store::HomeworkStore;

type Identity = (String, String, String);

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Identity, StoredRecord>>,
    snapshots: RwLock<HashMap<(String, String), Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut records: Vec<StoredRecord>) -> Vec<StoredRecord> {
        records.sort_by(|a, b| {
            (a.date.as_str(), a.hour.as_str(), a.subject.as_str())
                .cmp(&(b.date.as_str(), b.hour.as_str(), b.subject.as_str()))
        });
        records
    }
}

#[async_trait]
impl HomeworkStore for MemoryStore {
    async fn get(&self, date: &str, hour: &str, subject: &str) -> Result<Option<StoredRecord>> {
        let records = self.records.read().unwrap();
        let key = (date.to_string(), hour.to_string(), subject.to_string());
        Ok(records.get(&key).cloned())
    }

    async fn insert(&self, record: &StoredRecord) -> Result<()> {
        let mut records = self.records.write().unwrap();
        let key = (
            record.date.clone(),
            record.hour.clone(),
            record.subject.clone(),
        );
        if records.contains_key(&key) {
            anyhow::bail!(
                "record already exists for ({}, {}, {})",
                record.date,
                record.hour,
                record.subject
            );
        }
        records.insert(key, record.clone());
        Ok(())
    }

    async fn update(&self, record: &StoredRecord) -> Result<()> {
        let mut records = self.records.write().unwrap();
        let key = (
            record.date.clone(),
            record.hour.clone(),
            record.subject.clone(),
        );
        if !records.contains_key(&key) {
            anyhow::bail!(
                "no record to update for ({}, {}, {})",
                record.date,
                record.hour,
                record.subject
            );
        }
        records.insert(key, record.clone());
        Ok(())
    }

    async fn list_by_date(&self, date: &str) -> Result<Vec<StoredRecord>> {
        let records = self.records.read().unwrap();
        Ok(Self::sorted(
            records.values().filter(|r| r.date == date).cloned().collect(),
        ))
    }

    async fn list_from_date(&self, start: &str) -> Result<Vec<StoredRecord>> {
        let records = self.records.read().unwrap();
        Ok(Self::sorted(
            records
                .values()
                .filter(|r| r.date.as_str() >= start)
                .cloned()
                .collect(),
        ))
    }

    async fn list_all(&self) -> Result<Vec<StoredRecord>> {
        let records = self.records.read().unwrap();
        Ok(Self::sorted(records.values().cloned().collect()))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.read().unwrap().len() as u64)
    }

    async fn upsert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().unwrap();
        snapshots.insert(
            (snapshot.mode.clone(), snapshot.date.clone()),
            snapshot.clone(),
        );
        Ok(())
    }
}
