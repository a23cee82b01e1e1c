//! SQLite-backed [`HomeworkStore`].

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{Snapshot, StoredRecord};
use crate::store::HomeworkStore;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &SqliteRow) -> Result<StoredRecord, sqlx::Error> {
    Ok(StoredRecord {
        id: row.try_get("id")?,
        date: row.try_get("date")?,
        hour: row.try_get("hour")?,
        subject: row.try_get("subject")?,
        description: row.try_get("description")?,
        homework_text: row.try_get("homework_text")?,
        due_date: row.try_get("due_date")?,
        teacher: row.try_get("teacher")?,
        class_description: row.try_get("class_description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl HomeworkStore for SqliteStore {
    async fn get(&self, date: &str, hour: &str, subject: &str) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(
            "SELECT id, date, hour, subject, description, homework_text, due_date, teacher, \
             class_description, created_at, updated_at \
             FROM homework WHERE date = ? AND hour = ? AND subject = ?",
        )
        .bind(date)
        .bind(hour)
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(record_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, record: &StoredRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO homework (id, date, hour, subject, description, homework_text, \
             due_date, teacher, class_description, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.date)
        .bind(&record.hour)
        .bind(&record.subject)
        .bind(&record.description)
        .bind(&record.homework_text)
        .bind(&record.due_date)
        .bind(&record.teacher)
        .bind(&record.class_description)
        .bind(&record.created_at)
        .bind(&record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, record: &StoredRecord) -> Result<()> {
        let result = sqlx::query(
            "UPDATE homework SET description = ?, homework_text = ?, due_date = ?, \
             updated_at = ? WHERE date = ? AND hour = ? AND subject = ?",
        )
        .bind(&record.description)
        .bind(&record.homework_text)
        .bind(&record.due_date)
        .bind(&record.updated_at)
        .bind(&record.date)
        .bind(&record.hour)
        .bind(&record.subject)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!(
                "no record to update for ({}, {}, {})",
                record.date,
                record.hour,
                record.subject
            );
        }
        Ok(())
    }

    async fn list_by_date(&self, date: &str) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            "SELECT id, date, hour, subject, description, homework_text, due_date, teacher, \
             class_description, created_at, updated_at \
             FROM homework WHERE date = ? ORDER BY date, hour, subject",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    async fn list_from_date(&self, start: &str) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            "SELECT id, date, hour, subject, description, homework_text, due_date, teacher, \
             class_description, created_at, updated_at \
             FROM homework WHERE date >= ? ORDER BY date, hour, subject",
        )
        .bind(start)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    async fn list_all(&self) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            "SELECT id, date, hour, subject, description, homework_text, due_date, teacher, \
             class_description, created_at, updated_at \
             FROM homework ORDER BY date, hour, subject",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM homework")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn upsert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO snapshots (id, mode, date, content, content_hash, parser_version, \
             fetched_at) VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(mode, date) DO UPDATE SET \
             content = excluded.content, content_hash = excluded.content_hash, \
             parser_version = excluded.parser_version, fetched_at = excluded.fetched_at",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.mode)
        .bind(&snapshot.date)
        .bind(&snapshot.content)
        .bind(&snapshot.content_hash)
        .bind(snapshot.parser_version)
        .bind(&snapshot.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
