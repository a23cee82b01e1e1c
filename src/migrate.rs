use anyhow::Result;
use sqlx::sqlite::SqlitePool;

/// Creates the schema if it does not exist. Runs on every startup, so every
/// statement is idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create homework table. One row per (date, hour, subject); absent hours
    // are stored as the literal "unknown".
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS homework (
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            hour TEXT NOT NULL,
            subject TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            homework_text TEXT NOT NULL DEFAULT '',
            due_date TEXT,
            teacher TEXT,
            class_description TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(date, hour, subject)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create snapshots table holding raw fetched payloads, one per
    // (mode, date), for reprocessing after parser changes.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            id TEXT PRIMARY KEY,
            mode TEXT NOT NULL,
            date TEXT NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            parser_version INTEGER NOT NULL,
            fetched_at TEXT NOT NULL,
            UNIQUE(mode, date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_homework_date ON homework(date)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_fetched_at ON snapshots(fetched_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
