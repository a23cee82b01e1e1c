//! Scrape pipeline orchestration.
//!
//! Coordinates the full flow for one portal view: login → fetch → snapshot
//! the raw payload → extract records → upsert into the store. The raw
//! snapshot is written before extraction so any day can be reparsed after
//! an extractor fix.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::Config;
use crate::extract::{self, PARSER_VERSION};
use crate::markup;
use crate::models::{format_date, Mode, RawContent, ScrapeSummary, Snapshot};
use crate::portal::{PortalClient, PortalSession};
use crate::store::{upsert_records, HomeworkStore};

/// Logs in and runs one scrape for `mode`.
pub async fn run_scrape(
    config: &Config,
    store: &dyn HomeworkStore,
    mode: Mode,
    today: NaiveDate,
) -> Result<ScrapeSummary> {
    let portal = PortalClient::new(&config.portal)?;
    let session = portal.login().await?;
    scrape_with(&portal, &session, store, mode, today).await
}

/// Runs the daily scrape then the historical scrape on one login.
pub async fn run_all(
    config: &Config,
    store: &dyn HomeworkStore,
    today: NaiveDate,
) -> Result<Vec<(Mode, ScrapeSummary)>> {
    let portal = PortalClient::new(&config.portal)?;
    let session = portal.login().await?;

    let mut summaries = Vec::new();
    for mode in [Mode::Daily, Mode::Historical] {
        let summary = scrape_with(&portal, &session, store, mode, today).await?;
        summaries.push((mode, summary));
    }
    Ok(summaries)
}

async fn scrape_with(
    portal: &PortalClient,
    session: &PortalSession,
    store: &dyn HomeworkStore,
    mode: Mode,
    today: NaiveDate,
) -> Result<ScrapeSummary> {
    let (body, source_id) = match mode {
        Mode::Daily => portal.fetch_daily(session).await?,
        Mode::Historical => portal.fetch_historical(session).await?,
    };
    tracing::info!(
        mode = %mode,
        source = %source_id,
        bytes = body.len(),
        "fetched raw content"
    );

    ingest_payload(store, mode, today, &body).await
}

/// Snapshots, extracts, and upserts one fetched payload. A body that fails
/// its top-level parse counts as malformed input: logged, zero records, not
/// an error.
pub async fn ingest_payload(
    store: &dyn HomeworkStore,
    mode: Mode,
    today: NaiveDate,
    body: &str,
) -> Result<ScrapeSummary> {
    write_snapshot(store, mode, today, body).await?;

    let raw = match parse_raw(body, mode) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, mode = %mode, "raw content failed top-level parse");
            return Ok(ScrapeSummary::default());
        }
    };

    let records = extract::extract(&raw, mode, today);
    let written = upsert_records(store, &records).await;

    let summary = ScrapeSummary {
        extracted: records.len() as u64,
        written,
    };
    tracing::info!(
        mode = %mode,
        extracted = summary.extracted,
        written = summary.written,
        "scrape complete"
    );
    Ok(summary)
}

/// Builds the tagged payload for `mode` from a raw body.
pub fn parse_raw(body: &str, mode: Mode) -> Result<RawContent> {
    match mode {
        Mode::Daily => {
            let node = markup::parse(body)
                .map_err(|e| anyhow::anyhow!("malformed daily markup: {e}"))?;
            Ok(RawContent::Tree(node))
        }
        Mode::Historical => {
            let value: serde_json::Value =
                serde_json::from_str(body).context("malformed historical JSON")?;
            Ok(RawContent::Document(value))
        }
    }
}

async fn write_snapshot(
    store: &dyn HomeworkStore,
    mode: Mode,
    today: NaiveDate,
    body: &str,
) -> Result<()> {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    store
        .upsert_snapshot(&Snapshot {
            id: Uuid::new_v4().to_string(),
            mode: mode.as_str().to_string(),
            date: format_date(today),
            content: body.to_string(),
            content_hash,
            parser_version: PARSER_VERSION,
            fetched_at: chrono::Utc::now().to_rfc3339(),
        })
        .await
}
