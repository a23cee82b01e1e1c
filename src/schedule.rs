//! Daily scrape scheduler.
//!
//! Sleeps until the configured wall-clock time, runs both scrapes, and
//! repeats. A failed run is logged and retried on the next cycle, never
//! sooner.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::Config;
use crate::ingest;
use crate::store::HomeworkStore;

/// Next occurrence of `hour:minute` strictly after `now`, in UTC.
pub fn next_run_after(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let run_today = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
        .and_utc();
    if run_today > now {
        run_today
    } else {
        (now.date_naive() + chrono::Days::new(1))
            .and_hms_opt(hour, minute, 0)
            .unwrap()
            .and_utc()
    }
}

/// Runs scrapes at the configured time, forever.
pub async fn run_loop(config: &Config, store: &dyn HomeworkStore) -> Result<()> {
    let (hour, minute) = crate::config::parse_hhmm(&config.schedule.time)
        .ok_or_else(|| anyhow::anyhow!("invalid schedule.time '{}'", config.schedule.time))?;

    loop {
        let now = Utc::now();
        let next = next_run_after(now, hour, minute);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tracing::info!(next = %next, "sleeping until next scrape");
        tokio::time::sleep(wait).await;

        let today = Utc::now().date_naive();
        match ingest::run_all(config, store, today).await {
            Ok(summaries) => {
                for (mode, summary) in summaries {
                    tracing::info!(
                        mode = %mode,
                        extracted = summary.extracted,
                        written = summary.written,
                        "scheduled scrape finished"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "scheduled scrape failed, will retry next cycle");
            }
        }
    }
}
