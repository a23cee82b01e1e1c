//! # Homewatch CLI (`hwk`)
//!
//! The `hwk` binary is the primary interface for Homewatch. It provides
//! commands for setup, scraping the school portal, inspecting stored
//! homework, asking the assistant questions, and running the WhatsApp
//! webhook server.
//!
//! ## Usage
//!
//! ```bash
//! hwk --config ./homewatch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hwk init` | Write a starter config and create the SQLite database |
//! | `hwk scrape --mode all` | Log in to the portal and pull homework |
//! | `hwk list` | Print stored homework records |
//! | `hwk today` | Print today's homework |
//! | `hwk ask "<question>"` | Ask the assistant a one-off question |
//! | `hwk serve` | Start the WhatsApp webhook server |
//! | `hwk schedule` | Run the daily scrape loop in the foreground |
//!
//! ## Examples
//!
//! ```bash
//! # First-time setup
//! hwk init
//!
//! # Pull both portal views
//! HW_PASSWORD=... hwk scrape --mode all
//!
//! # What landed?
//! hwk list --from 2025-10-26
//!
//! # One-off question from the terminal
//! ANTHROPIC_API_KEY=... hwk ask "מה יש במתמטיקה?"
//!
//! # Webhook server for Twilio
//! ANTHROPIC_API_KEY=... hwk serve
//! ```

mod agent;
mod config;
mod db;
mod extract;
mod filter;
mod ingest;
mod llm;
mod markup;
mod migrate;
mod models;
mod portal;
mod schedule;
mod server;
#[allow(dead_code)]
mod store;
mod whatsapp;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::models::{format_date, Mode, StoredRecord};
use crate::store::HomeworkStore;

/// Homewatch CLI: scrapes a school portal for homework, stores it locally,
/// and answers questions over WhatsApp.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. `hwk init` writes a commented starter file to get going.
#[derive(Parser)]
#[command(
    name = "hwk",
    about = "Homewatch: school portal homework scraper and WhatsApp assistant",
    version,
    long_about = "Homewatch logs in to a school portal, extracts homework from the daily and \
    historical views, deduplicates it into a local SQLite store, and answers questions about it \
    over a Twilio WhatsApp webhook backed by an LLM."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./homewatch.toml`. Portal credentials, store location,
    /// LLM, server, and WhatsApp settings are all read from this file.
    #[arg(long, global = true, default_value = "./homewatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Write a starter config and initialize the database.
    ///
    /// Creates a commented configuration file at the `--config` path and the
    /// SQLite database with all required tables. Refuses to overwrite an
    /// existing config file.
    Init,

    /// Log in to the portal and scrape homework.
    ///
    /// Fetches the selected portal view, extracts homework records, and
    /// upserts them into the store. Unchanged records are skipped, so
    /// running this repeatedly is cheap.
    Scrape {
        /// Which portal view to scrape: `daily`, `historical`, or `all`.
        #[arg(long, default_value = "all")]
        mode: String,
    },

    /// Print stored homework records.
    ///
    /// Without flags, prints the whole store ordered by date, hour, and
    /// subject.
    List {
        /// Only records for this exact date (YYYY-MM-DD).
        #[arg(long)]
        date: Option<String>,

        /// Records from this date onward (YYYY-MM-DD, inclusive).
        #[arg(long)]
        from: Option<String>,
    },

    /// Print today's homework.
    Today,

    /// Ask the assistant a one-off question.
    ///
    /// Runs the same pipeline as the WhatsApp webhook (intent
    /// classification, store read, LLM) and prints the answer. Requires the
    /// LLM API key in the environment.
    Ask {
        /// The question, in Hebrew or English.
        question: String,
    },

    /// Start the WhatsApp webhook server.
    ///
    /// Binds to `[server].host:port` and serves the Twilio webhook plus the
    /// operator endpoints. Requires the LLM API key in the environment;
    /// Twilio credentials are only needed for outbound sends.
    Serve,

    /// Run the scrape loop in the foreground.
    ///
    /// Scrapes both portal views once per day at `[schedule].time` (UTC)
    /// until the process is terminated. Failed runs are logged and retried
    /// the next cycle.
    Schedule,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Init writes the config file, so it runs before config loading.
    if matches!(cli.command, Commands::Init) {
        if cli.config.exists() {
            bail!(
                "{} already exists, refusing to overwrite it",
                cli.config.display()
            );
        }
        std::fs::write(&cli.config, config::STARTER_CONFIG)
            .with_context(|| format!("Failed to write {}", cli.config.display()))?;
        println!("Wrote starter config to {}", cli.config.display());

        let cfg = config::load_config(&cli.config)?;
        let pool = db::connect(&cfg.store.db_path).await?;
        migrate::run_migrations(&pool).await?;
        println!("Database initialized at {}", cfg.store.db_path.display());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            // Handled above (before config loading)
            unreachable!()
        }
        Commands::Scrape { mode } => {
            let store = open_store(&cfg).await?;
            let today = chrono::Utc::now().date_naive();
            let summaries = match mode.as_str() {
                "daily" => {
                    vec![(
                        Mode::Daily,
                        ingest::run_scrape(&cfg, &store, Mode::Daily, today).await?,
                    )]
                }
                "historical" => {
                    vec![(
                        Mode::Historical,
                        ingest::run_scrape(&cfg, &store, Mode::Historical, today).await?,
                    )]
                }
                "all" => ingest::run_all(&cfg, &store, today).await?,
                other => bail!("unknown mode '{}' (expected daily, historical, or all)", other),
            };
            for (mode, summary) in summaries {
                println!(
                    "{}: extracted {}, wrote {}",
                    mode, summary.extracted, summary.written
                );
            }
        }
        Commands::List { date, from } => {
            if date.is_some() && from.is_some() {
                bail!("pass either --date or --from, not both");
            }
            let store = open_store(&cfg).await?;
            let records = if let Some(date) = date {
                store.list_by_date(&date).await?
            } else if let Some(from) = from {
                store.list_from_date(&from).await?
            } else {
                store.list_all().await?
            };
            print_records(&records);
        }
        Commands::Today => {
            let store = open_store(&cfg).await?;
            let today = format_date(chrono::Utc::now().date_naive());
            let records = store.list_by_date(&today).await?;
            print_records(&records);
        }
        Commands::Ask { question } => {
            let store = open_store(&cfg).await?;
            let agent = agent::HomeworkAgent::new(llm::LlmClient::new(&cfg.llm)?);
            let today = chrono::Utc::now().date_naive();
            let answer = agent.answer(&store, &question, &[], today).await?;
            println!("{}", answer);
        }
        Commands::Serve => {
            let store: Arc<dyn HomeworkStore> = Arc::new(open_store(&cfg).await?);
            server::run_server(&cfg, store).await?;
        }
        Commands::Schedule => {
            let store = open_store(&cfg).await?;
            schedule::run_loop(&cfg, &store).await?;
        }
    }

    Ok(())
}

/// Opens the configured database, running migrations first so every command
/// works against a fresh file.
async fn open_store(cfg: &config::Config) -> anyhow::Result<store::sqlite::SqliteStore> {
    let pool = db::connect(&cfg.store.db_path).await?;
    migrate::run_migrations(&pool).await?;
    Ok(store::sqlite::SqliteStore::new(pool))
}

/// Prints records one per line in store order (date, hour, subject).
fn print_records(records: &[StoredRecord]) {
    if records.is_empty() {
        println!("No homework records.");
        return;
    }
    for record in records {
        print!(
            "{} ({}) {}: {}",
            record.date, record.hour, record.subject, record.homework_text
        );
        if let Some(teacher) = &record.teacher {
            print!(" [{}]", teacher);
        }
        println!();
    }
    println!("{} record(s)", records.len());
}

/// Logs go to stderr so stdout stays clean for command output.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hwk=info,homewatch=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
