//! # Homewatch
//!
//! Scrapes a school portal for homework, stores it locally, and answers
//! questions about it over WhatsApp.
//!
//! Homewatch logs in to the portal, pulls the daily and historical homework
//! views, extracts records from their very different shapes, and upserts
//! them into a SQLite store keyed by (date, hour, subject). A Twilio
//! webhook answers questions against that store, either directly or through
//! an LLM.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ School portal │──▶│  Extractor   │──▶│  SQLite   │
//! │ daily + hist  │   │ dedup/upsert │   │  store    │
//! └──────────────┘   └─────────────┘   └────┬─────┘
//!                                           │
//!                       ┌───────────────────┤
//!                       ▼                   ▼
//!                  ┌──────────┐       ┌──────────┐
//!                  │   CLI    │       │ WhatsApp │
//!                  │  (hwk)   │       │ webhook  │
//!                  └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hwk init                      # write starter config, create database
//! hwk scrape --mode all         # pull both portal views
//! hwk list                      # inspect what landed
//! hwk ask "מה יש מחר?"          # one-off question
//! hwk serve                     # Twilio webhook server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`portal`] | Portal login and fetching |
//! | [`markup`] | Tolerant markup tree for the daily view |
//! | [`extract`] | Payload to homework record extraction |
//! | [`store`] | Store trait, SQLite and in-memory backends |
//! | [`ingest`] | Scrape pipeline (fetch, snapshot, extract, upsert) |
//! | [`filter`] | Question intent classification and record filtering |
//! | [`llm`] | LLM chat client |
//! | [`agent`] | Question answering against the store |
//! | [`whatsapp`] | Message formatting, rate limiting, Twilio sending |
//! | [`server`] | Webhook HTTP server |
//! | [`schedule`] | Daily scrape loop |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod agent;
pub mod config;
pub mod db;
pub mod extract;
pub mod filter;
pub mod ingest;
pub mod llm;
pub mod markup;
pub mod migrate;
pub mod models;
pub mod portal;
pub mod schedule;
pub mod server;
pub mod store;
pub mod whatsapp;
