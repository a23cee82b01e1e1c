use anyhow::{Context, Result};
use chrono::Datelike;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub portal: PortalConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub whatsapp: WhatsappConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortalConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    pub username: String,
    #[serde(default = "default_password_env")]
    pub password_env: String,
    /// Opaque student identifier issued by the portal, not a number.
    pub student_id: String,
    pub student_name: String,
    #[serde(default = "default_study_year")]
    pub study_year: i32,
    #[serde(default)]
    pub study_year_name: String,
    #[serde(default)]
    pub class_code: i64,
    #[serde(default)]
    pub period_id: i64,
    #[serde(default)]
    pub period_name: String,
    #[serde(default = "default_module_id")]
    pub module_id: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://webtop.smartschool.co.il".to_string()
}
fn default_api_base_url() -> String {
    "https://webtopserver.smartschool.co.il".to_string()
}
fn default_password_env() -> String {
    "HW_PASSWORD".to_string()
}
fn default_study_year() -> i32 {
    chrono::Utc::now().year()
}
fn default_module_id() -> i64 {
    11
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("homework.db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key_env: default_api_key_env(),
            api_url: default_api_url(),
            max_tokens: default_max_tokens(),
            max_history: default_max_history(),
        }
    }
}

fn default_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}
fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}
fn default_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_max_history() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_webhook_secret_env")]
    pub webhook_secret_env: String,
    #[serde(default)]
    pub verify_signatures: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webhook_secret_env: default_webhook_secret_env(),
            verify_signatures: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_webhook_secret_env() -> String {
    "HW_WEBHOOK_SECRET".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WhatsappConfig {
    #[serde(default = "default_account_sid_env")]
    pub account_sid_env: String,
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,
    #[serde(default = "default_from_number")]
    pub from_number: String,
    #[serde(default = "default_rate_per_minute")]
    pub rate_per_minute: u32,
    #[serde(default = "default_rate_per_hour")]
    pub rate_per_hour: u32,
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

impl Default for WhatsappConfig {
    fn default() -> Self {
        Self {
            account_sid_env: default_account_sid_env(),
            auth_token_env: default_auth_token_env(),
            from_number: default_from_number(),
            rate_per_minute: default_rate_per_minute(),
            rate_per_hour: default_rate_per_hour(),
            max_message_len: default_max_message_len(),
        }
    }
}

fn default_account_sid_env() -> String {
    "TWILIO_ACCOUNT_SID".to_string()
}
fn default_auth_token_env() -> String {
    "TWILIO_AUTH_TOKEN".to_string()
}
fn default_from_number() -> String {
    "whatsapp:+14155238886".to_string()
}
fn default_rate_per_minute() -> u32 {
    10
}
fn default_rate_per_hour() -> u32 {
    100
}
fn default_max_message_len() -> usize {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    /// Daily scrape time, 24h "HH:MM".
    #[serde(default = "default_schedule_time")]
    pub time: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            time: default_schedule_time(),
        }
    }
}

fn default_schedule_time() -> String {
    "18:00".to_string()
}

/// Parses a 24h "HH:MM" string.
pub fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

/// Reads a secret through the env var name the config points at.
pub fn read_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("environment variable {name} is not set"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate portal
    if config.portal.base_url.is_empty() {
        anyhow::bail!("portal.base_url must not be empty");
    }
    if config.portal.api_base_url.is_empty() {
        anyhow::bail!("portal.api_base_url must not be empty");
    }

    // Validate server
    if config.server.port == 0 {
        anyhow::bail!("server.port must be > 0");
    }

    // Validate whatsapp
    if config.whatsapp.rate_per_minute == 0 || config.whatsapp.rate_per_hour == 0 {
        anyhow::bail!("whatsapp rate limits must be > 0");
    }

    // Validate schedule
    if parse_hhmm(&config.schedule.time).is_none() {
        anyhow::bail!(
            "schedule.time must be 24h HH:MM, got '{}'",
            config.schedule.time
        );
    }

    Ok(config)
}

/// Starter file written by `hwk init`. Parses as-is; the placeholders only
/// matter once a scrape actually runs.
pub const STARTER_CONFIG: &str = r#"# homewatch configuration

[portal]
# base_url = "https://webtop.smartschool.co.il"
# api_base_url = "https://webtopserver.smartschool.co.il"
username = "your-portal-username"
# Password is read from this environment variable, never from this file.
# password_env = "HW_PASSWORD"
# Opaque student identifier as issued by the portal.
student_id = ""
student_name = ""
# study_year = 2026
study_year_name = ""
class_code = 0
period_id = 0
period_name = ""
# module_id = 11
# timeout_secs = 30

[store]
# db_path = "homework.db"

[llm]
# model = "claude-3-5-haiku-latest"
# api_key_env = "ANTHROPIC_API_KEY"
# max_tokens = 1024
# max_history = 10

[server]
# host = "127.0.0.1"
# port = 8080
# verify_signatures = false
# webhook_secret_env = "HW_WEBHOOK_SECRET"

[whatsapp]
# account_sid_env = "TWILIO_ACCOUNT_SID"
# auth_token_env = "TWILIO_AUTH_TOKEN"
# from_number = "whatsapp:+14155238886"
# rate_per_minute = 10
# rate_per_hour = 100
# max_message_len = 1500

[schedule]
# time = "18:00"
"#;
