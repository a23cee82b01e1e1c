//! WhatsApp-side glue: reply formatting, per-sender rate limiting, TwiML
//! rendering, and the Twilio REST sender.
//!
//! All user-facing text lives here as constants; the server routes pick
//! between them and the agent's answers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::config::{read_env, WhatsappConfig};
use crate::filter::group_by_subject;
use crate::models::StoredRecord;

/// Reply when a formatted read finds nothing.
pub const NOTHING_RECORDED: &str = "📚 אין שיעורי בית רשומים 🎉";

/// Reply when a sender trips the rate limit.
pub const RATE_LIMITED_REPLY: &str = "⏱️ יותר מדי הודעות! חכה רגע ונסה שוב.";

/// Generic failure reply. Internal error detail never reaches the sender.
pub const GENERIC_ERROR_REPLY: &str = "🤖 אופס, משהו השתבש. נסה שוב מאוחר יותר.";

const TRUNCATED_SUFFIX: &str = "\n\n... (ההודעה קוצרה, שאל על פרטים ספציפיים)";

/// Formats stored records as one WhatsApp message: a header, a section per
/// subject, a bullet per record. Truncated to `max_len` characters.
pub fn format_records(records: &[StoredRecord], max_len: usize) -> String {
    if records.is_empty() {
        return NOTHING_RECORDED.to_string();
    }

    let grouped = group_by_subject(records.to_vec());
    let mut message = String::from("📚 שיעורי בית:\n");
    for (subject, items) in &grouped {
        message.push_str(&format!("\n📖 {subject}:\n"));
        for item in items {
            message.push_str(&format!(
                "• {} ({}): {}",
                item.date, item.hour, item.homework_text
            ));
            if let Some(teacher) = &item.teacher {
                message.push_str(&format!(" ({teacher})"));
            }
            message.push('\n');
        }
    }

    truncate_message(message.trim_end().to_string(), max_len)
}

/// Cuts an over-long message at the last line break before the limit and
/// marks the cut.
pub fn truncate_message(message: String, max_len: usize) -> String {
    if message.chars().count() <= max_len {
        return message;
    }

    let keep = max_len.saturating_sub(50);
    let mut cut: String = message.chars().take(keep).collect();
    if let Some(pos) = cut.rfind('\n') {
        cut.truncate(pos);
    }
    cut + TRUNCATED_SUFFIX
}

/// Renders the webhook reply body Twilio expects.
pub fn twiml_reply(message: &str) -> String {
    format!(
        "<Response><Message>{}</Message></Response>",
        xml_escape(message)
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Per-sender sliding-window rate limiter. Purely in-memory; counters reset
/// on restart.
pub struct RateLimiter {
    per_minute: u32,
    per_hour: u32,
    requests: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(per_minute: u32, per_hour: u32) -> Self {
        Self {
            per_minute,
            per_hour,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Records the request and returns true if `sender` is within both
    /// windows. Rejected requests are not recorded.
    pub fn check(&self, sender: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.lock().unwrap();
        let timestamps = requests.entry(sender.to_string()).or_default();

        timestamps.retain(|t| now.duration_since(*t) < Duration::from_secs(3600));
        if timestamps.len() as u32 >= self.per_hour {
            tracing::warn!(sender, limit = self.per_hour, "hourly rate limit hit");
            return false;
        }

        let recent = timestamps
            .iter()
            .filter(|t| now.duration_since(**t) < Duration::from_secs(60))
            .count();
        if recent as u32 >= self.per_minute {
            tracing::warn!(sender, limit = self.per_minute, "per-minute rate limit hit");
            return false;
        }

        timestamps.push(now);
        true
    }
}

/// Outbound sender over the Twilio REST API.
pub struct TwilioSender {
    account_sid: String,
    auth_token: String,
    from_number: String,
    client: reqwest::Client,
}

impl TwilioSender {
    /// Reads the SID and auth token from the env vars the config names.
    pub fn new(config: &WhatsappConfig) -> Result<Self> {
        let account_sid = read_env(&config.account_sid_env)?;
        let auth_token = read_env(&config.auth_token_env)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            account_sid,
            auth_token,
            from_number: config.from_number.clone(),
            client,
        })
    }

    /// Sends `message` to `to` and returns the Twilio message SID.
    pub async fn send(&self, to: &str, message: &str) -> Result<String> {
        let to = if to.starts_with("whatsapp:") {
            to.to_string()
        } else {
            format!("whatsapp:{to}")
        };

        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        let params = [
            ("From", self.from_number.as_str()),
            ("To", to.as_str()),
            ("Body", message),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .context("Twilio request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Twilio API error {}: {}", status, body);
        }

        let json: serde_json::Value = response.json().await?;
        json.get("sid")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid Twilio response: missing sid"))
    }
}
