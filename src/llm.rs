//! Anthropic messages API client.
//!
//! One request per question: a system prompt, the trimmed per-sender
//! conversation history, and the current user turn.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, ... (exponential, capped at 2^5)

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::LlmConfig;

const MAX_RETRIES: u32 = 2;
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// One prior conversation turn, oldest first.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

pub struct LlmClient {
    config: LlmConfig,
    api_key: String,
    client: reqwest::Client,
}

impl LlmClient {
    /// Reads the API key from the env var the config names.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = crate::config::read_env(&config.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            config: config.clone(),
            api_key,
            client,
        })
    }

    /// Completes `user_message` against the configured model and returns the
    /// reply text.
    pub async fn complete(
        &self,
        system: &str,
        history: &[ChatTurn],
        user_message: &str,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": system,
            "messages": self.build_messages(history, user_message),
        });

        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.config.api_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_completion(&json);
                    }

                    // 429 and 5xx are retryable
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("LLM API error {}: {}", status, body_text));
                        continue;
                    }

                    // Other client errors are final
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("LLM API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("LLM request failed after retries")))
    }

    /// History trimmed to the configured window, then the current turn.
    fn build_messages(&self, history: &[ChatTurn], user_message: &str) -> Vec<serde_json::Value> {
        let skip = history.len().saturating_sub(self.config.max_history);
        let mut messages: Vec<serde_json::Value> = history[skip..]
            .iter()
            .map(|turn| serde_json::json!({"role": turn.role, "content": turn.content}))
            .collect();
        messages.push(serde_json::json!({"role": "user", "content": user_message}));
        messages
    }
}

/// Extracts the reply from a messages API response: the concatenated `text`
/// blocks of `content`.
fn parse_completion(json: &serde_json::Value) -> Result<String> {
    let content = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid LLM response: missing content array"))?;

    let mut text = String::new();
    for block in content {
        if block.get("type").and_then(|t| t.as_str()) == Some("text") {
            if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                text.push_str(t);
            }
        }
    }

    if text.is_empty() {
        bail!("Invalid LLM response: no text blocks");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_history_window(max_history: usize) -> LlmClient {
        LlmClient {
            config: LlmConfig {
                max_history,
                ..LlmConfig::default()
            },
            api_key: String::new(),
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn test_parse_completion_concatenates_text_blocks() {
        let json = serde_json::json!({
            "content": [
                {"type": "text", "text": "שלום"},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": " עולם"},
            ]
        });
        assert_eq!(parse_completion(&json).unwrap(), "שלום עולם");
    }

    #[test]
    fn test_parse_completion_rejects_missing_content() {
        let json = serde_json::json!({"id": "msg_1"});
        assert!(parse_completion(&json).is_err());
    }

    #[test]
    fn test_parse_completion_rejects_empty_text() {
        let json = serde_json::json!({"content": []});
        assert!(parse_completion(&json).is_err());
    }

    #[test]
    fn test_history_is_trimmed_to_window() {
        let client = client_with_history_window(2);
        let history = vec![
            ChatTurn::user("one"),
            ChatTurn::assistant("two"),
            ChatTurn::user("three"),
            ChatTurn::assistant("four"),
        ];
        let messages = client.build_messages(&history, "five");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["content"], "three");
        assert_eq!(messages[2]["content"], "five");
        assert_eq!(messages[2]["role"], "user");
    }
}
