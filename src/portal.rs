//! Thin fetch client for the school portal.
//!
//! Login is treated as an opaque two-step exchange: an init request that
//! seeds the cookie jar (including the XSRF token) and a JSON login that
//! upgrades it to an authenticated session. Cookies are carried explicitly
//! as a header string rather than through a cookie store, because the
//! portal's `webToken` must round-trip byte for byte.
//!
//! The client performs no parsing and no retries; callers decide what to do
//! with the raw body and when to try again.

use anyhow::{Context, Result};
use reqwest::header::{COOKIE, ORIGIN, REFERER, SET_COOKIE, USER_AGENT};
use std::time::Duration;

use crate::config::{read_env, PortalConfig};

const UA: &str = "Mozilla/5.0";

pub struct PortalClient {
    config: PortalConfig,
    password: String,
    client: reqwest::Client,
}

/// An authenticated session: the accumulated cookie header value.
pub struct PortalSession {
    cookies: String,
}

impl PortalClient {
    /// Reads the password from the env var the config names.
    pub fn new(config: &PortalConfig) -> Result<Self> {
        let password = read_env(&config.password_env)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            password,
            client,
        })
    }

    /// Init request for the XSRF token, then the JSON login. Returns the
    /// session cookies for the fetch calls.
    pub async fn login(&self) -> Result<PortalSession> {
        let mut jar: Vec<(String, String)> = Vec::new();

        let init_url = format!("{}/server/api/user/init", self.config.api_base_url);
        let response = self
            .client
            .get(&init_url)
            .header(USER_AGENT, UA)
            .send()
            .await
            .with_context(|| format!("portal init request failed: {init_url}"))?;
        absorb_response_cookies(&mut jar, &response);

        let xsrf = cookie_value(&jar, "XSRF-TOKEN")
            .ok_or_else(|| anyhow::anyhow!("portal init did not set XSRF-TOKEN"))?
            .to_string();

        let login_url = format!("{}/server/api/user/LoginMoe", self.config.api_base_url);
        let body = serde_json::json!({
            "username": self.config.username,
            "password": self.password,
            "rememberme": 0,
            "language": "he",
        });
        let response = self
            .client
            .post(&login_url)
            .header(USER_AGENT, UA)
            .header("x-xsrf-token", &xsrf)
            .header(ORIGIN, &self.config.base_url)
            .header(REFERER, format!("{}/", self.config.base_url))
            .header(COOKIE, cookie_header(&jar))
            .json(&body)
            .send()
            .await
            .context("portal login request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("portal login failed with {}: {}", status, text);
        }
        absorb_response_cookies(&mut jar, &response);

        Ok(PortalSession {
            cookies: cookie_header(&jar),
        })
    }

    /// Fetches the current-day card markup. Returns (body, source id).
    pub async fn fetch_daily(&self, session: &PortalSession) -> Result<(String, String)> {
        let url = format!(
            "{}/api/studentCard?id={}",
            self.config.base_url, self.config.module_id
        );
        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, UA)
            .header(COOKIE, &session.cookies)
            .send()
            .await
            .with_context(|| format!("daily fetch failed: {url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("daily fetch returned {}", status);
        }
        let body = response.text().await.context("reading daily fetch body")?;
        Ok((body, url))
    }

    /// Fetches the multi-week lessons-and-homework document. Returns
    /// (body, source id).
    pub async fn fetch_historical(&self, session: &PortalSession) -> Result<(String, String)> {
        let url = format!(
            "{}/server/api/PupilCard/GetPupilLessonsAndHomework",
            self.config.api_base_url
        );
        let body = serde_json::json!({
            "weekIndex": 0,
            "viewType": 0,
            "studyYear": self.config.study_year,
            "studyYearName": self.config.study_year_name,
            "studentID": self.config.student_id,
            "studentName": self.config.student_name,
            "classCode": self.config.class_code,
            "periodID": self.config.period_id,
            "periodName": self.config.period_name,
            "moduleID": self.config.module_id,
        });

        let response = self
            .client
            .post(&url)
            .header(USER_AGENT, UA)
            .header("Language", "he")
            .header(COOKIE, &session.cookies)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("historical fetch failed: {url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("historical fetch returned {}", status);
        }
        let text = response.text().await.context("reading historical fetch body")?;
        Ok((text, url))
    }
}

/// Folds `Set-Cookie` name=value pairs into the jar, last value per name
/// winning. Attributes after the first `;` are dropped.
fn absorb_cookies<'a>(
    jar: &mut Vec<(String, String)>,
    set_cookie_values: impl Iterator<Item = &'a str>,
) {
    for value in set_cookie_values {
        let pair = value.split(';').next().unwrap_or(value);
        if let Some((name, val)) = pair.split_once('=') {
            let name = name.trim();
            let val = val.trim();
            if name.is_empty() {
                continue;
            }
            match jar.iter_mut().find(|(n, _)| n == name) {
                Some(entry) => entry.1 = val.to_string(),
                None => jar.push((name.to_string(), val.to_string())),
            }
        }
    }
}

fn absorb_response_cookies(jar: &mut Vec<(String, String)>, response: &reqwest::Response) {
    absorb_cookies(
        jar,
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok()),
    );
}

fn cookie_header(jar: &[(String, String)]) -> String {
    jar.iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn cookie_value<'a>(jar: &'a [(String, String)], name: &str) -> Option<&'a str> {
    jar.iter()
        .find(|(n, _)| n == name)
        .map(|(_, value)| value.as_str())
}
