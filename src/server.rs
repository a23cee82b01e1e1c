//! HTTP server for the WhatsApp webhook and operator endpoints.
//!
//! Twilio delivers inbound WhatsApp messages as form-encoded POSTs and reads
//! the reply off the HTTP response as TwiML, so the webhook answers `200`
//! with an XML body for every request that passes the signature check.
//! Outbound pushes go through `POST /send-message`, which calls the Twilio
//! REST API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/webhook/whatsapp` | Inbound message webhook (replies with TwiML) |
//! | `POST` | `/send-message` | Send an outbound WhatsApp message |
//! | `GET`  | `/stats` | Service counters and store size |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! The JSON endpoints fail with:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "to must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `unavailable`
//! (503), `internal` (500). The webhook never surfaces errors to the sender:
//! failures inside message handling degrade to a fixed Hebrew error reply
//! inside a normal `200` TwiML response.
//!
//! # Signature Verification
//!
//! With `[server] verify_signatures = true`, every webhook POST must carry
//! an `X-Webhook-Signature` header holding the hex HMAC-SHA256 of the raw
//! request body under the shared secret. Requests that fail the check are
//! rejected with `401` before any processing.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};

use crate::agent::HomeworkAgent;
use crate::config::{read_env, Config};
use crate::llm::{ChatTurn, LlmClient};
use crate::models::{format_date, StoredRecord};
use crate::store::HomeworkStore;
use crate::whatsapp::{
    format_records, truncate_message, twiml_reply, RateLimiter, TwilioSender,
    GENERIC_ERROR_REPLY, RATE_LIMITED_REPLY,
};

/// Reply for greetings, `עזרה`, and empty messages.
const HELP_TEXT: &str = "🤖 עוזר שיעורי הבית

אפשר לשאול בשפה חופשית, למשל \"מה יש במתמטיקה?\", או לשלוח קיצור:
• היום - שיעורי בית להיום
• מחר - שיעורי בית למחר
• הכל - כל שיעורי הבית
• עזרה - ההודעה הזו";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    /// Application configuration (wrapped in `Arc` for cheap cloning across handlers).
    config: Arc<Config>,
    /// Homework store shared with the scraper.
    store: Arc<dyn HomeworkStore>,
    /// Conversational agent for free-form questions.
    agent: Arc<HomeworkAgent>,
    /// Outbound Twilio sender. `None` when credentials are not configured.
    sender: Option<Arc<TwilioSender>>,
    /// Sliding-window rate limiter keyed by sender number.
    limiter: Arc<RateLimiter>,
    /// Shared secret for webhook signature checks, when enabled.
    webhook_secret: Option<Arc<String>>,
    /// Per-sender conversation history fed back to the LLM.
    histories: Arc<Mutex<HashMap<String, Vec<ChatTurn>>>>,
    /// Counters reported by `GET /stats`.
    stats: Arc<ServeStats>,
}

/// Counters surfaced by `GET /stats`. Monotonic for the lifetime of the process.
#[derive(Default)]
struct ServeStats {
    /// Webhook messages accepted past the signature check.
    messages_total: AtomicU64,
    /// Webhook messages refused by the rate limiter.
    rate_limited_total: AtomicU64,
}

/// Starts the HTTP server.
///
/// Binds to `[server].host:port` and serves until the process is terminated.
/// Fails fast when the LLM API key is missing, or when signature verification
/// is enabled without its secret. Missing Twilio credentials only disable
/// `POST /send-message`: webhook replies ride the TwiML response and do not
/// need the REST sender.
pub async fn run_server(config: &Config, store: Arc<dyn HomeworkStore>) -> anyhow::Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let agent = HomeworkAgent::new(LlmClient::new(&config.llm)?);

    let sender = match TwilioSender::new(&config.whatsapp) {
        Ok(sender) => Some(Arc::new(sender)),
        Err(e) => {
            tracing::warn!(error = %e, "Twilio sender unavailable, POST /send-message is disabled");
            None
        }
    };

    let webhook_secret = if config.server.verify_signatures {
        Some(Arc::new(read_env(&config.server.webhook_secret_env)?))
    } else {
        None
    };

    let state = AppState {
        config: Arc::new(config.clone()),
        store,
        agent: Arc::new(agent),
        sender,
        limiter: Arc::new(RateLimiter::new(
            config.whatsapp.rate_per_minute,
            config.whatsapp.rate_per_hour,
        )),
        webhook_secret,
        histories: Arc::new(Mutex::new(HashMap::new())),
        stats: Arc::new(ServeStats::default()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/webhook/whatsapp", post(handle_webhook))
        .route("/send-message", post(handle_send_message))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("Server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"unauthorized"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// Constructs a 401 Unauthorized error.
fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: message.into(),
    }
}

/// Constructs a 503 Service Unavailable error.
fn unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "unavailable".to_string(),
        message: message.into(),
    }
}

/// Constructs a 500 Internal Server Error.
fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ POST /webhook/whatsapp ============

/// Incoming Twilio webhook fields. Twilio posts many more; unknown fields
/// are ignored, missing ones default to empty.
#[derive(Debug, Default, Deserialize)]
struct WebhookForm {
    #[serde(rename = "From", default)]
    from: String,
    #[serde(rename = "Body", default)]
    body: String,
}

/// Quick commands answered straight from the store, without the LLM.
enum QuickCommand {
    Help,
    Today,
    Tomorrow,
    All,
}

/// Matches a normalized (trimmed, lowercased) message against the quick
/// commands. Anything else goes to the agent.
fn quick_command(normalized: &str) -> Option<QuickCommand> {
    match normalized {
        "" | "עזרה" | "help" | "hi" | "שלום" | "היי" => Some(QuickCommand::Help),
        "היום" | "today" => Some(QuickCommand::Today),
        "מחר" | "tomorrow" => Some(QuickCommand::Tomorrow),
        "הכל" | "הכול" | "all" => Some(QuickCommand::All),
        _ => None,
    }
}

/// Handler for `POST /webhook/whatsapp`.
///
/// Twilio retries non-200 responses, so once past the signature check this
/// handler always answers `200` with a TwiML body. Failures inside message
/// handling are logged and degrade to a fixed error reply.
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Some(secret) = &state.webhook_secret {
        if !signature_matches(secret.as_str(), &headers, body.as_bytes()) {
            return unauthorized("missing or invalid webhook signature").into_response();
        }
    }

    let form: WebhookForm = serde_urlencoded::from_str(&body).unwrap_or_default();
    state.stats.messages_total.fetch_add(1, Ordering::Relaxed);

    if !state.limiter.check(&form.from) {
        state.stats.rate_limited_total.fetch_add(1, Ordering::Relaxed);
        return xml_reply(RATE_LIMITED_REPLY);
    }

    let reply = build_reply(&state, &form.from, &form.body).await;
    let reply = truncate_message(reply, state.config.whatsapp.max_message_len);
    xml_reply(&reply)
}

/// Routes one inbound message to a quick command or the agent and returns
/// the reply text.
async fn build_reply(state: &AppState, from: &str, body: &str) -> String {
    let today = chrono::Utc::now().date_naive();
    let normalized = body.trim().to_lowercase();

    match quick_command(&normalized) {
        Some(QuickCommand::Help) => HELP_TEXT.to_string(),
        Some(QuickCommand::Today) => {
            records_reply(state, state.store.list_by_date(&format_date(today)).await)
        }
        Some(QuickCommand::Tomorrow) => {
            let date = today.succ_opt().map(format_date).unwrap_or_default();
            records_reply(state, state.store.list_by_date(&date).await)
        }
        Some(QuickCommand::All) => records_reply(state, state.store.list_all().await),
        None => ask_agent(state, from, body, today).await,
    }
}

/// Formats a store read for the sender, degrading to the fixed error reply
/// when the read fails.
fn records_reply(state: &AppState, records: anyhow::Result<Vec<StoredRecord>>) -> String {
    match records {
        Ok(records) => format_records(&records, state.config.whatsapp.max_message_len),
        Err(e) => {
            tracing::warn!(error = %e, "store read failed while answering quick command");
            GENERIC_ERROR_REPLY.to_string()
        }
    }
}

/// Sends a free-form question through the agent, carrying and extending the
/// sender's conversation history. History only grows on success.
async fn ask_agent(state: &AppState, from: &str, question: &str, today: NaiveDate) -> String {
    let history: Vec<ChatTurn> = state
        .histories
        .lock()
        .unwrap()
        .get(from)
        .cloned()
        .unwrap_or_default();

    match state
        .agent
        .answer(state.store.as_ref(), question, &history, today)
        .await
    {
        Ok(reply) => {
            let mut histories = state.histories.lock().unwrap();
            let turns = histories.entry(from.to_string()).or_default();
            turns.push(ChatTurn::user(question));
            turns.push(ChatTurn::assistant(&reply));
            // Two entries per exchange; prune to the client's history window.
            let cap = state.config.llm.max_history * 2;
            if turns.len() > cap {
                let excess = turns.len() - cap;
                turns.drain(..excess);
            }
            reply
        }
        Err(e) => {
            tracing::warn!(error = %e, sender = %from, "agent failed to answer");
            GENERIC_ERROR_REPLY.to_string()
        }
    }
}

/// Wraps a message in TwiML with the content type Twilio expects.
fn xml_reply(message: &str) -> Response {
    (
        [(header::CONTENT_TYPE, "application/xml")],
        twiml_reply(message),
    )
        .into_response()
}

/// Checks the `X-Webhook-Signature` header against the hex HMAC-SHA256 of
/// the raw request body.
fn signature_matches(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    let provided = headers
        .get("x-webhook-signature")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| hex::decode(value.trim()).ok());
    let Some(provided) = provided else {
        return false;
    };
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

// ============ POST /send-message ============

/// JSON request body for `POST /send-message`.
#[derive(Deserialize)]
struct SendMessageRequest {
    /// Destination number, with or without the `whatsapp:` prefix.
    to: String,
    /// Message text. Over-long messages are truncated before sending.
    message: String,
}

/// JSON response body for `POST /send-message`.
#[derive(Serialize)]
struct SendMessageResponse {
    /// Twilio message SID of the queued message.
    sid: String,
}

/// Handler for `POST /send-message`.
///
/// Returns `503` when Twilio credentials were not configured at startup and
/// `400` for empty fields.
async fn handle_send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, AppError> {
    let sender = state
        .sender
        .as_ref()
        .ok_or_else(|| unavailable("Twilio credentials are not configured"))?;

    if req.to.trim().is_empty() {
        return Err(bad_request("to must not be empty"));
    }
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let message = truncate_message(req.message, state.config.whatsapp.max_message_len);
    let sid = sender
        .send(&req.to, &message)
        .await
        .map_err(|e| internal(format!("send failed: {}", e)))?;

    Ok(Json(SendMessageResponse { sid }))
}

// ============ GET /stats ============

/// JSON response body for `GET /stats`.
#[derive(Serialize)]
struct StatsResponse {
    /// Webhook messages accepted since startup.
    messages_total: u64,
    /// Messages refused by the rate limiter since startup.
    rate_limited_total: u64,
    /// Senders with at least one remembered conversation turn.
    active_conversations: usize,
    /// Rows currently in the homework table.
    records_stored: u64,
}

/// Handler for `GET /stats`.
async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let records_stored = state
        .store
        .count()
        .await
        .map_err(|e| internal(format!("store count failed: {}", e)))?;

    Ok(Json(StatsResponse {
        messages_total: state.stats.messages_total.load(Ordering::Relaxed),
        rate_limited_total: state.stats.rate_limited_total.load(Ordering::Relaxed),
        active_conversations: state.histories.lock().unwrap().len(),
        records_stored,
    }))
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

/// Handler for `GET /health`.
///
/// Returns a simple health check response with the server status and version.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
