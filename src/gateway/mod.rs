//! Control-plane gateway.
//!
//! Three small HTTP surfaces consumed by the session manager (and the
//! settings UI): credential minting against the realtime provider, a
//! flat-file settings store, and a currency-rate proxy with a fixed
//! fallback. Settings are persisted verbatim so a POST/GET round trip is
//! byte-for-byte.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::config;

/// Upstream endpoint that mints realtime session credentials.
const SESSIONS_URL: &str = "https://api.openai.com/v1/realtime/sessions";

/// Upstream currency API (USD -> JPY).
const EXCHANGE_URL: &str = "http://api.exchangerate.host/live";

/// Rate returned when the upstream lookup cannot be used.
const FALLBACK_RATE: f64 = 150.0;

/// Shared gateway state.
pub struct GatewayState {
    pub settings_path: PathBuf,
    pub openai_api_key: Option<String>,
    pub exchange_api_key: Option<String>,
    pub sessions_url: String,
    http: reqwest::Client,
}

impl GatewayState {
    /// State from the environment: `OPENAI_API_KEY`, `EXCHANGE_RATE_API_KEY`.
    pub fn from_env() -> Self {
        Self::new(
            config::settings_path(),
            std::env::var("OPENAI_API_KEY").ok(),
            std::env::var("EXCHANGE_RATE_API_KEY").ok(),
        )
    }

    pub fn new(
        settings_path: PathBuf,
        openai_api_key: Option<String>,
        exchange_api_key: Option<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("HTTP client construction cannot fail with static options");
        Self {
            settings_path,
            openai_api_key,
            exchange_api_key,
            sessions_url: SESSIONS_URL.to_string(),
            http,
        }
    }
}

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/session", get(session_not_allowed).post(create_session))
        .route("/settings", get(get_settings).post(post_settings))
        .route("/rate", get(get_rate))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Gateway listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// /session
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SessionRequest {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    voice: Option<String>,
}

async fn session_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Use POST /session to create a session with a model" })),
    )
        .into_response()
}

/// Mint a short-lived credential scoped to the requested model/voice.
async fn create_session(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<SessionRequest>,
) -> Response {
    let api_key = match &state.openai_api_key {
        Some(key) => key.clone(),
        None => {
            error!("OPENAI_API_KEY is not set");
            return internal_error("Failed to create session");
        }
    };

    let model = req.model.unwrap_or_else(|| "gpt-realtime-2025-08-28".to_string());
    let voice = req.voice.unwrap_or_else(|| "verse".to_string());

    let upstream = state
        .http
        .post(&state.sessions_url)
        .header(header::AUTHORIZATION, format!("Bearer {}", api_key))
        .json(&json!({ "model": model, "voice": voice }))
        .send()
        .await;

    match upstream {
        Ok(resp) if resp.status().is_success() => match resp.json::<serde_json::Value>().await {
            Ok(body) => Json(body).into_response(),
            Err(e) => {
                error!("Bad session response body: {}", e);
                internal_error("Failed to create session")
            }
        },
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!("Session mint returned HTTP {}: {}", status, body);
            internal_error("Failed to create session")
        }
        Err(e) => {
            error!("Session mint request failed: {}", e);
            internal_error("Failed to create session")
        }
    }
}

// ---------------------------------------------------------------------------
// /settings
// ---------------------------------------------------------------------------

/// Return the stored settings document, or `{}` when nothing is stored.
async fn get_settings(State(state): State<Arc<GatewayState>>) -> Response {
    match tokio::fs::read(&state.settings_path).await {
        Ok(bytes) => json_bytes(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => json_bytes(b"{}".to_vec()),
        Err(e) => {
            error!("Failed to read settings: {}", e);
            internal_error("Failed to read settings")
        }
    }
}

/// Persist the posted document verbatim after a well-formedness check.
async fn post_settings(State(state): State<Arc<GatewayState>>, body: Bytes) -> Response {
    if serde_json::from_slice::<serde_json::Value>(&body).is_err() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Settings must be a JSON document" })),
        )
            .into_response();
    }

    if let Some(parent) = state.settings_path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    match tokio::fs::write(&state.settings_path, &body).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => {
            error!("Failed to save settings: {}", e);
            internal_error("Failed to save settings")
        }
    }
}

// ---------------------------------------------------------------------------
// /rate
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    quotes: Option<ExchangeQuotes>,
}

#[derive(Debug, Deserialize)]
struct ExchangeQuotes {
    #[serde(rename = "USDJPY")]
    usd_jpy: Option<f64>,
}

/// Look up the USD/JPY rate, falling back to the fixed default on any
/// failure so callers always get a usable number.
async fn get_rate(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    let api_key = match &state.exchange_api_key {
        Some(key) => key.clone(),
        None => {
            warn!("EXCHANGE_RATE_API_KEY not set, using default rate");
            return Json(json!({ "rate": FALLBACK_RATE }));
        }
    };

    let url = format!(
        "{}?access_key={}&source=USD&currencies=JPY",
        EXCHANGE_URL, api_key
    );
    match state.http.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<ExchangeResponse>().await {
            Ok(parsed) if parsed.success => match parsed.quotes.and_then(|q| q.usd_jpy) {
                Some(rate) => Json(json!({ "rate": rate })),
                None => {
                    error!("Exchange response missing USDJPY quote");
                    Json(json!({ "rate": FALLBACK_RATE }))
                }
            },
            Ok(_) => {
                error!("Exchange API reported failure");
                Json(json!({ "rate": FALLBACK_RATE }))
            }
            Err(e) => {
                error!("Bad exchange response: {}", e);
                Json(json!({ "rate": FALLBACK_RATE }))
            }
        },
        Ok(resp) => {
            error!("Exchange API returned HTTP {}", resp.status());
            Json(json!({ "rate": FALLBACK_RATE }))
        }
        Err(e) => {
            error!("Exchange lookup failed: {}", e);
            Json(json!({ "rate": FALLBACK_RATE }))
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn internal_error(msg: &str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": msg }))).into_response()
}

/// Raw bytes with a JSON content type (used to keep stored settings
/// byte-for-byte identical on the way out).
fn json_bytes(bytes: Vec<u8>) -> Response {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        bytes,
    )
        .into_response()
}
