//! HTTP surface: health endpoints and signed webhook receivers.

pub mod signature;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderMap, StatusCode, Uri, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::channels::{PushIngest, PushSource};
use crate::config::RelayConfig;

pub const TRELLO_SIGNATURE_HEADER: &str = "x-trello-webhook";
pub const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const GITHUB_EVENT_HEADER: &str = "x-github-event";
pub const INTERNAL_TOKEN_HEADER: &str = "x-relay-token";

/// GitHub delivers payloads up to 25 MB.
pub const MAX_WEBHOOK_BODY: usize = 25 * 1024 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingest: PushIngest,
    pub trello_secret: SecretString,
    /// Fixed callback URL for Trello signatures; derived from the request when unset.
    pub trello_callback_url: Option<String>,
    pub github_secret: SecretString,
    /// Guards `/api/*` when non-empty.
    pub internal_token: SecretString,
}

impl AppState {
    pub fn new(ingest: PushIngest, config: &RelayConfig) -> Self {
        Self {
            ingest,
            trello_secret: config.trello_secret.clone(),
            trello_callback_url: config.trello_callback_url.clone(),
            github_secret: config.github_secret.clone(),
            internal_token: config.internal_token.clone(),
        }
    }
}

/// Build the Axum router for the relay.
pub fn relay_routes(state: AppState) -> Router {
    let webhooks = Router::new()
        .route("/webhook/trello", post(trello_webhook).head(trello_probe))
        .route("/webhook/github", post(github_webhook))
        .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY));

    let api = Router::new()
        .route("/api/status", get(status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_internal_token,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(webhooks)
        .merge(api)
        .with_state(state)
}

/// Reject `/api/*` requests without the internal token, when one is configured.
async fn require_internal_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.internal_token.expose_secret();
    if expected.is_empty() {
        return next.run(request).await;
    }
    let presented = header_str(request.headers(), INTERNAL_TOKEN_HEADER);
    if presented.is_empty() || !bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        warn!(path = %request.uri().path(), "Rejected request without a valid internal token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "unauthorized" })),
        )
            .into_response();
    }
    next.run(request).await
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME")
    }))
}

// ── Webhooks ────────────────────────────────────────────────────────

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn accepted() -> Response {
    Json(serde_json::json!({ "ok": true })).into_response()
}

fn forbidden(source: PushSource) -> Response {
    warn!(source = %source, "Webhook signature verification failed");
    (StatusCode::FORBIDDEN, "forbidden").into_response()
}

/// Trello probes the callback with HEAD when a webhook is registered.
async fn trello_probe() -> StatusCode {
    StatusCode::OK
}

async fn trello_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    let callback_url = match &state.trello_callback_url {
        Some(url) => url.clone(),
        None => format!("https://{}{}", header_str(&headers, header::HOST.as_str()), uri.path()),
    };
    if !signature::verify_trello(
        &body,
        header_str(&headers, TRELLO_SIGNATURE_HEADER),
        state.trello_secret.expose_secret(),
        &callback_url,
    ) {
        debug!(callback_url = %callback_url, "Trello callback URL used for verification");
        return forbidden(PushSource::Trello);
    }

    state
        .ingest
        .handle_push_event(PushSource::Trello, &body, None)
        .await;
    accepted()
}

async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !signature::verify_github(
        &body,
        header_str(&headers, GITHUB_SIGNATURE_HEADER),
        state.github_secret.expose_secret(),
    ) {
        return forbidden(PushSource::GitHub);
    }

    let event_type = header_str(&headers, GITHUB_EVENT_HEADER);
    state
        .ingest
        .handle_push_event(PushSource::GitHub, &body, Some(event_type))
        .await;
    accepted()
}
