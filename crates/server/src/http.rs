//! HTTP endpoints
//!
//! The telephony webhook that answers an inbound call, the media stream
//! WebSocket upgrade, and the operational endpoints.

use axum::{
    extract::{Form, State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::ws;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Telephony webhook: the PBX posts here on an inbound call.
        .route("/voice", post(voice_webhook))
        // Bidirectional media stream.
        .route("/", get(media_upgrade))
        // Operational endpoints.
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Inbound call notification, form-encoded by the carrier.
#[derive(Debug, Deserialize)]
pub struct VoiceWebhook {
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "CallSid")]
    pub call_sid: String,
}

/// POST /voice
///
/// Stashes the call in the pending-call store (the fallback path for
/// streams whose custom parameters arrive late) and tells the PBX to open
/// the media stream.
async fn voice_webhook(
    State(state): State<AppState>,
    Form(form): Form<VoiceWebhook>,
) -> Response {
    tracing::info!(call_sid = %form.call_sid, to = %form.to, from = %form.from, "inbound call");

    state.calls.insert(&form.call_sid, &form.to, &form.from);

    let xml = stream_response(
        &state.settings.server.public_host,
        &form.to,
        &form.from,
        &form.call_sid,
    );

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        xml,
    )
        .into_response()
}

/// Voice response instructing the PBX to open a bidirectional stream with
/// the call identity as custom parameters.
fn stream_response(public_host: &str, to: &str, from: &str, call_sid: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Connect>
    <Stream url="wss://{host}/">
      <Parameter name="to" value="{to}"/>
      <Parameter name="from" value="{from}"/>
      <Parameter name="callSid" value="{call_sid}"/>
    </Stream>
  </Connect>
</Response>"#,
        host = public_host,
        to = xml_escape(to),
        from = xml_escape(from),
        call_sid = xml_escape(call_sid),
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// GET / — media stream upgrade.
async fn media_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_media_stream(socket, state))
}

/// Health check
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ready",
        "pending_calls": state.calls.len(),
    }))
}
