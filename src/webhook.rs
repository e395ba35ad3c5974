//! HTTP surface: the LINE webhook plus liveness endpoints.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use futures::FutureExt;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::line::SIGNATURE_HEADER;
use crate::channels::{InboundMessage, MessageSender, SignatureVerifier, parse_webhook};
use crate::registration::ConversationEngine;
use crate::registration::replies;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConversationEngine>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub sender: Arc<dyn MessageSender>,
}

/// Build the Axum router with the webhook and liveness routes.
pub fn webhook_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/callback", post(callback))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Liveness ────────────────────────────────────────────────────────────

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Server is running" }))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "registration-bot"
    }))
}

// ── Webhook ─────────────────────────────────────────────────────────────

async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let request_id = Uuid::new_v4();

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let verified = signature.is_some_and(|sig| state.verifier.verify(&body, sig));
    if !verified {
        warn!(%request_id, has_signature = signature.is_some(), "Rejected webhook: invalid signature");
        return (StatusCode::BAD_REQUEST, "Invalid signature");
    }

    let messages = match parse_webhook(&body) {
        Ok(messages) => messages,
        Err(e) => {
            warn!(%request_id, error = %e, "Rejected webhook: malformed body");
            return (StatusCode::BAD_REQUEST, "Invalid request body");
        }
    };
    debug!(%request_id, count = messages.len(), "Webhook accepted");

    // Run on a detached task so a dropped connection cannot cut a message
    // off between its database write and its session update.
    let worker = tokio::spawn(dispatch(state, request_id, messages));
    if let Err(e) = worker.await {
        error!(%request_id, error = %e, "Webhook dispatch task failed");
    }

    (StatusCode::OK, "OK")
}

/// Handle messages one after another, replying to each.
///
/// A message whose handling panics gets the fallback reply; the rest of the
/// batch still runs.
async fn dispatch(state: AppState, request_id: Uuid, messages: Vec<InboundMessage>) {
    for message in messages {
        let handled = AssertUnwindSafe(state.engine.handle(&message.sender, &message.text))
            .catch_unwind()
            .await;
        let reply = match handled {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                error!(%request_id, user = %message.sender, error = %e, "Engine failed to handle message");
                replies::INTERNAL_ERROR.to_string()
            }
            Err(_) => {
                error!(%request_id, user = %message.sender, "Engine panicked while handling message");
                replies::INTERNAL_ERROR.to_string()
            }
        };

        match state.sender.send(&message.reply_channel, &reply).await {
            Ok(()) => info!(%request_id, user = %message.sender, "Reply delivered"),
            Err(e) => warn!(%request_id, user = %message.sender, error = %e, "Reply not delivered"),
        }
    }
}
