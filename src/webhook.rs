//! Webhook receiver for payment-processor callbacks.
//!
//! `POST /callback` validates the payload shape and hands the event to the
//! reconciliation pipeline on a spawned task; the HTTP response goes out
//! before reconciliation runs. The processor retries on its own timer, so
//! reconciliation outcomes are deliberately invisible to it.

use crate::reconcile::{CallbackPayload, Reconciler};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/callback", post(callback))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(addr: &str, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "webhook listener started");
    axum::serve(listener, router(state)).await
}

async fn callback(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CallbackPayload>,
) -> (StatusCode, Json<Value>) {
    let event = match payload.validate() {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "rejected malformed callback");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })));
        }
    };

    // Fire-and-continue: acknowledge before the pipeline runs.
    let reconciler = state.reconciler.clone();
    tokio::spawn(async move {
        reconciler.process(event).await;
    });

    (StatusCode::OK, Json(json!({ "status": "success" })))
}

async fn health() -> (StatusCode, Json<Value>) {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp_ms": timestamp_ms,
        })),
    )
}
