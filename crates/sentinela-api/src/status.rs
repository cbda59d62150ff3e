// Health and pipeline status routes

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use sentinela_notify::{EmailSender, SmsSender, QueueWorker, SseHub};
use sentinela_triage::TriageStats;

#[derive(Clone)]
pub struct AppState {
    pub triage_stats: Arc<TriageStats>,
    pub hub: Arc<SseHub>,
    pub email_worker: Option<Arc<QueueWorker<EmailSender>>>,
    pub sms_worker: Option<Arc<QueueWorker<SmsSender>>>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(status))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let email = match &state.email_worker {
        Some(worker) => Some(worker.stats_snapshot().await),
        None => None,
    };
    let sms = match &state.sms_worker {
        Some(worker) => Some(worker.stats_snapshot().await),
        None => None,
    };

    Json(serde_json::json!({
        "triage": state.triage_stats.snapshot(),
        "sse": state.hub.stats(),
        "email": email,
        "sms": sms,
    }))
}
