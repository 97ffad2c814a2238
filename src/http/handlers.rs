//! Request handlers.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

use crate::http::server::AppState;
use crate::notifications::Notification;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize)]
pub struct SystemInfo {
    pub environment: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct Healthcheck {
    pub status: &'static str,
    pub system_info: SystemInfo,
}

pub async fn healthcheck(State(state): State<AppState>) -> Json<Healthcheck> {
    Json(Healthcheck {
        status: "available",
        system_info: SystemInfo {
            environment: state.environment.as_str(),
            version: VERSION,
        },
    })
}

/// Runtime snapshot, in the spirit of Go's expvar.
#[derive(Serialize)]
pub struct DebugVars {
    pub version: &'static str,
    pub background_tasks: usize,
    pub rate_limited_clients: usize,
    pub timestamp: u64,
}

pub async fn debug_vars(State(state): State<AppState>) -> Json<DebugVars> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    Json(DebugVars {
        version: VERSION,
        background_tasks: state.tasks.active(),
        rate_limited_clients: state.limiter.tracked_clients(),
        timestamp,
    })
}

/// Queue a notification and return before it is delivered.
pub async fn create_notification(
    State(state): State<AppState>,
    Json(notification): Json<Notification>,
) -> impl IntoResponse {
    if notification.recipient.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": { "recipient": "must be provided" } })),
        );
    }

    let recipient = notification.recipient.clone();
    let notifier = state.notifier.clone();
    state.tasks.run("deliver-notification", async move {
        if let Err(e) = notifier.deliver(notification).await {
            tracing::error!(error = %e, "Notification delivery failed");
        }
    });

    tracing::debug!(recipient = %recipient, "Notification queued");
    (
        StatusCode::ACCEPTED,
        Json(json!({ "message": "notification queued", "recipient": recipient })),
    )
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "the requested resource could not be found" })),
    )
}
