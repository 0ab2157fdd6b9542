//! HTTP request handlers.

use super::AppState;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json},
};
use chrono::{Duration as ChronoDuration, Utc};
use rust_embed::RustEmbed;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_HISTORY_LIMIT: usize = 100;
const DEFAULT_ALERT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

#[derive(RustEmbed)]
#[folder = "static/"]
struct Assets;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn or(&self, default: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, MAX_LIMIT)
    }
}

/// `limit` caps the number of samples; `range` (minutes) reads from the
/// retained time series instead of the per-target history.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub range: Option<u32>,
}

// ============================================================================
// Dashboard
// ============================================================================

pub async fn handle_dashboard(State(state): State<AppState>) -> impl IntoResponse {
    let Some(file) = Assets::get("index.html") else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "dashboard page missing").into_response();
    };

    let page = String::from_utf8_lossy(&file.data)
        .replace("{{title}}", "pulsewatch")
        .replace(
            "{{refresh_interval}}",
            &state.dashboard.refresh_interval.to_string(),
        );

    Html(page).into_response()
}

pub async fn handle_static(Path(path): Path<String>) -> impl IntoResponse {
    match Assets::get(&path) {
        Some(file) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                file.data.into_owned(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

// ============================================================================
// API
// ============================================================================

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    Json(json!({
        "status": "ok",
        "timestamp": now,
        "uptimeSeconds": (now - state.started_at).num_seconds(),
        "targets": state.collector.target_count(),
        "subscribers": state.collector.subscriber_count(),
    }))
}

pub async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.collector.snapshot())
}

pub async fn handle_target_metrics(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_LIMIT);
    let detail = match query.range {
        Some(minutes) => {
            let since = Utc::now() - ChronoDuration::minutes(minutes as i64);
            state.collector.target_range(&target, since, limit)
        }
        None => state.collector.target_detail(&target, limit),
    };

    match detail {
        Some(detail) => Json(detail).into_response(),
        None => (StatusCode::NOT_FOUND, format!("Unknown target: {}", target)).into_response(),
    }
}

pub async fn handle_alerts(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.collector.recent_alerts(query.or(DEFAULT_ALERT_LIMIT)))
}

pub async fn handle_report(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.collector.report())
}
