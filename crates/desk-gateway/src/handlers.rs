use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use desk_memory::document::IndexingFailure;
use desk_memory::{ChatMessage, SearchHit};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::indexing::LastRun;
use crate::server::AppState;

pub(crate) const MAX_SEARCH_LIMIT: usize = 50;
const DEFAULT_SEARCH_LIMIT: usize = 5;

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchParams {
    pub query: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

#[derive(Serialize)]
struct LastRunSummary {
    indexed: usize,
    failed: usize,
    chunks: usize,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    failures: Vec<IndexingFailure>,
}

#[derive(Serialize)]
struct IndexStatusResponse {
    running: bool,
    last_run: Option<LastRunSummary>,
    last_error: Option<String>,
}

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
    messages: Vec<ChatMessage>,
    started_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

pub(crate) async fn root_handler() -> impl IntoResponse {
    Json(MessageResponse {
        message: "Welcome to AI Service Desk API",
    })
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

pub(crate) async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let limit = params.limit.clamp(1, MAX_SEARCH_LIMIT);
    let hits = state.index.search_text(&params.query, limit).await?;
    Ok(Json(hits))
}

pub(crate) async fn start_index_handler(State(state): State<AppState>) -> Response {
    if state.indexer.start().is_some() {
        Json(MessageResponse {
            message: "Article indexing started",
        })
        .into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(MessageResponse {
                message: "Article indexing already in progress",
            }),
        )
            .into_response()
    }
}

pub(crate) async fn index_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (last_run, last_error) = match state.indexer.last_run() {
        Some(LastRun::Completed(report)) => (
            Some(LastRunSummary {
                indexed: report.results.len(),
                failed: report.failures.len(),
                chunks: report.chunk_total(),
                started_at: report.started_at,
                finished_at: report.finished_at,
                failures: report.failures,
            }),
            None,
        ),
        Some(LastRun::Failed(reason)) => (None, Some(reason)),
        None => (None, None),
    };
    Json(IndexStatusResponse {
        running: state.indexer.is_running(),
        last_run,
        last_error,
    })
}

pub(crate) async fn session_messages_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let history = state.memory.history(&session_id).await;
    let response = match history {
        Some(h) => SessionResponse {
            session_id,
            messages: h.messages,
            started_at: Some(h.started_at),
            expires_at: Some(h.expires_at),
        },
        None => SessionResponse {
            session_id,
            messages: Vec::new(),
            started_at: None,
            expires_at: None,
        },
    };
    Json(response)
}

pub(crate) async fn clear_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> StatusCode {
    if state.memory.clear(&session_id).await {
        tracing::info!(session_id = %session_id, "session cleared");
    }
    StatusCode::NO_CONTENT
}
