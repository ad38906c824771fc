use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use harness_core::{PublishFailure, RunOutcome, RunRequest, VerificationResult};

use super::AppState;
use crate::error::ApiError;

// ═══════════════════════════════════════════════════════════════
//  POST /api/test-realtime, POST /api/runs
// ═══════════════════════════════════════════════════════════════

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmitMetrics {
    total_ms: f64,
    avg_emit_ms: f64,
    min_emit_ms: f64,
    max_emit_ms: f64,
    p95_emit_ms: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse<'a> {
    ok: bool,
    channel_id: &'a str,
    sizes: Vec<u64>,
    metrics: EmitMetrics,
    failures: &'a [PublishFailure],
    timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscribe_error: Option<&'a str>,
    verification: &'a VerificationResult,
}

impl<'a> RunResponse<'a> {
    fn new(outcome: &'a RunOutcome) -> Self {
        let report = &outcome.report;
        Self {
            ok: true,
            channel_id: &report.channel_id,
            sizes: report.sizes(),
            metrics: EmitMetrics {
                total_ms: report.total_ms,
                avg_emit_ms: report.emit_stats.mean,
                min_emit_ms: report.emit_stats.min,
                max_emit_ms: report.emit_stats.max,
                p95_emit_ms: report.emit_stats.p95,
            },
            failures: &report.failures,
            timed_out: outcome.timed_out,
            subscribe_error: outcome.subscribe_error.as_deref(),
            verification: &outcome.verification,
        }
    }
}

pub(crate) async fn handle_start_run(
    State(state): State<AppState>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body?;
    tracing::info!(
        channel_id = %request.channel_id,
        count = request.count,
        min_size = request.min_size,
        max_size = request.max_size,
        mode = %request.backpressure_mode,
        "run requested"
    );

    let manifest = state.harness.prepare(&request)?;
    let recorder = state.runs.recorder(&request.channel_id);
    let outcome = Arc::new(
        state
            .harness
            .execute(&request, manifest, recorder.clone())
            .await?,
    );
    state
        .runs
        .complete(&request.channel_id, recorder, outcome.clone());

    Ok(Json(RunResponse::new(&outcome)).into_response())
}

// ═══════════════════════════════════════════════════════════════
//  GET /api/runs
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_list_runs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.runs.ids())
}

// ═══════════════════════════════════════════════════════════════
//  GET /api/runs/{id}, DELETE /api/runs/{id}
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.runs.view(&id) {
        Some(view) => Ok(Json(view).into_response()),
        None => Err(ApiError::not_found(format!("run '{id}' not found"))),
    }
}

pub(crate) async fn handle_reset_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.runs.reset(&id)? {
        tracing::info!(channel_id = %id, "run reset");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("run '{id}' not found")))
    }
}
