//! # fcp-server: HTTP Façade
//!
//! Two endpoints over the run engine:
//!
//! - `POST /optimize/unified` — run allocation and/or charge scheduling.
//! - `GET /report/schedule` — read-only report for a persisted schedule.
//!
//! Plus `GET /health`. Runs execute on the blocking pool; each request is
//! an independent planning run sharing only the store.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use tracing::{error, info};

use fcp_algo::unified::OptimizationMode;
use fcp_core::{ScheduleId, SiteId, TriggerType, UnifiedWeights};
use fcp_engine::{
    run_unified, schedule_report, CancelFlag, EngineError, UnifiedRunArgs,
};
use fcp_store::Store;

pub mod types;

use types::{
    parse_start_time, AllocationBody, ErrorResponse, OptimizeRequest, OptimizeResponse,
    ReportQuery, ScheduleBody, UnifiedResultBody,
};

/// Shared state: the store behind the run engine.
pub struct AppState {
    pub store: Arc<dyn Store>,
}

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/optimize/unified", post(optimize_unified))
        .route("/report/schedule", get(report_schedule))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// `POST /optimize/unified` → 200 + `OptimizeResponse`, 400 on bad input,
/// 404 for an unknown schedule id, 500 on internal failure.
async fn optimize_unified(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OptimizeRequest>,
) -> impl IntoResponse {
    let mode: OptimizationMode = match body.mode.parse() {
        Ok(mode) => mode,
        Err(err) => return bad_request(err.to_string()),
    };
    let trigger: TriggerType = match body.trigger_type.parse() {
        Ok(trigger) => trigger,
        Err(err) => return bad_request(err.to_string()),
    };
    let at = match &body.test_start_time {
        Some(raw) => match parse_start_time(raw) {
            Ok(at) => at,
            Err(err) => return bad_request(err),
        },
        None => Utc::now(),
    };
    let weights: UnifiedWeights = body.weights();

    let args = UnifiedRunArgs {
        site: SiteId::new(body.site_id),
        mode,
        trigger,
        at,
        schedule_id: body.schedule_id.map(ScheduleId::new),
        window_hours: Some(body.window_hours),
        persist: body.persist_to_database,
        weights,
        cancel: CancelFlag::new(),
    };

    info!(site = body.site_id, mode = mode.as_str(), "optimize request accepted");

    let store = state.store.clone();
    let result =
        tokio::task::spawn_blocking(move || run_unified(store.as_ref(), &args)).await;

    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return engine_error(err),
        Err(join_err) => {
            error!(%join_err, "optimize task panicked");
            return internal_error("optimization task failed".to_string());
        }
    };

    let response = OptimizeResponse {
        success: true,
        unified_result: UnifiedResultBody {
            mode: output.unified.mode.as_str().to_string(),
            status: output.unified.status.as_str().to_string(),
            solve_time_seconds: output.unified.solve_time_seconds,
            allocation_score: output.unified.allocation_score,
            routes_allocated: output.unified.routes_allocated,
            routes_total: output.unified.routes_total,
            total_charging_cost: output.unified.total_charging_cost,
            total_energy_kwh: output.unified.total_energy_kwh,
            objective_value: output.unified.objective_value,
        },
        allocation: output.allocation.as_ref().map(AllocationBody::from_outcome),
        schedule: output.schedule.as_ref().map(ScheduleBody::from_outcome),
        allocation_id: output.allocation_id.map(|id| id.value()),
        schedule_id: output.schedule_id.map(|id| id.value()),
    };
    (StatusCode::OK, Json(serde_json::json!(response))).into_response()
}

/// `GET /report/schedule?schedule_id=&timestamp=` → 200 + report JSON,
/// 404 for unknown schedules, 400 for a bad timestamp.
async fn report_schedule(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> impl IntoResponse {
    let timestamp = match &query.timestamp {
        Some(raw) => match parse_start_time(raw) {
            Ok(at) => at,
            Err(err) => return bad_request(err),
        },
        None => Utc::now(),
    };
    let schedule_id = ScheduleId::new(query.schedule_id);

    let store = state.store.clone();
    let result =
        tokio::task::spawn_blocking(move || schedule_report(store.as_ref(), schedule_id, timestamp))
            .await;

    match result {
        Ok(Ok(report)) => (StatusCode::OK, Json(serde_json::json!(report))).into_response(),
        Ok(Err(err)) => engine_error(err),
        Err(join_err) => {
            error!(%join_err, "report task panicked");
            internal_error("report task failed".to_string())
        }
    }
}

fn bad_request(message: String) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: message }),
    )
        .into_response()
}

fn internal_error(message: String) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message }),
    )
        .into_response()
}

fn engine_error(err: EngineError) -> axum::response::Response {
    let status = match &err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}
