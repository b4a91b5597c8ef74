//! HTTP handlers. Query endpoints follow the teacher's typed
//! `Json<SignalResponse>`-style response wrappers in `api/routes.rs`,
//! generalized to a single `{ok, tenant_id, rows}` envelope shared by every
//! read endpoint (`api::query::RowsResponse`) since this surface's queries
//! are uniform list-by-tenant calls rather than each needing a bespoke
//! shape.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::state::AppState;
use crate::domain::entities::ActionStatus;
use crate::domain::error::PipelineError;
use crate::ingest::{handle_ingest, IngestResponse};

const DEFAULT_LIST_LIMIT: i64 = 200;

fn tenant_header(headers: &HeaderMap) -> Result<String, PipelineError> {
    headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
        .ok_or(PipelineError::MissingTenant)
}

#[derive(Debug, Serialize)]
pub struct RowsResponse<T: Serialize> {
    pub ok: bool,
    pub tenant_id: String,
    pub rows: Vec<T>,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "ok": true })))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.prometheus_handle.render())
}

pub async fn ingest_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<IngestResponse>, PipelineError> {
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let response = handle_ingest(&*state.store, &body, idempotency_key.as_deref()).await?;
    Ok(Json(response))
}

pub async fn agent_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RowsResponse<crate::domain::entities::MetricRollupHourly>>, PipelineError> {
    let tenant = tenant_header(&headers)?;
    let rows = state
        .store
        .agent_metrics(&tenant, DEFAULT_LIST_LIMIT)
        .await
        .map_err(|e| PipelineError::Transient(e.to_string()))?;
    Ok(Json(RowsResponse { ok: true, tenant_id: tenant, rows }))
}

pub async fn workflow_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RowsResponse<crate::domain::entities::MetricRollupHourly>>, PipelineError> {
    let tenant = tenant_header(&headers)?;
    let rows = state
        .store
        .workflow_metrics(&tenant, DEFAULT_LIST_LIMIT)
        .await
        .map_err(|e| PipelineError::Transient(e.to_string()))?;
    Ok(Json(RowsResponse { ok: true, tenant_id: tenant, rows }))
}

pub async fn list_anomalies(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RowsResponse<crate::domain::entities::Anomaly>>, PipelineError> {
    let tenant = tenant_header(&headers)?;
    let rows = state
        .store
        .list_anomalies(&tenant, DEFAULT_LIST_LIMIT)
        .await
        .map_err(|e| PipelineError::Transient(e.to_string()))?;
    Ok(Json(RowsResponse { ok: true, tenant_id: tenant, rows }))
}

pub async fn list_shifts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RowsResponse<crate::domain::entities::PerformanceShift>>, PipelineError> {
    let tenant = tenant_header(&headers)?;
    let rows = state
        .store
        .list_shifts(&tenant, DEFAULT_LIST_LIMIT)
        .await
        .map_err(|e| PipelineError::Transient(e.to_string()))?;
    Ok(Json(RowsResponse { ok: true, tenant_id: tenant, rows }))
}

#[derive(Debug, Deserialize)]
pub struct ActionsQuery {
    pub status: Option<String>,
}

pub async fn list_actions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ActionsQuery>,
) -> Result<Json<RowsResponse<crate::domain::entities::RecommendedAction>>, PipelineError> {
    let tenant = tenant_header(&headers)?;
    let status = match params.status.as_deref() {
        Some("open") => Some(ActionStatus::Open),
        Some("acknowledged") => Some(ActionStatus::Acknowledged),
        Some("resolved") => Some(ActionStatus::Resolved),
        _ => None,
    };
    let rows = state
        .store
        .list_actions(&tenant, status, DEFAULT_LIST_LIMIT)
        .await
        .map_err(|e| PipelineError::Transient(e.to_string()))?;
    Ok(Json(RowsResponse { ok: true, tenant_id: tenant, rows }))
}

pub async fn list_backtests(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RowsResponse<crate::domain::entities::BacktestRun>>, PipelineError> {
    let tenant = tenant_header(&headers)?;
    let rows = state
        .store
        .list_backtests(&tenant, DEFAULT_LIST_LIMIT)
        .await
        .map_err(|e| PipelineError::Transient(e.to_string()))?;
    Ok(Json(RowsResponse { ok: true, tenant_id: tenant, rows }))
}

pub async fn get_signal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(signal_id): Path<Uuid>,
) -> Result<Json<RowsResponse<crate::domain::entities::Signal>>, PipelineError> {
    let tenant = tenant_header(&headers)?;
    let signal = state
        .store
        .get_signal(&tenant, signal_id)
        .await
        .map_err(|e| PipelineError::Transient(e.to_string()))?;
    Ok(Json(RowsResponse { ok: true, tenant_id: tenant, rows: signal.into_iter().collect() }))
}
