//! Storage abstraction. `Store` is the seam between the pure pipeline logic
//! (ingest decisions, materialization dispatch, job computations) and the
//! concrete backing store, mirroring the teacher's split between
//! `signals::storage` (in-memory) and `signals::db_storage` (persisted) —
//! generalized here into a single trait with two implementations instead of
//! two hand-duplicated modules, since the pipeline's query surface is much
//! larger than the teacher's.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::entities::*;

#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyOutcome {
    /// No prior request with this key; caller should proceed.
    Fresh,
    /// A prior request with the same body hash already completed; replay it.
    ReplayCompleted {
        response_status: i32,
        response_body: serde_json::Value,
    },
    /// A prior request with the same body hash is still processing.
    InProgress,
    /// A prior request exists with a different body hash, or previously failed.
    Conflict,
}

#[derive(Debug, Clone)]
pub struct InsertEventsOutcome {
    pub received: usize,
    pub inserted: usize,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_dead_letter(&self, entry: DeadLetterEvent) -> anyhow::Result<()>;

    async fn check_idempotency(
        &self,
        tenant: &str,
        key: &str,
        request_sha256: &str,
    ) -> anyhow::Result<IdempotencyOutcome>;

    async fn begin_idempotent_request(
        &self,
        tenant: &str,
        key: &str,
        request_sha256: &str,
    ) -> anyhow::Result<()>;

    async fn finalize_idempotent_request(
        &self,
        tenant: &str,
        key: &str,
        status: IngestRequestStatus,
        response_status: i32,
        response_body: serde_json::Value,
    ) -> anyhow::Result<()>;

    async fn insert_raw_events(&self, events: Vec<RawEvent>) -> anyhow::Result<InsertEventsOutcome>;

    async fn claim_raw_events(
        &self,
        batch_size: usize,
        max_attempts: i32,
    ) -> anyhow::Result<Vec<RawEvent>>;

    async fn mark_event_processed(&self, tenant: &str, event_id: Uuid) -> anyhow::Result<()>;

    async fn mark_event_failed(
        &self,
        tenant: &str,
        event_id: Uuid,
        error: &str,
        max_attempts: i32,
    ) -> anyhow::Result<()>;

    async fn upsert_orchestration_run_started(
        &self,
        tenant: &str,
        run_id: &str,
        workflow_id: &str,
        query_id: Option<&str>,
        request_time: DateTime<Utc>,
        started_at: DateTime<Utc>,
        orchestrator_metadata: Option<serde_json::Value>,
        client_metadata: Option<serde_json::Value>,
        user_metadata: Option<serde_json::Value>,
    ) -> anyhow::Result<()>;

    async fn ensure_orchestration_run_placeholder(
        &self,
        tenant: &str,
        run_id: &str,
        workflow_id: &str,
        request_time: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    async fn upsert_orchestration_run_completed(
        &self,
        tenant: &str,
        run_id: &str,
        status: RunStatus,
        completed_at: DateTime<Utc>,
        total_latency_ms: Option<i64>,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn upsert_agent_run_started(
        &self,
        tenant: &str,
        agent_run_id: Uuid,
        orchestration_run_id: &str,
        agent_id: &str,
        agent_version: &str,
        model: Option<&str>,
        config_hash: Option<&str>,
        parent_agent_run_id: Option<Uuid>,
        started_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    async fn upsert_agent_run_completed(
        &self,
        tenant: &str,
        agent_run_id: Uuid,
        orchestration_run_id: &str,
        agent_id: &str,
        agent_version: &str,
        completed_at: DateTime<Utc>,
        latency_ms: Option<i64>,
        output_summary: Option<&str>,
        output_uri: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn insert_evaluation_record_if_absent(
        &self,
        record: EvaluationRecord,
    ) -> anyhow::Result<bool>;

    async fn upsert_signal(&self, signal: Signal) -> anyhow::Result<()>;

    async fn upsert_market_outcome(&self, outcome: MarketOutcome) -> anyhow::Result<()>;

    async fn audit(&self, entry: AuditEntry) -> anyhow::Result<()>;

    async fn upsert_rollup(&self, rollup: MetricRollupHourly) -> anyhow::Result<()>;

    async fn active_groups(
        &self,
        tenant: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<(String, String, String)>>;

    async fn recent_evaluations(
        &self,
        tenant: &str,
        workflow_id: &str,
        agent_id: &str,
        agent_version: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<EvaluationRecord>>;

    async fn set_anomaly_flag(&self, tenant: &str, evaluation_id: Uuid) -> anyhow::Result<()>;

    async fn insert_anomaly(&self, anomaly: Anomaly) -> anyhow::Result<()>;

    async fn metric_values_in_window(
        &self,
        tenant: &str,
        workflow_id: &str,
        agent_id: &str,
        agent_version: &str,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<f64>>;

    async fn hourly_quality_series(
        &self,
        tenant: &str,
        workflow_id: &str,
        agent_id: &str,
        agent_version: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<(DateTime<Utc>, f64)>>;

    async fn insert_performance_shift(&self, shift: PerformanceShift) -> anyhow::Result<()>;

    async fn rollups_since(
        &self,
        tenant: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MetricRollupHourly>>;

    async fn has_recent_open_action(
        &self,
        tenant: &str,
        action_type: &str,
        target_key: &str,
        lookback_hours: i64,
    ) -> anyhow::Result<bool>;

    async fn insert_recommended_action(&self, action: RecommendedAction) -> anyhow::Result<()>;

    async fn signals_in_range(
        &self,
        tenant: &str,
        horizon: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Signal>>;

    async fn market_outcomes_for(
        &self,
        tenant: &str,
        dataset_version: &str,
        target_time: DateTime<Utc>,
        instrument_ids: &[String],
    ) -> anyhow::Result<Vec<MarketOutcome>>;

    async fn insert_signal_outcome(&self, outcome: SignalOutcome) -> anyhow::Result<()>;

    async fn insert_backtest_run(&self, run: BacktestRun) -> anyhow::Result<()>;

    async fn list_anomalies(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<Anomaly>>;
    async fn list_shifts(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<PerformanceShift>>;
    async fn list_actions(
        &self,
        tenant: &str,
        status: Option<ActionStatus>,
        limit: i64,
    ) -> anyhow::Result<Vec<RecommendedAction>>;
    async fn list_backtests(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<BacktestRun>>;
    async fn get_signal(&self, tenant: &str, signal_id: Uuid) -> anyhow::Result<Option<Signal>>;
    async fn agent_metrics(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<MetricRollupHourly>>;
    async fn workflow_metrics(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<MetricRollupHourly>>;
}
