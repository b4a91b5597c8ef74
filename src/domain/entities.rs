//! Persisted entities. Every entity carries a `tenant` column; cross-entity
//! operations are always tenant-scoped at the store layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestRequestStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub tenant: String,
    pub event_id: Uuid,
    pub schema_version: String,
    pub event_type: String,
    pub event_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
    pub payload: Value,
    pub idempotency_key: Option<String>,
    pub attempt_count: i32,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub tenant: String,
    pub idempotency_key: String,
    pub request_sha256: String,
    pub status: IngestRequestStatus,
    pub response_status: Option<i32>,
    pub response_body: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEvent {
    pub tenant: Option<String>,
    pub reason: String,
    pub errors: Value,
    pub raw_body: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationRun {
    pub tenant: String,
    pub run_id: String,
    pub workflow_id: String,
    pub query_id: Option<String>,
    pub request_time: DateTime<Utc>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_latency_ms: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub orchestrator_metadata: Option<Value>,
    pub client_metadata: Option<Value>,
    pub user_metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub tenant: String,
    pub agent_run_id: Uuid,
    pub orchestration_run_id: String,
    pub agent_id: String,
    pub agent_version: String,
    pub model: Option<String>,
    pub config_hash: Option<String>,
    pub parent_agent_run_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<i64>,
    pub output_summary: Option<String>,
    pub output_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMetrics {
    pub latency_ms: Option<f64>,
    pub faithfulness: Option<f64>,
    pub hallucination_flag: Option<bool>,
    pub coverage: Option<f64>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub tenant: String,
    pub evaluation_id: Uuid,
    pub agent_run_id: Uuid,
    pub workflow_id: String,
    pub agent_id: String,
    pub agent_version: String,
    pub raw: RawMetrics,
    pub latency_norm: Option<f64>,
    pub faithfulness_norm: Option<f64>,
    pub coverage_norm: Option<f64>,
    pub confidence_norm: Option<f64>,
    pub hallucination_norm: Option<f64>,
    pub run_quality_score: Option<f64>,
    pub risk_score: Option<f64>,
    pub evaluator_version: String,
    pub normalization_version: String,
    pub weighting_version: String,
    pub scoring_timestamp: DateTime<Utc>,
    pub anomaly_flag: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RollupStats {
    pub count: i64,
    pub mean_faithfulness: Option<f64>,
    pub stddev_faithfulness: Option<f64>,
    pub mean_quality: Option<f64>,
    pub stddev_quality: Option<f64>,
    pub p05_faithfulness: Option<f64>,
    pub p10_faithfulness: Option<f64>,
    pub p50_faithfulness: Option<f64>,
    pub p95_faithfulness: Option<f64>,
    pub p05_quality: Option<f64>,
    pub p10_quality: Option<f64>,
    pub p50_quality: Option<f64>,
    pub p95_quality: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub anomaly_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRollupHourly {
    pub tenant: String,
    pub workflow_id: String,
    pub agent_id: String,
    pub agent_version: String,
    pub hour_bucket: DateTime<Utc>,
    pub stats: RollupStats,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMethod {
    Rule,
    #[serde(rename = "mad")]
    MadZScore,
    ZScore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub tenant: String,
    pub anomaly_id: Uuid,
    pub evaluation_id: Uuid,
    pub workflow_id: String,
    pub agent_id: String,
    pub agent_version: String,
    pub metric: String,
    pub method: AnomalyMethod,
    pub value: f64,
    pub threshold: f64,
    pub z_score: Option<f64>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceShift {
    pub tenant: String,
    pub shift_id: Uuid,
    pub workflow_id: String,
    pub agent_id: String,
    pub agent_version: String,
    pub metric: String,
    pub method: String,
    pub window_a_start: DateTime<Utc>,
    pub window_a_end: DateTime<Utc>,
    /// Start of comparison window B. Populated with the validated semantics
    /// `now - 2W`, not the inverted labeling an earlier draft of this job
    /// used.
    pub window_b_start: DateTime<Utc>,
    pub window_b_end: DateTime<Utc>,
    pub p_value: f64,
    pub bh_adjusted_p_value: f64,
    pub effect_size: f64,
    pub significant: bool,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SignalValue {
    Scalar { value: f64 },
    Vector { values: std::collections::HashMap<String, f64> },
    Text { value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentWeight {
    pub id: String,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub tenant: String,
    pub signal_id: Uuid,
    pub event_time: DateTime<Utc>,
    pub horizon: String,
    pub instrument_universe: Vec<InstrumentWeight>,
    pub signal_value: SignalValue,
    pub confidence: Option<f64>,
    pub constraints: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOutcome {
    pub tenant: String,
    pub dataset_version: String,
    pub instrument_id: String,
    pub asof_time: DateTime<Utc>,
    pub realized_return: f64,
    pub benchmark_return: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalOutcome {
    pub tenant: String,
    pub signal_id: Uuid,
    pub horizon: String,
    pub backtest_id: Uuid,
    pub realized_return: f64,
    pub benchmark_return: f64,
    pub excess_return: f64,
    pub details: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BacktestStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRun {
    pub tenant: String,
    pub backtest_id: Uuid,
    pub dataset_version: String,
    pub horizon: String,
    pub code_version: String,
    pub status: BacktestStatus,
    pub summary: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Open,
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub tenant: String,
    pub action_id: Uuid,
    pub action_type: String,
    pub target: Value,
    pub payload: Value,
    pub decided_by: String,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub tenant: Option<String>,
    pub actor: String,
    pub action: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}
