//! In-memory `Store` double, used by unit and integration tests so the
//! pipeline's decision logic can be exercised without a live Postgres
//! instance. Mirrors the teacher's `signals::storage` in-memory module,
//! generalized to the pipeline's larger schema.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::domain::entities::*;

use super::{IdempotencyOutcome, InsertEventsOutcome, Store};

#[derive(Default)]
struct State {
    dead_letters: Vec<DeadLetterEvent>,
    ingest_requests: HashMap<(String, String), IngestRequest>,
    raw_events: HashMap<(String, Uuid), RawEvent>,
    orchestration_runs: HashMap<(String, String), OrchestrationRun>,
    agent_runs: HashMap<(String, Uuid), AgentRun>,
    evaluations: HashMap<(String, Uuid), EvaluationRecord>,
    signals: HashMap<(String, Uuid), Signal>,
    outcomes: HashMap<(String, String, String, DateTime<Utc>), MarketOutcome>,
    audit: Vec<AuditEntry>,
    rollups: HashMap<(String, String, String, String, DateTime<Utc>), MetricRollupHourly>,
    anomalies: Vec<Anomaly>,
    shifts: Vec<PerformanceShift>,
    actions: Vec<RecommendedAction>,
    signal_outcomes: Vec<SignalOutcome>,
    backtests: Vec<BacktestRun>,
}

pub struct MemoryStore {
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directly seed an evaluation record, bypassing the ingest/materialize
    /// path. Used by job-level tests that want to exercise only C6-C12.
    pub fn seed_evaluation(&self, record: EvaluationRecord) {
        let mut state = self.state.lock();
        state
            .evaluations
            .insert((record.tenant.clone(), record.evaluation_id), record);
    }

    pub fn seed_rollup(&self, rollup: MetricRollupHourly) {
        let mut state = self.state.lock();
        let key = (
            rollup.tenant.clone(),
            rollup.workflow_id.clone(),
            rollup.agent_id.clone(),
            rollup.agent_version.clone(),
            rollup.hour_bucket,
        );
        state.rollups.insert(key, rollup);
    }

    pub fn seed_signal(&self, signal: Signal) {
        let mut state = self.state.lock();
        state.signals.insert((signal.tenant.clone(), signal.signal_id), signal);
    }

    pub fn seed_market_outcome(&self, outcome: MarketOutcome) {
        let mut state = self.state.lock();
        let key = (
            outcome.tenant.clone(),
            outcome.dataset_version.clone(),
            outcome.instrument_id.clone(),
            outcome.asof_time,
        );
        state.outcomes.insert(key, outcome);
    }

    pub fn evaluation_count(&self) -> usize {
        self.state.lock().evaluations.len()
    }

    pub fn action_count(&self) -> usize {
        self.state.lock().actions.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_dead_letter(&self, entry: DeadLetterEvent) -> anyhow::Result<()> {
        self.state.lock().dead_letters.push(entry);
        Ok(())
    }

    async fn check_idempotency(
        &self,
        tenant: &str,
        key: &str,
        request_sha256: &str,
    ) -> anyhow::Result<IdempotencyOutcome> {
        let state = self.state.lock();
        match state.ingest_requests.get(&(tenant.to_string(), key.to_string())) {
            None => Ok(IdempotencyOutcome::Fresh),
            Some(existing) if existing.request_sha256 != request_sha256 => {
                Ok(IdempotencyOutcome::Conflict)
            }
            Some(existing) => match existing.status {
                IngestRequestStatus::Completed => Ok(IdempotencyOutcome::ReplayCompleted {
                    response_status: existing.response_status.unwrap_or(200),
                    response_body: existing.response_body.clone().unwrap_or(serde_json::Value::Null),
                }),
                IngestRequestStatus::Processing => Ok(IdempotencyOutcome::InProgress),
                IngestRequestStatus::Failed => Ok(IdempotencyOutcome::Conflict),
            },
        }
    }

    async fn begin_idempotent_request(
        &self,
        tenant: &str,
        key: &str,
        request_sha256: &str,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.ingest_requests.insert(
            (tenant.to_string(), key.to_string()),
            IngestRequest {
                tenant: tenant.to_string(),
                idempotency_key: key.to_string(),
                request_sha256: request_sha256.to_string(),
                status: IngestRequestStatus::Processing,
                response_status: None,
                response_body: None,
            },
        );
        Ok(())
    }

    async fn finalize_idempotent_request(
        &self,
        tenant: &str,
        key: &str,
        status: IngestRequestStatus,
        response_status: i32,
        response_body: serde_json::Value,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if let Some(req) = state
            .ingest_requests
            .get_mut(&(tenant.to_string(), key.to_string()))
        {
            req.status = status;
            req.response_status = Some(response_status);
            req.response_body = Some(response_body);
        }
        Ok(())
    }

    async fn insert_raw_events(&self, events: Vec<RawEvent>) -> anyhow::Result<InsertEventsOutcome> {
        let mut state = self.state.lock();
        let received = events.len();
        let mut inserted = 0;
        for event in events {
            let key = (event.tenant.clone(), event.event_id);
            if !state.raw_events.contains_key(&key) {
                state.raw_events.insert(key, event);
                inserted += 1;
            }
        }
        Ok(InsertEventsOutcome { received, inserted })
    }

    async fn claim_raw_events(
        &self,
        batch_size: usize,
        max_attempts: i32,
    ) -> anyhow::Result<Vec<RawEvent>> {
        let mut state = self.state.lock();
        let mut claimed = Vec::new();
        let mut keys: Vec<(String, Uuid)> = state
            .raw_events
            .iter()
            .filter(|(_, e)| e.processed_at.is_none() && e.attempt_count < max_attempts)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort_by_key(|k| state.raw_events[k].event_time);
        for key in keys.into_iter().take(batch_size) {
            claimed.push(state.raw_events[&key].clone());
        }
        Ok(claimed)
    }

    async fn mark_event_processed(&self, tenant: &str, event_id: Uuid) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if let Some(e) = state.raw_events.get_mut(&(tenant.to_string(), event_id)) {
            e.processed_at = Some(Utc::now());
            e.processing_error = None;
        }
        Ok(())
    }

    async fn mark_event_failed(
        &self,
        tenant: &str,
        event_id: Uuid,
        error: &str,
        max_attempts: i32,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if let Some(e) = state.raw_events.get_mut(&(tenant.to_string(), event_id)) {
            e.attempt_count += 1;
            e.processing_error = Some(error.chars().take(2000).collect());
            if e.attempt_count >= max_attempts {
                e.processed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

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
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let key = (tenant.to_string(), run_id.to_string());
        let entry = state.orchestration_runs.entry(key).or_insert_with(|| OrchestrationRun {
            tenant: tenant.to_string(),
            run_id: run_id.to_string(),
            workflow_id: workflow_id.to_string(),
            query_id: query_id.map(String::from),
            request_time,
            status: RunStatus::Running,
            started_at,
            completed_at: None,
            total_latency_ms: None,
            error_code: None,
            error_message: None,
            orchestrator_metadata: orchestrator_metadata.clone(),
            client_metadata: client_metadata.clone(),
            user_metadata: user_metadata.clone(),
        });
        entry.started_at = entry.started_at.min(started_at);
        if entry.orchestrator_metadata.is_none() {
            entry.orchestrator_metadata = orchestrator_metadata;
        }
        if entry.client_metadata.is_none() {
            entry.client_metadata = client_metadata;
        }
        if entry.user_metadata.is_none() {
            entry.user_metadata = user_metadata;
        }
        Ok(())
    }

    async fn ensure_orchestration_run_placeholder(
        &self,
        tenant: &str,
        run_id: &str,
        workflow_id: &str,
        request_time: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let key = (tenant.to_string(), run_id.to_string());
        state.orchestration_runs.entry(key).or_insert_with(|| OrchestrationRun {
            tenant: tenant.to_string(),
            run_id: run_id.to_string(),
            workflow_id: workflow_id.to_string(),
            query_id: None,
            request_time,
            status: RunStatus::Running,
            started_at: request_time,
            completed_at: None,
            total_latency_ms: None,
            error_code: None,
            error_message: None,
            orchestrator_metadata: None,
            client_metadata: None,
            user_metadata: None,
        });
        Ok(())
    }

    async fn upsert_orchestration_run_completed(
        &self,
        tenant: &str,
        run_id: &str,
        status: RunStatus,
        completed_at: DateTime<Utc>,
        total_latency_ms: Option<i64>,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let key = (tenant.to_string(), run_id.to_string());
        let entry = state.orchestration_runs.entry(key).or_insert_with(|| OrchestrationRun {
            tenant: tenant.to_string(),
            run_id: run_id.to_string(),
            workflow_id: String::new(),
            query_id: None,
            request_time: completed_at,
            status: RunStatus::Running,
            started_at: completed_at,
            completed_at: None,
            total_latency_ms: None,
            error_code: None,
            error_message: None,
            orchestrator_metadata: None,
            client_metadata: None,
            user_metadata: None,
        });
        entry.status = status;
        if entry.completed_at.is_none() {
            entry.completed_at = Some(completed_at);
        }
        if entry.total_latency_ms.is_none() {
            entry.total_latency_ms = total_latency_ms;
        }
        entry.error_code = error_code.map(String::from).or(entry.error_code.clone());
        entry.error_message = error_message.map(String::from).or(entry.error_message.clone());
        Ok(())
    }

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
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let key = (tenant.to_string(), agent_run_id);
        let entry = state.agent_runs.entry(key).or_insert_with(|| AgentRun {
            tenant: tenant.to_string(),
            agent_run_id,
            orchestration_run_id: orchestration_run_id.to_string(),
            agent_id: agent_id.to_string(),
            agent_version: agent_version.to_string(),
            model: model.map(String::from),
            config_hash: config_hash.map(String::from),
            parent_agent_run_id,
            started_at,
            completed_at: None,
            latency_ms: None,
            output_summary: None,
            output_uri: None,
        });
        entry.started_at = entry.started_at.min(started_at);
        Ok(())
    }

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
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let key = (tenant.to_string(), agent_run_id);
        let entry = state.agent_runs.entry(key).or_insert_with(|| AgentRun {
            tenant: tenant.to_string(),
            agent_run_id,
            orchestration_run_id: orchestration_run_id.to_string(),
            agent_id: agent_id.to_string(),
            agent_version: agent_version.to_string(),
            model: None,
            config_hash: None,
            parent_agent_run_id: None,
            started_at: completed_at,
            completed_at: None,
            latency_ms: None,
            output_summary: None,
            output_uri: None,
        });
        entry.completed_at.get_or_insert(completed_at);
        entry.latency_ms = entry.latency_ms.or(latency_ms);
        entry.output_summary = output_summary.map(String::from).or(entry.output_summary.clone());
        entry.output_uri = output_uri.map(String::from).or(entry.output_uri.clone());
        Ok(())
    }

    async fn insert_evaluation_record_if_absent(
        &self,
        record: EvaluationRecord,
    ) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        let already = state
            .evaluations
            .values()
            .any(|e| e.tenant == record.tenant && e.agent_run_id == record.agent_run_id);
        if already {
            return Ok(false);
        }
        state
            .evaluations
            .insert((record.tenant.clone(), record.evaluation_id), record);
        Ok(true)
    }

    async fn upsert_signal(&self, signal: Signal) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.signals.insert((signal.tenant.clone(), signal.signal_id), signal);
        Ok(())
    }

    async fn upsert_market_outcome(&self, outcome: MarketOutcome) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let key = (
            outcome.tenant.clone(),
            outcome.dataset_version.clone(),
            outcome.instrument_id.clone(),
            outcome.asof_time,
        );
        state.outcomes.entry(key).or_insert(outcome);
        Ok(())
    }

    async fn audit(&self, entry: AuditEntry) -> anyhow::Result<()> {
        self.state.lock().audit.push(entry);
        Ok(())
    }

    async fn upsert_rollup(&self, rollup: MetricRollupHourly) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let key = (
            rollup.tenant.clone(),
            rollup.workflow_id.clone(),
            rollup.agent_id.clone(),
            rollup.agent_version.clone(),
            rollup.hour_bucket,
        );
        state.rollups.insert(key, rollup);
        Ok(())
    }

    async fn active_groups(
        &self,
        tenant: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<(String, String, String)>> {
        let state = self.state.lock();
        let mut set: std::collections::HashSet<(String, String, String)> = Default::default();
        for e in state.evaluations.values() {
            if e.tenant == tenant && e.scoring_timestamp >= since {
                set.insert((e.workflow_id.clone(), e.agent_id.clone(), e.agent_version.clone()));
            }
        }
        Ok(set.into_iter().collect())
    }

    async fn recent_evaluations(
        &self,
        tenant: &str,
        workflow_id: &str,
        agent_id: &str,
        agent_version: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<EvaluationRecord>> {
        let state = self.state.lock();
        let mut rows: Vec<EvaluationRecord> = state
            .evaluations
            .values()
            .filter(|e| {
                e.tenant == tenant
                    && e.workflow_id == workflow_id
                    && e.agent_id == agent_id
                    && e.agent_version == agent_version
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.scoring_timestamp.cmp(&a.scoring_timestamp));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn set_anomaly_flag(&self, tenant: &str, evaluation_id: Uuid) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if let Some(e) = state.evaluations.get_mut(&(tenant.to_string(), evaluation_id)) {
            e.anomaly_flag = true;
        }
        Ok(())
    }

    async fn insert_anomaly(&self, anomaly: Anomaly) -> anyhow::Result<()> {
        self.state.lock().anomalies.push(anomaly);
        Ok(())
    }

    async fn metric_values_in_window(
        &self,
        tenant: &str,
        workflow_id: &str,
        agent_id: &str,
        agent_version: &str,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<f64>> {
        let state = self.state.lock();
        let values = state
            .evaluations
            .values()
            .filter(|e| {
                e.tenant == tenant
                    && e.workflow_id == workflow_id
                    && e.agent_id == agent_id
                    && e.agent_version == agent_version
                    && e.scoring_timestamp >= start
                    && e.scoring_timestamp < end
            })
            .filter_map(|e| match metric {
                "faithfulness" => e.raw.faithfulness,
                "latency_ms" => e.raw.latency_ms,
                "quality" => e.run_quality_score,
                "confidence" => e.raw.confidence,
                "coverage" => e.raw.coverage,
                _ => None,
            })
            .collect();
        Ok(values)
    }

    async fn hourly_quality_series(
        &self,
        tenant: &str,
        workflow_id: &str,
        agent_id: &str,
        agent_version: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<(DateTime<Utc>, f64)>> {
        let state = self.state.lock();
        let mut rows: Vec<(DateTime<Utc>, f64)> = state
            .rollups
            .values()
            .filter(|r| {
                r.tenant == tenant
                    && r.workflow_id == workflow_id
                    && r.agent_id == agent_id
                    && r.agent_version == agent_version
                    && r.hour_bucket >= since
            })
            .filter_map(|r| r.stats.mean_quality.map(|q| (r.hour_bucket, q)))
            .collect();
        rows.sort_by_key(|(t, _)| *t);
        Ok(rows)
    }

    async fn insert_performance_shift(&self, shift: PerformanceShift) -> anyhow::Result<()> {
        self.state.lock().shifts.push(shift);
        Ok(())
    }

    async fn rollups_since(
        &self,
        tenant: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MetricRollupHourly>> {
        let state = self.state.lock();
        Ok(state
            .rollups
            .values()
            .filter(|r| r.tenant == tenant && r.hour_bucket >= since)
            .cloned()
            .collect())
    }

    async fn has_recent_open_action(
        &self,
        tenant: &str,
        action_type: &str,
        target_key: &str,
        lookback_hours: i64,
    ) -> anyhow::Result<bool> {
        let state = self.state.lock();
        let cutoff = Utc::now() - chrono::Duration::hours(lookback_hours);
        Ok(state.actions.iter().any(|a| {
            a.tenant == tenant
                && a.action_type == action_type
                && a.status == ActionStatus::Open
                && a.created_at >= cutoff
                && canonical_json(&a.target) == target_key
        }))
    }

    async fn insert_recommended_action(&self, action: RecommendedAction) -> anyhow::Result<()> {
        self.state.lock().actions.push(action);
        Ok(())
    }

    async fn signals_in_range(
        &self,
        tenant: &str,
        horizon: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Signal>> {
        let state = self.state.lock();
        Ok(state
            .signals
            .values()
            .filter(|s| {
                s.tenant == tenant
                    && s.horizon == horizon
                    && s.event_time >= start
                    && s.event_time < end
            })
            .cloned()
            .collect())
    }

    async fn market_outcomes_for(
        &self,
        tenant: &str,
        dataset_version: &str,
        target_time: DateTime<Utc>,
        instrument_ids: &[String],
    ) -> anyhow::Result<Vec<MarketOutcome>> {
        let state = self.state.lock();
        Ok(state
            .outcomes
            .values()
            .filter(|o| {
                o.tenant == tenant
                    && o.dataset_version == dataset_version
                    && o.asof_time == target_time
                    && instrument_ids.contains(&o.instrument_id)
            })
            .cloned()
            .collect())
    }

    async fn insert_signal_outcome(&self, outcome: SignalOutcome) -> anyhow::Result<()> {
        self.state.lock().signal_outcomes.push(outcome);
        Ok(())
    }

    async fn insert_backtest_run(&self, run: BacktestRun) -> anyhow::Result<()> {
        self.state.lock().backtests.push(run);
        Ok(())
    }

    async fn list_anomalies(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<Anomaly>> {
        let state = self.state.lock();
        let mut rows: Vec<Anomaly> = state.anomalies.iter().filter(|a| a.tenant == tenant).cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn list_shifts(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<PerformanceShift>> {
        let state = self.state.lock();
        let mut rows: Vec<PerformanceShift> =
            state.shifts.iter().filter(|s| s.tenant == tenant).cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn list_actions(
        &self,
        tenant: &str,
        status: Option<ActionStatus>,
        limit: i64,
    ) -> anyhow::Result<Vec<RecommendedAction>> {
        let state = self.state.lock();
        let mut rows: Vec<RecommendedAction> = state
            .actions
            .iter()
            .filter(|a| a.tenant == tenant && status.map(|s| s == a.status).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn list_backtests(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<BacktestRun>> {
        let state = self.state.lock();
        let mut rows: Vec<BacktestRun> =
            state.backtests.iter().filter(|b| b.tenant == tenant).cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn get_signal(&self, tenant: &str, signal_id: Uuid) -> anyhow::Result<Option<Signal>> {
        let state = self.state.lock();
        Ok(state.signals.get(&(tenant.to_string(), signal_id)).cloned())
    }

    async fn agent_metrics(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<MetricRollupHourly>> {
        let state = self.state.lock();
        let mut rows: Vec<MetricRollupHourly> =
            state.rollups.values().filter(|r| r.tenant == tenant).cloned().collect();
        rows.sort_by(|a, b| b.hour_bucket.cmp(&a.hour_bucket));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn workflow_metrics(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<MetricRollupHourly>> {
        self.agent_metrics(tenant, limit).await
    }
}

/// Canonical JSON string for dedup-key comparison: serde_json already
/// serializes object keys in insertion order, so callers constructing
/// targets must build them with a fixed key order (see `jobs::actions`).
pub fn canonical_json(value: &serde_json::Value) -> String {
    value.to_string()
}
