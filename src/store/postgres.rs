//! Postgres-backed `Store`. Tables carry the columns the query surface
//! actually filters or sorts on (tenant, ids, timestamps, metric values) plus
//! a `data` jsonb column holding the full serialized domain entity, so the
//! Rust-side shape can evolve without a migration for every new field —
//! the same "typed struct, opaque JSON at the boundary" split SPEC_FULL.md
//! calls for with `payload`/`instrument_universe`/`signal_value`/`target`.
//!
//! Schema is applied via idempotent `CREATE TABLE IF NOT EXISTS` at startup,
//! generalizing the teacher's embedded-schema-string approach in
//! `signals/db_storage.rs` from SQLite pragmas to Postgres DDL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::domain::entities::*;
use crate::domain::config::PoolConfig;

use super::{IdempotencyOutcome, InsertEventsOutcome, Store};

pub async fn connect(database_url: &str, cfg: &PoolConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(std::time::Duration::from_millis(cfg.connect_timeout_ms))
        .idle_timeout(std::time::Duration::from_millis(cfg.idle_timeout_ms))
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS dead_letter_events (
    id BIGSERIAL PRIMARY KEY,
    tenant TEXT,
    reason TEXT NOT NULL,
    errors JSONB NOT NULL,
    raw_body JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS ingest_requests (
    tenant TEXT NOT NULL,
    idempotency_key TEXT NOT NULL,
    request_sha256 TEXT NOT NULL,
    status TEXT NOT NULL,
    response_status INT,
    response_body JSONB,
    PRIMARY KEY (tenant, idempotency_key)
);

CREATE TABLE IF NOT EXISTS raw_events (
    tenant TEXT NOT NULL,
    event_id UUID NOT NULL,
    event_type TEXT NOT NULL,
    event_time TIMESTAMPTZ NOT NULL,
    ingest_time TIMESTAMPTZ NOT NULL DEFAULT now(),
    attempt_count INT NOT NULL DEFAULT 0,
    processed_at TIMESTAMPTZ,
    processing_error TEXT,
    claimed_until TIMESTAMPTZ,
    data JSONB NOT NULL,
    PRIMARY KEY (tenant, event_id)
);
CREATE INDEX IF NOT EXISTS raw_events_unprocessed_idx
    ON raw_events (ingest_time, event_time, event_id)
    WHERE processed_at IS NULL;

CREATE TABLE IF NOT EXISTS orchestration_runs (
    tenant TEXT NOT NULL,
    run_id TEXT NOT NULL,
    workflow_id TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TIMESTAMPTZ NOT NULL,
    data JSONB NOT NULL,
    PRIMARY KEY (tenant, run_id)
);

CREATE TABLE IF NOT EXISTS agent_runs (
    tenant TEXT NOT NULL,
    agent_run_id UUID NOT NULL,
    orchestration_run_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    agent_version TEXT NOT NULL,
    started_at TIMESTAMPTZ NOT NULL,
    data JSONB NOT NULL,
    PRIMARY KEY (tenant, agent_run_id)
);

CREATE TABLE IF NOT EXISTS evaluation_records (
    tenant TEXT NOT NULL,
    evaluation_id UUID NOT NULL,
    agent_run_id UUID NOT NULL,
    workflow_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    agent_version TEXT NOT NULL,
    latency_ms DOUBLE PRECISION,
    faithfulness DOUBLE PRECISION,
    coverage DOUBLE PRECISION,
    confidence DOUBLE PRECISION,
    run_quality_score DOUBLE PRECISION,
    anomaly_flag BOOLEAN NOT NULL DEFAULT false,
    scoring_timestamp TIMESTAMPTZ NOT NULL,
    data JSONB NOT NULL,
    PRIMARY KEY (tenant, evaluation_id),
    UNIQUE (tenant, agent_run_id)
);
CREATE INDEX IF NOT EXISTS evaluation_records_group_idx
    ON evaluation_records (tenant, workflow_id, agent_id, agent_version, scoring_timestamp DESC);

CREATE TABLE IF NOT EXISTS metric_rollups_hourly (
    tenant TEXT NOT NULL,
    workflow_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    agent_version TEXT NOT NULL,
    hour_bucket TIMESTAMPTZ NOT NULL,
    mean_quality DOUBLE PRECISION,
    data JSONB NOT NULL,
    PRIMARY KEY (tenant, workflow_id, agent_id, agent_version, hour_bucket)
);

CREATE TABLE IF NOT EXISTS anomalies (
    tenant TEXT NOT NULL,
    anomaly_id UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    data JSONB NOT NULL,
    PRIMARY KEY (tenant, anomaly_id)
);

CREATE TABLE IF NOT EXISTS performance_shifts (
    tenant TEXT NOT NULL,
    shift_id UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    p_value DOUBLE PRECISION NOT NULL,
    data JSONB NOT NULL,
    PRIMARY KEY (tenant, shift_id)
);

CREATE TABLE IF NOT EXISTS signals (
    tenant TEXT NOT NULL,
    signal_id UUID NOT NULL,
    horizon TEXT NOT NULL,
    event_time TIMESTAMPTZ NOT NULL,
    data JSONB NOT NULL,
    PRIMARY KEY (tenant, signal_id)
);

CREATE TABLE IF NOT EXISTS market_outcomes (
    tenant TEXT NOT NULL,
    dataset_version TEXT NOT NULL,
    instrument_id TEXT NOT NULL,
    asof_time TIMESTAMPTZ NOT NULL,
    realized_return DOUBLE PRECISION NOT NULL,
    benchmark_return DOUBLE PRECISION,
    PRIMARY KEY (tenant, dataset_version, instrument_id, asof_time)
);

CREATE TABLE IF NOT EXISTS signal_outcomes (
    tenant TEXT NOT NULL,
    signal_id UUID NOT NULL,
    horizon TEXT NOT NULL,
    backtest_id UUID NOT NULL,
    data JSONB NOT NULL,
    PRIMARY KEY (tenant, signal_id, horizon, backtest_id)
);

CREATE TABLE IF NOT EXISTS backtest_runs (
    tenant TEXT NOT NULL,
    backtest_id UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    data JSONB NOT NULL,
    PRIMARY KEY (tenant, backtest_id)
);

CREATE TABLE IF NOT EXISTS recommended_actions (
    tenant TEXT NOT NULL,
    action_id UUID NOT NULL,
    action_type TEXT NOT NULL,
    target JSONB NOT NULL,
    status TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    data JSONB NOT NULL,
    PRIMARY KEY (tenant, action_id)
);
CREATE INDEX IF NOT EXISTS recommended_actions_dedup_idx
    ON recommended_actions (tenant, action_type, status, created_at DESC);

CREATE TABLE IF NOT EXISTS audit_entries (
    id BIGSERIAL PRIMARY KEY,
    tenant TEXT,
    actor TEXT NOT NULL,
    action TEXT NOT NULL,
    details JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn data_of<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).expect("domain entities always serialize")
}

#[async_trait]
impl Store for PgStore {
    async fn insert_dead_letter(&self, entry: DeadLetterEvent) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO dead_letter_events (tenant, reason, errors, raw_body, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&entry.tenant)
        .bind(&entry.reason)
        .bind(&entry.errors)
        .bind(&entry.raw_body)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn check_idempotency(
        &self,
        tenant: &str,
        key: &str,
        request_sha256: &str,
    ) -> anyhow::Result<IdempotencyOutcome> {
        let row = sqlx::query(
            "SELECT request_sha256, status, response_status, response_body FROM ingest_requests WHERE tenant = $1 AND idempotency_key = $2",
        )
        .bind(tenant)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(IdempotencyOutcome::Fresh);
        };
        let existing_sha: String = row.try_get("request_sha256")?;
        if existing_sha != request_sha256 {
            return Ok(IdempotencyOutcome::Conflict);
        }
        let status: String = row.try_get("status")?;
        match status.as_str() {
            "completed" => {
                let response_status: i32 = row.try_get("response_status")?;
                let response_body: serde_json::Value = row.try_get("response_body")?;
                Ok(IdempotencyOutcome::ReplayCompleted {
                    response_status,
                    response_body,
                })
            }
            "processing" => Ok(IdempotencyOutcome::InProgress),
            _ => Ok(IdempotencyOutcome::Conflict),
        }
    }

    async fn begin_idempotent_request(
        &self,
        tenant: &str,
        key: &str,
        request_sha256: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO ingest_requests (tenant, idempotency_key, request_sha256, status) VALUES ($1, $2, $3, 'processing') ON CONFLICT (tenant, idempotency_key) DO NOTHING",
        )
        .bind(tenant)
        .bind(key)
        .bind(request_sha256)
        .execute(&self.pool)
        .await?;
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
        let status_str = match status {
            IngestRequestStatus::Processing => "processing",
            IngestRequestStatus::Completed => "completed",
            IngestRequestStatus::Failed => "failed",
        };
        sqlx::query(
            "UPDATE ingest_requests SET status = $3, response_status = $4, response_body = $5 WHERE tenant = $1 AND idempotency_key = $2",
        )
        .bind(tenant)
        .bind(key)
        .bind(status_str)
        .bind(response_status)
        .bind(response_body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_raw_events(&self, events: Vec<RawEvent>) -> anyhow::Result<InsertEventsOutcome> {
        let received = events.len();
        let mut inserted = 0usize;
        let mut tx = self.pool.begin().await?;
        for event in &events {
            let result = sqlx::query(
                "INSERT INTO raw_events (tenant, event_id, event_type, event_time, ingest_time, attempt_count, data)
                 VALUES ($1, $2, $3, $4, $5, 0, $6)
                 ON CONFLICT (tenant, event_id) DO NOTHING",
            )
            .bind(&event.tenant)
            .bind(event.event_id)
            .bind(&event.event_type)
            .bind(event.event_time)
            .bind(event.ingest_time)
            .bind(data_of(event))
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }
        tx.commit().await?;
        Ok(InsertEventsOutcome { received, inserted })
    }

    /// Claims up to `batch_size` unprocessed rows for this cycle. The claim
    /// is itself a single `SELECT ... FOR UPDATE SKIP LOCKED` feeding an
    /// `UPDATE` inside one statement, so two materializers racing each other
    /// never select the same row — the row-level lock only needs to survive
    /// for the duration of this statement, not the whole cycle. A
    /// `claimed_until` lease (60s) guards against a worker crashing after
    /// claiming but before marking the row processed or failed; an event
    /// past its lease is eligible for re-claim by any worker.
    async fn claim_raw_events(
        &self,
        batch_size: usize,
        max_attempts: i32,
    ) -> anyhow::Result<Vec<RawEvent>> {
        let rows = sqlx::query(
            "WITH claimable AS (
                SELECT tenant, event_id FROM raw_events
                WHERE processed_at IS NULL AND attempt_count < $1
                  AND (claimed_until IS NULL OR claimed_until < now())
                ORDER BY ingest_time, event_time, event_id
                FOR UPDATE SKIP LOCKED
                LIMIT $2
             )
             UPDATE raw_events r
             SET claimed_until = now() + interval '60 seconds'
             FROM claimable c
             WHERE r.tenant = c.tenant AND r.event_id = c.event_id
             RETURNING r.data",
        )
        .bind(max_attempts)
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.try_get("data")?;
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    async fn mark_event_processed(&self, tenant: &str, event_id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE raw_events SET processed_at = now(), processing_error = NULL WHERE tenant = $1 AND event_id = $2",
        )
        .bind(tenant)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_event_failed(
        &self,
        tenant: &str,
        event_id: Uuid,
        error: &str,
        max_attempts: i32,
    ) -> anyhow::Result<()> {
        let truncated: String = error.chars().take(2000).collect();
        sqlx::query(
            "UPDATE raw_events SET
                attempt_count = attempt_count + 1,
                processing_error = $3,
                processed_at = CASE WHEN attempt_count + 1 >= $4 THEN now() ELSE processed_at END
             WHERE tenant = $1 AND event_id = $2",
        )
        .bind(tenant)
        .bind(event_id)
        .bind(truncated)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;
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
        let run = OrchestrationRun {
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
            orchestrator_metadata,
            client_metadata,
            user_metadata,
        };
        sqlx::query(
            "INSERT INTO orchestration_runs (tenant, run_id, workflow_id, status, started_at, data)
             VALUES ($1, $2, $3, 'running', $4, $5)
             ON CONFLICT (tenant, run_id) DO UPDATE SET
                started_at = LEAST(orchestration_runs.started_at, EXCLUDED.started_at),
                data = jsonb_set(orchestration_runs.data, '{started_at}', EXCLUDED.data->'started_at')",
        )
        .bind(tenant)
        .bind(run_id)
        .bind(workflow_id)
        .bind(started_at)
        .bind(data_of(&run))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_orchestration_run_placeholder(
        &self,
        tenant: &str,
        run_id: &str,
        workflow_id: &str,
        request_time: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let run = OrchestrationRun {
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
        };
        sqlx::query(
            "INSERT INTO orchestration_runs (tenant, run_id, workflow_id, status, started_at, data)
             VALUES ($1, $2, $3, 'running', $4, $5)
             ON CONFLICT (tenant, run_id) DO NOTHING",
        )
        .bind(tenant)
        .bind(run_id)
        .bind(workflow_id)
        .bind(request_time)
        .bind(data_of(&run))
        .execute(&self.pool)
        .await?;
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
        let status_str = match status {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        };
        sqlx::query(
            "UPDATE orchestration_runs SET
                status = $3,
                data = jsonb_set(jsonb_set(jsonb_set(jsonb_set(jsonb_set(
                    data, '{status}', to_jsonb($3::text)),
                    '{completed_at}', COALESCE(data->'completed_at', to_jsonb($4::timestamptz))),
                    '{total_latency_ms}', COALESCE(data->'total_latency_ms', to_jsonb($5::bigint))),
                    '{error_code}', COALESCE(data->'error_code', to_jsonb($6::text))),
                    '{error_message}', COALESCE(data->'error_message', to_jsonb($7::text)))
             WHERE tenant = $1 AND run_id = $2",
        )
        .bind(tenant)
        .bind(run_id)
        .bind(status_str)
        .bind(completed_at)
        .bind(total_latency_ms)
        .bind(error_code)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
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
        let run = AgentRun {
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
        };
        sqlx::query(
            "INSERT INTO agent_runs (tenant, agent_run_id, orchestration_run_id, agent_id, agent_version, started_at, data)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (tenant, agent_run_id) DO UPDATE SET
                started_at = LEAST(agent_runs.started_at, EXCLUDED.started_at)",
        )
        .bind(tenant)
        .bind(agent_run_id)
        .bind(orchestration_run_id)
        .bind(agent_id)
        .bind(agent_version)
        .bind(started_at)
        .bind(data_of(&run))
        .execute(&self.pool)
        .await?;
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
        let run = AgentRun {
            tenant: tenant.to_string(),
            agent_run_id,
            orchestration_run_id: orchestration_run_id.to_string(),
            agent_id: agent_id.to_string(),
            agent_version: agent_version.to_string(),
            model: None,
            config_hash: None,
            parent_agent_run_id: None,
            started_at: completed_at,
            completed_at: Some(completed_at),
            latency_ms,
            output_summary: output_summary.map(String::from),
            output_uri: output_uri.map(String::from),
        };
        sqlx::query(
            "INSERT INTO agent_runs (tenant, agent_run_id, orchestration_run_id, agent_id, agent_version, started_at, data)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (tenant, agent_run_id) DO UPDATE SET
                data = jsonb_set(jsonb_set(jsonb_set(
                    agent_runs.data, '{completed_at}', COALESCE(agent_runs.data->'completed_at', EXCLUDED.data->'completed_at')),
                    '{latency_ms}', COALESCE(agent_runs.data->'latency_ms', EXCLUDED.data->'latency_ms')),
                    '{output_summary}', COALESCE(agent_runs.data->'output_summary', EXCLUDED.data->'output_summary'))",
        )
        .bind(tenant)
        .bind(agent_run_id)
        .bind(orchestration_run_id)
        .bind(agent_id)
        .bind(agent_version)
        .bind(completed_at)
        .bind(data_of(&run))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_evaluation_record_if_absent(
        &self,
        record: EvaluationRecord,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "INSERT INTO evaluation_records
                (tenant, evaluation_id, agent_run_id, workflow_id, agent_id, agent_version,
                 latency_ms, faithfulness, coverage, confidence, run_quality_score, anomaly_flag,
                 scoring_timestamp, data)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (tenant, agent_run_id) DO NOTHING",
        )
        .bind(&record.tenant)
        .bind(record.evaluation_id)
        .bind(record.agent_run_id)
        .bind(&record.workflow_id)
        .bind(&record.agent_id)
        .bind(&record.agent_version)
        .bind(record.raw.latency_ms)
        .bind(record.raw.faithfulness)
        .bind(record.raw.coverage)
        .bind(record.raw.confidence)
        .bind(record.run_quality_score)
        .bind(record.anomaly_flag)
        .bind(record.scoring_timestamp)
        .bind(data_of(&record))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_signal(&self, signal: Signal) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO signals (tenant, signal_id, horizon, event_time, data)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (tenant, signal_id) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(&signal.tenant)
        .bind(signal.signal_id)
        .bind(&signal.horizon)
        .bind(signal.event_time)
        .bind(data_of(&signal))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_market_outcome(&self, outcome: MarketOutcome) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO market_outcomes (tenant, dataset_version, instrument_id, asof_time, realized_return, benchmark_return)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (tenant, dataset_version, instrument_id, asof_time) DO NOTHING",
        )
        .bind(&outcome.tenant)
        .bind(&outcome.dataset_version)
        .bind(&outcome.instrument_id)
        .bind(outcome.asof_time)
        .bind(outcome.realized_return)
        .bind(outcome.benchmark_return)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn audit(&self, entry: AuditEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO audit_entries (tenant, actor, action, details, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&entry.tenant)
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_rollup(&self, rollup: MetricRollupHourly) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO metric_rollups_hourly (tenant, workflow_id, agent_id, agent_version, hour_bucket, mean_quality, data)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (tenant, workflow_id, agent_id, agent_version, hour_bucket) DO UPDATE SET
                mean_quality = EXCLUDED.mean_quality, data = EXCLUDED.data",
        )
        .bind(&rollup.tenant)
        .bind(&rollup.workflow_id)
        .bind(&rollup.agent_id)
        .bind(&rollup.agent_version)
        .bind(rollup.hour_bucket)
        .bind(rollup.stats.mean_quality)
        .bind(data_of(&rollup))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_groups(
        &self,
        tenant: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<(String, String, String)>> {
        let rows = sqlx::query(
            "SELECT DISTINCT workflow_id, agent_id, agent_version FROM evaluation_records
             WHERE tenant = $1 AND scoring_timestamp >= $2",
        )
        .bind(tenant)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok((
                    row.try_get("workflow_id")?,
                    row.try_get("agent_id")?,
                    row.try_get("agent_version")?,
                ))
            })
            .collect()
    }

    async fn recent_evaluations(
        &self,
        tenant: &str,
        workflow_id: &str,
        agent_id: &str,
        agent_version: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<EvaluationRecord>> {
        let rows = sqlx::query(
            "SELECT data FROM evaluation_records
             WHERE tenant = $1 AND workflow_id = $2 AND agent_id = $3 AND agent_version = $4
             ORDER BY scoring_timestamp DESC
             LIMIT $5",
        )
        .bind(tenant)
        .bind(workflow_id)
        .bind(agent_id)
        .bind(agent_version)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.try_get("data")?;
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    async fn set_anomaly_flag(&self, tenant: &str, evaluation_id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE evaluation_records SET anomaly_flag = true,
                data = jsonb_set(data, '{anomaly_flag}', 'true') WHERE tenant = $1 AND evaluation_id = $2",
        )
        .bind(tenant)
        .bind(evaluation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_anomaly(&self, anomaly: Anomaly) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO anomalies (tenant, anomaly_id, created_at, data) VALUES ($1, $2, $3, $4)",
        )
        .bind(&anomaly.tenant)
        .bind(anomaly.anomaly_id)
        .bind(anomaly.created_at)
        .bind(data_of(&anomaly))
        .execute(&self.pool)
        .await?;
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
        let column = match metric {
            "faithfulness" => "faithfulness",
            "latency_ms" => "latency_ms",
            "quality" => "run_quality_score",
            "confidence" => "confidence",
            "coverage" => "coverage",
            _ => return Ok(Vec::new()),
        };
        let sql = format!(
            "SELECT {column} AS v FROM evaluation_records
             WHERE tenant = $1 AND workflow_id = $2 AND agent_id = $3 AND agent_version = $4
               AND scoring_timestamp >= $5 AND scoring_timestamp < $6 AND {column} IS NOT NULL"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant)
            .bind(workflow_id)
            .bind(agent_id)
            .bind(agent_version)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|row| Ok(row.try_get::<f64, _>("v")?)).collect()
    }

    async fn hourly_quality_series(
        &self,
        tenant: &str,
        workflow_id: &str,
        agent_id: &str,
        agent_version: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<(DateTime<Utc>, f64)>> {
        let rows = sqlx::query(
            "SELECT hour_bucket, mean_quality FROM metric_rollups_hourly
             WHERE tenant = $1 AND workflow_id = $2 AND agent_id = $3 AND agent_version = $4
               AND hour_bucket >= $5 AND mean_quality IS NOT NULL
             ORDER BY hour_bucket ASC",
        )
        .bind(tenant)
        .bind(workflow_id)
        .bind(agent_id)
        .bind(agent_version)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| Ok((row.try_get("hour_bucket")?, row.try_get("mean_quality")?)))
            .collect()
    }

    async fn insert_performance_shift(&self, shift: PerformanceShift) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO performance_shifts (tenant, shift_id, created_at, p_value, data) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&shift.tenant)
        .bind(shift.shift_id)
        .bind(shift.created_at)
        .bind(shift.p_value)
        .bind(data_of(&shift))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rollups_since(
        &self,
        tenant: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MetricRollupHourly>> {
        let rows = sqlx::query(
            "SELECT data FROM metric_rollups_hourly WHERE tenant = $1 AND hour_bucket >= $2",
        )
        .bind(tenant)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.try_get("data")?;
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    async fn has_recent_open_action(
        &self,
        tenant: &str,
        action_type: &str,
        target_key: &str,
        lookback_hours: i64,
    ) -> anyhow::Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(
                SELECT 1 FROM recommended_actions
                WHERE tenant = $1 AND action_type = $2 AND status = 'open'
                  AND created_at >= now() - ($4 || ' hours')::interval
                  AND target::text = $3
             ) AS exists_flag",
        )
        .bind(tenant)
        .bind(action_type)
        .bind(target_key)
        .bind(lookback_hours.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("exists_flag")?)
    }

    async fn insert_recommended_action(&self, action: RecommendedAction) -> anyhow::Result<()> {
        let status_str = match action.status {
            ActionStatus::Open => "open",
            ActionStatus::Acknowledged => "acknowledged",
            ActionStatus::Resolved => "resolved",
        };
        sqlx::query(
            "INSERT INTO recommended_actions (tenant, action_id, action_type, target, status, created_at, data)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&action.tenant)
        .bind(action.action_id)
        .bind(&action.action_type)
        .bind(&action.target)
        .bind(status_str)
        .bind(action.created_at)
        .bind(data_of(&action))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn signals_in_range(
        &self,
        tenant: &str,
        horizon: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Signal>> {
        let rows = sqlx::query(
            "SELECT data FROM signals WHERE tenant = $1 AND horizon = $2 AND event_time >= $3 AND event_time < $4",
        )
        .bind(tenant)
        .bind(horizon)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.try_get("data")?;
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    async fn market_outcomes_for(
        &self,
        tenant: &str,
        dataset_version: &str,
        target_time: DateTime<Utc>,
        instrument_ids: &[String],
    ) -> anyhow::Result<Vec<MarketOutcome>> {
        let rows = sqlx::query(
            "SELECT tenant, dataset_version, instrument_id, asof_time, realized_return, benchmark_return
             FROM market_outcomes
             WHERE tenant = $1 AND dataset_version = $2 AND asof_time = $3 AND instrument_id = ANY($4)",
        )
        .bind(tenant)
        .bind(dataset_version)
        .bind(target_time)
        .bind(instrument_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(MarketOutcome {
                    tenant: row.try_get("tenant")?,
                    dataset_version: row.try_get("dataset_version")?,
                    instrument_id: row.try_get("instrument_id")?,
                    asof_time: row.try_get("asof_time")?,
                    realized_return: row.try_get("realized_return")?,
                    benchmark_return: row.try_get("benchmark_return")?,
                })
            })
            .collect()
    }

    async fn insert_signal_outcome(&self, outcome: SignalOutcome) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO signal_outcomes (tenant, signal_id, horizon, backtest_id, data)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (tenant, signal_id, horizon, backtest_id) DO NOTHING",
        )
        .bind(&outcome.tenant)
        .bind(outcome.signal_id)
        .bind(&outcome.horizon)
        .bind(outcome.backtest_id)
        .bind(data_of(&outcome))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_backtest_run(&self, run: BacktestRun) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO backtest_runs (tenant, backtest_id, created_at, data) VALUES ($1, $2, $3, $4)",
        )
        .bind(&run.tenant)
        .bind(run.backtest_id)
        .bind(run.created_at)
        .bind(data_of(&run))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_anomalies(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<Anomaly>> {
        self.list_jsonb("anomalies", tenant, limit).await
    }

    async fn list_shifts(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<PerformanceShift>> {
        self.list_jsonb("performance_shifts", tenant, limit).await
    }

    async fn list_actions(
        &self,
        tenant: &str,
        status: Option<ActionStatus>,
        limit: i64,
    ) -> anyhow::Result<Vec<RecommendedAction>> {
        let rows = if let Some(status) = status {
            let status_str = match status {
                ActionStatus::Open => "open",
                ActionStatus::Acknowledged => "acknowledged",
                ActionStatus::Resolved => "resolved",
            };
            sqlx::query(
                "SELECT data FROM recommended_actions WHERE tenant = $1 AND status = $2 ORDER BY created_at DESC LIMIT $3",
            )
            .bind(tenant)
            .bind(status_str)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT data FROM recommended_actions WHERE tenant = $1 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(tenant)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.try_get("data")?;
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    async fn list_backtests(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<BacktestRun>> {
        self.list_jsonb("backtest_runs", tenant, limit).await
    }

    async fn get_signal(&self, tenant: &str, signal_id: Uuid) -> anyhow::Result<Option<Signal>> {
        let row = sqlx::query("SELECT data FROM signals WHERE tenant = $1 AND signal_id = $2")
            .bind(tenant)
            .bind(signal_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let data: serde_json::Value = row.try_get("data")?;
                Ok(Some(serde_json::from_value(data)?))
            }
        }
    }

    async fn agent_metrics(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<MetricRollupHourly>> {
        let rows = sqlx::query(
            "SELECT data FROM metric_rollups_hourly WHERE tenant = $1 ORDER BY hour_bucket DESC LIMIT $2",
        )
        .bind(tenant)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.try_get("data")?;
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    async fn workflow_metrics(&self, tenant: &str, limit: i64) -> anyhow::Result<Vec<MetricRollupHourly>> {
        self.agent_metrics(tenant, limit).await
    }
}

impl PgStore {
    async fn list_jsonb<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        tenant: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<T>> {
        let sql = format!("SELECT data FROM {table} WHERE tenant = $1 ORDER BY created_at DESC LIMIT $2");
        let rows = sqlx::query(&sql)
            .bind(tenant)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.try_get("data")?;
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }
}
