//! Materialization worker: drains claimed raw events and dispatches each by
//! type into the normalized store. Grounded on the teacher's background-task
//! loop in `main.rs` (spawn a task that claims work, sleeps when idle,
//! retries on failure) generalized from a single monitoring loop to a
//! dispatch-by-event-type cycle.

pub mod rollup;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::entities::*;
use crate::domain::events::{validate_event, EventV1};
use crate::domain::normalize::{normalize_and_score, NormalizationRegistry};
use crate::store::Store;

const DEFAULT_EVALUATOR_VERSION: &str = "v1";
const DEFAULT_NORMALIZATION_VERSION: &str = "v1";
const DEFAULT_WEIGHTING_VERSION: &str = "v1";
const IDLE_SLEEP: Duration = Duration::from_millis(500);

/// Runs the materialization loop until `shutdown` resolves. Each cycle
/// claims up to `batch_size` rows and dispatches them one at a time; an
/// empty claim sleeps for `IDLE_SLEEP` before retrying.
pub async fn run(
    store: Arc<dyn Store>,
    registry: Arc<NormalizationRegistry>,
    batch_size: usize,
    max_attempts: i32,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            info!("materializer shutting down");
            return;
        }
        match run_cycle(&*store, &registry, batch_size, max_attempts).await {
            Ok(0) => {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_SLEEP) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Ok(n) => info!(processed = n, "materialization cycle complete"),
            Err(e) => {
                error!(error = %e, "materialization cycle failed");
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        }
    }
}

/// Claims one batch and dispatches every event in it, returning the number
/// claimed (not necessarily the number successfully applied — failures are
/// recorded on the row itself, see `dispatch_one`).
pub async fn run_cycle(
    store: &dyn Store,
    registry: &NormalizationRegistry,
    batch_size: usize,
    max_attempts: i32,
) -> anyhow::Result<usize> {
    let claimed = store.claim_raw_events(batch_size, max_attempts).await?;
    let n = claimed.len();
    for event in claimed {
        dispatch_one(store, registry, event, max_attempts).await;
    }
    Ok(n)
}

async fn dispatch_one(
    store: &dyn Store,
    registry: &NormalizationRegistry,
    event: RawEvent,
    max_attempts: i32,
) {
    match apply_event(store, registry, &event).await {
        Ok(()) => {
            if let Err(e) = store.mark_event_processed(&event.tenant, event.event_id).await {
                error!(error = %e, event_id = %event.event_id, "failed to mark event processed");
            }
        }
        Err(e) => {
            warn!(error = %e, event_id = %event.event_id, attempt = event.attempt_count + 1, "event dispatch failed");
            if let Err(mark_err) = store
                .mark_event_failed(&event.tenant, event.event_id, &e.to_string(), max_attempts)
                .await
            {
                error!(error = %mark_err, event_id = %event.event_id, "failed to mark event failed");
            }
        }
    }
}

async fn apply_event(
    store: &dyn Store,
    registry: &NormalizationRegistry,
    event: &RawEvent,
) -> anyhow::Result<()> {
    let typed = validate_event(&event.payload)
        .map_err(|errs| anyhow::anyhow!("revalidation failed: {errs:?}"))?;

    match typed {
        EventV1::OrchestrationRunStarted(e) => {
            store
                .upsert_orchestration_run_started(
                    &event.tenant,
                    &e.envelope.orchestration_run_id,
                    &e.envelope.workflow_id,
                    e.envelope.query_id.as_deref(),
                    e.envelope.request_timestamp,
                    e.envelope.event_time,
                    e.orchestration.orchestrator_metadata,
                    e.orchestration.client_metadata,
                    e.orchestration.user_metadata,
                )
                .await
        }
        EventV1::OrchestrationRunCompleted(e) => {
            store
                .ensure_orchestration_run_placeholder(
                    &event.tenant,
                    &e.envelope.orchestration_run_id,
                    &e.envelope.workflow_id,
                    e.envelope.request_timestamp,
                )
                .await?;
            let status = match e.orchestration.status.as_str() {
                "success" => RunStatus::Success,
                "error" => RunStatus::Error,
                _ => RunStatus::Running,
            };
            store
                .upsert_orchestration_run_completed(
                    &event.tenant,
                    &e.envelope.orchestration_run_id,
                    status,
                    e.envelope.event_time,
                    e.orchestration.total_latency_ms,
                    e.orchestration.error_code.as_deref(),
                    e.orchestration.error_message.as_deref(),
                )
                .await
        }
        EventV1::AgentRunStarted(e) => {
            store
                .ensure_orchestration_run_placeholder(
                    &event.tenant,
                    &e.envelope.orchestration_run_id,
                    &e.envelope.workflow_id,
                    e.envelope.request_timestamp,
                )
                .await?;
            store
                .upsert_agent_run_started(
                    &event.tenant,
                    e.agent.agent_run_id,
                    &e.envelope.orchestration_run_id,
                    &e.agent.agent_id,
                    &e.agent.agent_version,
                    e.agent.model.as_deref(),
                    e.agent.config_hash.as_deref(),
                    e.agent.parent_agent_run_id,
                    e.envelope.event_time,
                )
                .await
        }
        EventV1::AgentRunCompleted(e) => {
            store
                .ensure_orchestration_run_placeholder(
                    &event.tenant,
                    &e.envelope.orchestration_run_id,
                    &e.envelope.workflow_id,
                    e.envelope.request_timestamp,
                )
                .await?;

            let latency_ms = e.agent.metrics.latency_ms.map(|v| v as i64);
            store
                .upsert_agent_run_completed(
                    &event.tenant,
                    e.agent.agent_run_id,
                    &e.envelope.orchestration_run_id,
                    &e.agent.agent_id,
                    &e.agent.agent_version,
                    e.envelope.event_time,
                    latency_ms,
                    e.agent.output_summary.as_deref(),
                    e.agent.output_uri.as_deref(),
                )
                .await?;

            let raw = RawMetrics {
                latency_ms: e.agent.metrics.latency_ms,
                faithfulness: e.agent.metrics.faithfulness,
                hallucination_flag: e.agent.metrics.hallucination_flag,
                coverage: e.agent.metrics.coverage,
                confidence: e.agent.metrics.confidence,
            };
            let cfg = registry.resolve(&e.envelope.workflow_id);
            let normalized = normalize_and_score(&raw, cfg);

            let record = EvaluationRecord {
                tenant: event.tenant.clone(),
                evaluation_id: Uuid::new_v4(),
                agent_run_id: e.agent.agent_run_id,
                workflow_id: e.envelope.workflow_id.clone(),
                agent_id: e.agent.agent_id.clone(),
                agent_version: e.agent.agent_version.clone(),
                raw,
                latency_norm: normalized.latency_norm,
                faithfulness_norm: normalized.faithfulness_norm,
                coverage_norm: normalized.coverage_norm,
                confidence_norm: normalized.confidence_norm,
                hallucination_norm: normalized.hallucination_norm,
                run_quality_score: normalized.run_quality_score,
                risk_score: normalized.risk_score,
                evaluator_version: DEFAULT_EVALUATOR_VERSION.to_string(),
                normalization_version: DEFAULT_NORMALIZATION_VERSION.to_string(),
                weighting_version: DEFAULT_WEIGHTING_VERSION.to_string(),
                scoring_timestamp: Utc::now(),
                anomaly_flag: false,
            };
            store.insert_evaluation_record_if_absent(record).await?;
            Ok(())
        }
        EventV1::RetrievalContextAttached(_) => {
            // Reserved: context-pointer persistence is not yet modeled.
            // TODO: persist a pointer once the context store exists.
            Ok(())
        }
        EventV1::SignalEmitted(e) => {
            let signal_value: SignalValue = serde_json::from_value(e.signal.signal_value)?;
            let instrument_universe: Vec<InstrumentWeight> = e
                .signal
                .instrument_universe
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<_, _>>()?;
            let signal = Signal {
                tenant: event.tenant.clone(),
                signal_id: e.signal.signal_id,
                event_time: e.envelope.event_time,
                horizon: e.signal.horizon,
                instrument_universe,
                signal_value,
                confidence: e.signal.confidence,
                constraints: e.signal.constraints,
            };
            store.upsert_signal(signal).await
        }
        EventV1::MarketOutcomeIngested(e) => {
            let outcome = MarketOutcome {
                tenant: event.tenant.clone(),
                dataset_version: e.outcome.dataset_version,
                instrument_id: e.outcome.instrument_id,
                asof_time: e.outcome.asof_time,
                realized_return: e.outcome.realized_return,
                benchmark_return: e.outcome.benchmark_return,
            };
            store.upsert_market_outcome(outcome).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::normalize::NormalizationConfig;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    fn agent_completed_event(tenant: &str, workflow: &str, agent_run_id: Uuid) -> RawEvent {
        let payload = json!({
            "schema_version": "v1",
            "type": "AgentRunCompleted",
            "event_id": Uuid::new_v4(),
            "tenant_id": tenant,
            "orchestration_run_id": "run-1",
            "workflow_id": workflow,
            "request_timestamp": Utc::now().to_rfc3339(),
            "event_time": Utc::now().to_rfc3339(),
            "agent": {
                "agent_run_id": agent_run_id,
                "agent_id": "agent-a",
                "agent_version": "1.0.0",
                "metrics": {
                    "latency_ms": 800.0,
                    "faithfulness": 0.9,
                    "hallucination_flag": false,
                    "coverage": 0.7,
                    "confidence": 0.85
                }
            }
        });
        RawEvent {
            tenant: tenant.to_string(),
            event_id: Uuid::new_v4(),
            schema_version: "v1".to_string(),
            event_type: "AgentRunCompleted".to_string(),
            event_time: Utc::now(),
            ingest_time: Utc::now(),
            payload,
            idempotency_key: None,
            attempt_count: 0,
            processed_at: None,
            processing_error: None,
        }
    }

    #[tokio::test]
    async fn agent_run_completed_produces_one_evaluation_record() {
        let store = MemoryStore::new();
        let registry = NormalizationRegistry::new(NormalizationConfig::default());
        let agent_run_id = Uuid::new_v4();
        let event = agent_completed_event("acme", "wf-1", agent_run_id);

        apply_event(&store, &registry, &event).await.unwrap();
        assert_eq!(store.evaluation_count(), 1);

        // Replaying the same event is a no-op thanks to the (tenant, agent_run_id) uniqueness.
        apply_event(&store, &registry, &event).await.unwrap();
        assert_eq!(store.evaluation_count(), 1);
    }

    #[tokio::test]
    async fn invalid_payload_does_not_panic_and_reports_error() {
        let store = MemoryStore::new();
        let registry = NormalizationRegistry::new(NormalizationConfig::default());
        let mut event = agent_completed_event("acme", "wf-1", Uuid::new_v4());
        event.payload = json!({"not": "a valid envelope"});

        let result = apply_event(&store, &registry, &event).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn full_cycle_claims_and_marks_processed() {
        let store = MemoryStore::new();
        let registry = NormalizationRegistry::new(NormalizationConfig::default());
        let event = agent_completed_event("acme", "wf-1", Uuid::new_v4());
        store.insert_raw_events(vec![event]).await.unwrap();

        let processed = run_cycle(&store, &registry, 10, 5).await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(store.evaluation_count(), 1);

        // Nothing left to claim on a second pass.
        let processed_again = run_cycle(&store, &registry, 10, 5).await.unwrap();
        assert_eq!(processed_again, 0);
    }
}
