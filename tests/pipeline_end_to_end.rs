//! End-to-end scenarios driving ingest, materialization, and the analysis
//! jobs together against the in-memory store double, since this repository
//! does not run a live Postgres instance in CI.

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use agent_eval_pipeline::domain::entities::{EvaluationRecord, RawMetrics, SignalValue};
use agent_eval_pipeline::ingest::handle_ingest;
use agent_eval_pipeline::jobs::{anomaly, backtest, significance};
use agent_eval_pipeline::store::memory::MemoryStore;
use agent_eval_pipeline::store::Store;

fn evaluation(
    workflow: &str,
    latency_ms: f64,
    faithfulness: f64,
    hallucination: bool,
    scoring_timestamp: chrono::DateTime<Utc>,
) -> EvaluationRecord {
    EvaluationRecord {
        tenant: "acme".to_string(),
        evaluation_id: Uuid::new_v4(),
        agent_run_id: Uuid::new_v4(),
        workflow_id: workflow.to_string(),
        agent_id: "agent-a".to_string(),
        agent_version: "1.0.0".to_string(),
        raw: RawMetrics {
            latency_ms: Some(latency_ms),
            faithfulness: Some(faithfulness),
            hallucination_flag: Some(hallucination),
            coverage: Some(0.7),
            confidence: Some(0.85),
        },
        latency_norm: Some(0.5),
        faithfulness_norm: Some(faithfulness),
        coverage_norm: Some(0.7),
        confidence_norm: Some(0.85),
        hallucination_norm: Some(if hallucination { 0.0 } else { 1.0 }),
        run_quality_score: Some(faithfulness),
        risk_score: Some(0.1),
        evaluator_version: "v1".to_string(),
        normalization_version: "v1".to_string(),
        weighting_version: "v1".to_string(),
        scoring_timestamp,
        anomaly_flag: false,
    }
}

/// Scenario (d): a single hallucinating run is flagged regardless of history size.
#[tokio::test]
async fn hallucination_rule_flags_with_no_history() {
    let store = MemoryStore::new();
    let now = Utc::now();
    store.seed_evaluation(evaluation("wf-hallucination", 800.0, 0.9, true, now));

    let created = anomaly::run_anomaly_job(&store, "acme", now - Duration::hours(1), 1).await.unwrap();

    assert_eq!(created, 1);
    let anomalies = store.list_anomalies("acme", 10).await.unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].method, agent_eval_pipeline::domain::entities::AnomalyMethod::Rule);
    assert_eq!(anomalies[0].metric, "hallucination_flag");
}

/// Scenario (c): a latency outlier against a tight baseline is caught by the
/// MAD-based robust z-score, not the hallucination short-circuit.
#[tokio::test]
async fn latency_anomaly_via_mad() {
    let store = MemoryStore::new();
    let now = Utc::now();

    for i in 0..200i64 {
        let latency = 900.0 + (i % 60) as f64 * 10.0; // spread within [900, 1490]
        store.seed_evaluation(evaluation("wf-latency", latency, 0.9, false, now - Duration::minutes(200 - i)));
    }
    store.seed_evaluation(evaluation("wf-latency", 25_000.0, 0.9, false, now));

    let created = anomaly::run_anomaly_job(&store, "acme", now - Duration::hours(24), 20).await.unwrap();

    assert_eq!(created, 1);
    let anomalies = store.list_anomalies("acme", 10).await.unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].metric, "latency_ms");
    assert_eq!(anomalies[0].method, agent_eval_pipeline::domain::entities::AnomalyMethod::MadZScore);
    assert_eq!(
        serde_json::to_value(anomalies[0].method).unwrap(),
        serde_json::json!("mad")
    );
    assert!(anomalies[0].z_score.unwrap().abs() > 3.5);
}

/// Scenario (a): two windows with a clear faithfulness gap produce exactly
/// one significant Welch shift for the group.
#[tokio::test]
async fn welch_sensitivity_flags_significant_shift() {
    let store = MemoryStore::new();
    let now = Utc::now();

    // Window B (older, [now-2h, now-1h)): baseline faithfulness 1.0.
    for i in 0..50i64 {
        store.seed_evaluation(evaluation(
            "wf-shift",
            1.0,
            1.0,
            false,
            now - Duration::minutes(90) - Duration::seconds(i),
        ));
    }
    // Window A (current, [now-1h, now)): degraded faithfulness 0.5.
    for i in 0..50i64 {
        store.seed_evaluation(evaluation(
            "wf-shift",
            1.0,
            0.5,
            false,
            now - Duration::minutes(30) - Duration::seconds(i),
        ));
    }

    let written = significance::run_window_comparison(&store, "acme", "faithfulness", 1, 0.05)
        .await
        .unwrap();

    assert_eq!(written, 1);
    let shifts = store.list_shifts("acme", 10).await.unwrap();
    assert_eq!(shifts.len(), 1);
    assert_eq!(shifts[0].method, "welch_normal_approx");
    assert!(shifts[0].significant);
    assert!(shifts[0].p_value < 1e-3);
}

/// Scenario (e): replaying an identical idempotent batch leaves the raw
/// event table unchanged and returns a bit-identical response.
#[tokio::test]
async fn idempotent_replay_is_a_no_op() {
    let store = MemoryStore::new();
    let tenant = "acme";
    let orchestration_run_id = format!("run-{}", Uuid::new_v4());
    let body = json!([{
        "schema_version": "v1",
        "type": "AgentRunCompleted",
        "event_id": Uuid::new_v4(),
        "tenant_id": tenant,
        "orchestration_run_id": orchestration_run_id,
        "workflow_id": "wf-replay",
        "request_timestamp": Utc::now().to_rfc3339(),
        "event_time": Utc::now().to_rfc3339(),
        "agent": {
            "agent_run_id": Uuid::new_v4(),
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
    }])
    .to_string();

    let first = handle_ingest(&store, body.as_bytes(), Some("key-1")).await.unwrap();
    assert_eq!(first.inserted_events, 1);
    assert_eq!(first.duplicate_events, 0);

    let second = handle_ingest(&store, body.as_bytes(), Some("key-1")).await.unwrap();
    assert_eq!(serde_json::to_value(&first).unwrap(), serde_json::to_value(&second).unwrap());
}

/// Scenario (f): signals perfectly correlated with next-day realized returns
/// produce a non-trivial backtest with positive IC and a perfect hit-rate.
#[tokio::test]
async fn backtest_non_triviality_with_perfect_correlation() {
    let store = MemoryStore::new();
    let tenant = "acme";
    let dataset_version = "D1";
    let start = Utc::now() - chrono::Duration::days(30);
    let end = Utc::now();
    let instruments = ["inst-a", "inst-b", "inst-c"];

    for i in 0..10 {
        let event_time = start + chrono::Duration::hours(i);
        let mut values = std::collections::HashMap::new();
        for (j, inst) in instruments.iter().enumerate() {
            values.insert(inst.to_string(), 0.1 * (i + j as i64) as f64);
        }
        let signal_id = Uuid::new_v4();
        let signal = agent_eval_pipeline::domain::entities::Signal {
            tenant: tenant.to_string(),
            signal_id,
            event_time,
            horizon: "1d".to_string(),
            instrument_universe: instruments
                .iter()
                .map(|id| agent_eval_pipeline::domain::entities::InstrumentWeight {
                    id: id.to_string(),
                    weight: Some(1.0),
                })
                .collect(),
            signal_value: SignalValue::Vector { values: values.clone() },
            confidence: Some(0.9),
            constraints: None,
        };
        store.upsert_signal(signal).await.unwrap();

        for (j, inst) in instruments.iter().enumerate() {
            let outcome = agent_eval_pipeline::domain::entities::MarketOutcome {
                tenant: tenant.to_string(),
                dataset_version: dataset_version.to_string(),
                instrument_id: inst.to_string(),
                asof_time: event_time + chrono::Duration::days(1),
                realized_return: 0.1 * (i + j as i64) as f64,
                benchmark_return: Some(0.0),
            };
            store.upsert_market_outcome(outcome).await.unwrap();
        }
    }

    let params = backtest::BacktestParams {
        tenant: tenant.to_string(),
        dataset_version: dataset_version.to_string(),
        horizon: "1d".to_string(),
        start,
        end,
        cost_bps: 0.0,
        code_version: "v1".to_string(),
    };
    let run = backtest::run_backtest(&store, params).await.unwrap();

    let summary = run.summary;
    let ic = summary["mean_ic"].as_f64().unwrap();
    let hit_rate = summary["hit_rate"].as_f64().unwrap();
    let sharpe = summary["sharpe_net"].as_f64().unwrap();

    assert!(ic > 0.9, "expected mean_ic > 0.9, got {ic}");
    assert_eq!(hit_rate, 1.0);
    assert!(sharpe > 0.0);

    let backtests = store.list_backtests(tenant, 10).await.unwrap();
    assert_eq!(backtests.len(), 1);
}
