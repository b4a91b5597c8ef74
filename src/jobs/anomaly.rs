//! Anomaly job (C7): per-group outlier scan over recent evaluation records.
//! Grounded on `route_quality/baseline.rs`'s z-score outlier check,
//! generalized from a single rolling window to a ranked-candidate scan with
//! a hallucination short-circuit.

use chrono::Utc;
use uuid::Uuid;

use crate::domain::entities::{Anomaly, AnomalyMethod};
use crate::stats::quantile::{mad, robust_z_score};
use crate::stats::corr::sample_stddev;
use crate::store::Store;

const ROBUST_Z_THRESHOLD: f64 = 3.5;
const Z_THRESHOLD: f64 = 3.0;
const CANDIDATE_LIMIT: usize = 20;

/// Scans every active `(workflow, agent, version)` group since `since` and
/// flags up to `CANDIDATE_LIMIT` of its most recent, not-yet-flagged
/// records for anomalies. The hallucination rule fires on a single record
/// with no history required; the MAD/z-score branches each require at
/// least `min_history` prior observations of that metric. Returns the
/// number of anomalies created.
pub async fn run_anomaly_job(
    store: &dyn Store,
    tenant: &str,
    since: chrono::DateTime<Utc>,
    min_history: usize,
) -> anyhow::Result<usize> {
    let groups = store.active_groups(tenant, since).await?;
    let mut created = 0;

    for (workflow_id, agent_id, agent_version) in groups {
        let mut rows = store
            .recent_evaluations(tenant, &workflow_id, &agent_id, &agent_version, 10_000)
            .await?;
        // Descending by scoring_timestamp, most recent first.
        rows.sort_by(|a, b| b.scoring_timestamp.cmp(&a.scoring_timestamp));

        for idx in 0..rows.len().min(CANDIDATE_LIMIT) {
            if rows[idx].anomaly_flag {
                continue;
            }
            // History excludes this candidate and anything newer (smaller index).
            let history = &rows[idx + 1..];

            if rows[idx].raw.hallucination_flag == Some(true) {
                create_anomaly(
                    store,
                    tenant,
                    &rows[idx].evaluation_id,
                    &workflow_id,
                    &agent_id,
                    &agent_version,
                    "hallucination_flag",
                    AnomalyMethod::Rule,
                    1.0,
                    1.0,
                    None,
                )
                .await?;
                created += 1;
                continue;
            }

            if let Some(latency) = rows[idx].raw.latency_ms {
                let hist_latency: Vec<f64> = history.iter().filter_map(|r| r.raw.latency_ms).collect();
                if hist_latency.len() >= min_history && mad(&hist_latency) > 0.0 {
                    let z = robust_z_score(latency, &hist_latency);
                    if z.abs() > ROBUST_Z_THRESHOLD {
                        create_anomaly(
                            store,
                            tenant,
                            &rows[idx].evaluation_id,
                            &workflow_id,
                            &agent_id,
                            &agent_version,
                            "latency_ms",
                            AnomalyMethod::MadZScore,
                            latency,
                            ROBUST_Z_THRESHOLD,
                            Some(z),
                        )
                        .await?;
                        created += 1;
                        continue;
                    }
                }
            }

            if let Some(confidence) = rows[idx].raw.confidence {
                let hist: Vec<f64> = history.iter().filter_map(|r| r.raw.confidence).collect();
                if hist.len() >= min_history {
                    let z = z_score(confidence, &hist);
                    if z.abs() > Z_THRESHOLD {
                        create_anomaly(
                            store,
                            tenant,
                            &rows[idx].evaluation_id,
                            &workflow_id,
                            &agent_id,
                            &agent_version,
                            "confidence",
                            AnomalyMethod::ZScore,
                            confidence,
                            Z_THRESHOLD,
                            Some(z),
                        )
                        .await?;
                        created += 1;
                        continue;
                    }
                }
            }

            if let Some(faithfulness) = rows[idx].raw.faithfulness {
                let hist: Vec<f64> = history.iter().filter_map(|r| r.raw.faithfulness).collect();
                if hist.len() >= min_history {
                    let z = z_score(faithfulness, &hist);
                    if z < -Z_THRESHOLD {
                        create_anomaly(
                            store,
                            tenant,
                            &rows[idx].evaluation_id,
                            &workflow_id,
                            &agent_id,
                            &agent_version,
                            "faithfulness",
                            AnomalyMethod::ZScore,
                            faithfulness,
                            Z_THRESHOLD,
                            Some(z),
                        )
                        .await?;
                        created += 1;
                    }
                }
            }
        }
    }

    Ok(created)
}

fn z_score(x: f64, history: &[f64]) -> f64 {
    let mean = history.iter().sum::<f64>() / history.len() as f64;
    let sd = sample_stddev(history);
    if sd == 0.0 {
        0.0
    } else {
        (x - mean) / sd
    }
}

#[allow(clippy::too_many_arguments)]
async fn create_anomaly(
    store: &dyn Store,
    tenant: &str,
    evaluation_id: &Uuid,
    workflow_id: &str,
    agent_id: &str,
    agent_version: &str,
    metric: &str,
    method: AnomalyMethod,
    value: f64,
    threshold: f64,
    z_score: Option<f64>,
) -> anyhow::Result<()> {
    store
        .insert_anomaly(Anomaly {
            tenant: tenant.to_string(),
            anomaly_id: Uuid::new_v4(),
            evaluation_id: *evaluation_id,
            workflow_id: workflow_id.to_string(),
            agent_id: agent_id.to_string(),
            agent_version: agent_version.to_string(),
            metric: metric.to_string(),
            method,
            value,
            threshold,
            z_score,
            details: serde_json::json!({}),
            created_at: Utc::now(),
        })
        .await?;
    store.set_anomaly_flag(tenant, *evaluation_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{EvaluationRecord, RawMetrics};
    use crate::store::memory::MemoryStore;
    use chrono::Duration;

    fn record(faithfulness: f64, hallucination: bool, ts: chrono::DateTime<Utc>) -> EvaluationRecord {
        EvaluationRecord {
            tenant: "acme".to_string(),
            evaluation_id: Uuid::new_v4(),
            agent_run_id: Uuid::new_v4(),
            workflow_id: "wf-1".to_string(),
            agent_id: "agent-a".to_string(),
            agent_version: "1.0.0".to_string(),
            raw: RawMetrics {
                latency_ms: Some(500.0),
                faithfulness: Some(faithfulness),
                hallucination_flag: Some(hallucination),
                coverage: Some(0.8),
                confidence: Some(0.9),
            },
            latency_norm: Some(0.5),
            faithfulness_norm: Some(faithfulness),
            coverage_norm: Some(0.8),
            confidence_norm: Some(0.9),
            hallucination_norm: Some(if hallucination { 0.0 } else { 1.0 }),
            run_quality_score: Some(0.8),
            risk_score: Some(0.1),
            evaluator_version: "v1".to_string(),
            normalization_version: "v1".to_string(),
            weighting_version: "v1".to_string(),
            scoring_timestamp: ts,
            anomaly_flag: false,
        }
    }

    #[tokio::test]
    async fn hallucination_flag_short_circuits_to_rule_anomaly() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store.seed_evaluation(record(0.9, false, now - Duration::minutes(i)));
        }
        store.seed_evaluation(record(0.9, true, now + Duration::minutes(1)));

        let created = run_anomaly_job(&store, "acme", now - Duration::hours(1), 3).await.unwrap();
        assert_eq!(created, 1);
        assert_eq!(store.action_count(), 0); // anomalies aren't actions
    }

    #[tokio::test]
    async fn insufficient_history_skips_group() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.seed_evaluation(record(0.9, false, now));
        let created = run_anomaly_job(&store, "acme", now - Duration::hours(1), 5).await.unwrap();
        assert_eq!(created, 0);
    }
}
