//! Hourly rollup builder (C6): turns EvaluationRecord rows into per-hour,
//! per-(workflow, agent, version) statistics. Grounded on the teacher's
//! `route_quality/baseline.rs` percentile helpers, generalized from a single
//! rolling window to a bucketed group-by-hour aggregation.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};

use crate::domain::entities::{EvaluationRecord, MetricRollupHourly, RollupStats};
use crate::stats::quantile::quantile;
use crate::stats::corr::sample_stddev;
use crate::store::Store;

fn hour_bucket(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), t.hour(), 0, 0)
        .single()
        .expect("valid calendar hour")
}

use chrono::Datelike;

/// Recomputes hourly rollups for every `(workflow, agent, version, hour)`
/// group touched by evaluation records in `[since, now)`, upserting each
/// into the store. Returns the number of rollup rows written.
pub async fn build_rollups(
    store: &dyn Store,
    tenant: &str,
    since: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let groups = store.active_groups(tenant, since).await?;
    let mut written = 0;

    for (workflow_id, agent_id, agent_version) in groups {
        let records = store
            .recent_evaluations(tenant, &workflow_id, &agent_id, &agent_version, 100_000)
            .await?;

        let mut by_hour: std::collections::HashMap<DateTime<Utc>, Vec<EvaluationRecord>> =
            std::collections::HashMap::new();
        for r in records {
            if r.scoring_timestamp < since {
                continue;
            }
            by_hour.entry(hour_bucket(r.scoring_timestamp)).or_default().push(r);
        }

        for (bucket, rows) in by_hour {
            let stats = compute_stats(&rows);
            store
                .upsert_rollup(MetricRollupHourly {
                    tenant: tenant.to_string(),
                    workflow_id: workflow_id.clone(),
                    agent_id: agent_id.clone(),
                    agent_version: agent_version.clone(),
                    hour_bucket: bucket,
                    stats,
                })
                .await?;
            written += 1;
        }
    }

    Ok(written)
}

fn compute_stats(rows: &[EvaluationRecord]) -> RollupStats {
    let faithfulness: Vec<f64> = rows.iter().filter_map(|r| r.raw.faithfulness).collect();
    let quality: Vec<f64> = rows.iter().filter_map(|r| r.run_quality_score).collect();
    let latency: Vec<f64> = rows.iter().filter_map(|r| r.raw.latency_ms).collect();
    let anomaly_count = rows.iter().filter(|r| r.anomaly_flag).count() as i64;

    RollupStats {
        count: rows.len() as i64,
        mean_faithfulness: mean(&faithfulness),
        stddev_faithfulness: non_zero(sample_stddev(&faithfulness)),
        mean_quality: mean(&quality),
        stddev_quality: non_zero(sample_stddev(&quality)),
        p05_faithfulness: pct(&faithfulness, 0.05),
        p10_faithfulness: pct(&faithfulness, 0.10),
        p50_faithfulness: pct(&faithfulness, 0.50),
        p95_faithfulness: pct(&faithfulness, 0.95),
        p05_quality: pct(&quality, 0.05),
        p10_quality: pct(&quality, 0.10),
        p50_quality: pct(&quality, 0.50),
        p95_quality: pct(&quality, 0.95),
        p95_latency_ms: pct(&latency, 0.95),
        anomaly_count,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn non_zero(v: f64) -> Option<f64> {
    if v == 0.0 {
        None
    } else {
        Some(v)
    }
}

fn pct(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(quantile(values, q))
    }
}

pub fn default_lookback(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::RawMetrics;
    use crate::store::memory::MemoryStore;
    use uuid::Uuid;

    fn record(tenant: &str, faithfulness: f64, quality: f64, ts: DateTime<Utc>) -> EvaluationRecord {
        EvaluationRecord {
            tenant: tenant.to_string(),
            evaluation_id: Uuid::new_v4(),
            agent_run_id: Uuid::new_v4(),
            workflow_id: "wf-1".to_string(),
            agent_id: "agent-a".to_string(),
            agent_version: "1.0.0".to_string(),
            raw: RawMetrics {
                latency_ms: Some(500.0),
                faithfulness: Some(faithfulness),
                hallucination_flag: Some(false),
                coverage: Some(0.8),
                confidence: Some(0.9),
            },
            latency_norm: Some(0.5),
            faithfulness_norm: Some(faithfulness),
            coverage_norm: Some(0.8),
            confidence_norm: Some(0.9),
            hallucination_norm: Some(1.0),
            run_quality_score: Some(quality),
            risk_score: Some(0.1),
            evaluator_version: "v1".to_string(),
            normalization_version: "v1".to_string(),
            weighting_version: "v1".to_string(),
            scoring_timestamp: ts,
            anomaly_flag: false,
        }
    }

    #[tokio::test]
    async fn builds_one_rollup_row_per_hour_bucket() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.seed_evaluation(record("acme", 0.9, 0.85, now));
        store.seed_evaluation(record("acme", 0.8, 0.75, now));

        let written = build_rollups(&store, "acme", now - Duration::hours(1)).await.unwrap();
        assert_eq!(written, 1);
    }

    #[test]
    fn stats_compute_expected_count_and_mean() {
        let rows = vec![record("acme", 0.9, 0.8, Utc::now()), record("acme", 0.7, 0.6, Utc::now())];
        let stats = compute_stats(&rows);
        assert_eq!(stats.count, 2);
        assert!((stats.mean_faithfulness.unwrap() - 0.8).abs() < 1e-9);
    }
}
