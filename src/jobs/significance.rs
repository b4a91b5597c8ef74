//! Significance job (C8): window-over-window Welch tests with BH
//! correction, plus an EWMA/CUSUM change-point detector over hourly
//! quality series. Grounded on `signals/quality.rs`'s rolling-stats idiom
//! and `route_quality/mitigation.rs`'s threshold-to-action mapping.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::entities::PerformanceShift;
use crate::stats::bh::benjamini_hochberg;
use crate::stats::timeseries::{cusum, ewma};
use crate::stats::ttest::welch_t_test;
use crate::store::Store;

const EWMA_LAMBDA: f64 = 0.3;
const EWMA_SHIFT_THRESHOLD: f64 = 0.15;
const CUSUM_K: f64 = 0.02;
const CUSUM_H: f64 = 0.2;
const MIN_ROLLUP_POINTS: usize = 12;
const MIN_ROLLUP_HOURS: i64 = 24;

struct WindowCandidate {
    workflow_id: String,
    agent_id: String,
    agent_version: String,
    a_values: Vec<f64>,
    b_values: Vec<f64>,
}

/// Detector A: two-window Welch comparison with BH correction applied
/// across every active group at once. Returns the number of shift rows
/// written.
pub async fn run_window_comparison(
    store: &dyn Store,
    tenant: &str,
    metric: &str,
    window_hours: i64,
    alpha: f64,
) -> anyhow::Result<usize> {
    let now = Utc::now();
    let a_start = now - Duration::hours(window_hours);
    let b_start = now - Duration::hours(2 * window_hours);

    let groups = store.active_groups(tenant, b_start).await?;
    let mut candidates = Vec::new();

    for (workflow_id, agent_id, agent_version) in groups {
        let a_values = store
            .metric_values_in_window(tenant, &workflow_id, &agent_id, &agent_version, metric, a_start, now)
            .await?;
        let b_values = store
            .metric_values_in_window(tenant, &workflow_id, &agent_id, &agent_version, metric, b_start, a_start)
            .await?;
        if a_values.len() >= 2 && b_values.len() >= 2 {
            candidates.push(WindowCandidate { workflow_id, agent_id, agent_version, a_values, b_values });
        }
    }

    if candidates.is_empty() {
        return Ok(0);
    }

    let results: Vec<_> = candidates
        .iter()
        .filter_map(|c| welch_t_test(&c.a_values, &c.b_values).map(|r| (c, r)))
        .collect();

    let p_values: Vec<f64> = results.iter().map(|(_, r)| r.p_value).collect();
    let bh = benjamini_hochberg(&p_values, alpha);

    let mut written = 0;
    for ((candidate, welch), bh_result) in results.iter().zip(bh.iter()) {
        let shift = PerformanceShift {
            tenant: tenant.to_string(),
            shift_id: Uuid::new_v4(),
            workflow_id: candidate.workflow_id.clone(),
            agent_id: candidate.agent_id.clone(),
            agent_version: candidate.agent_version.clone(),
            metric: metric.to_string(),
            method: "welch_normal_approx".to_string(),
            window_a_start: a_start,
            window_a_end: now,
            window_b_start: b_start,
            window_b_end: a_start,
            p_value: welch.p_value,
            bh_adjusted_p_value: bh_result.q_value,
            effect_size: welch.effect_size,
            significant: bh_result.significant,
            details: serde_json::json!({
                "mean_a": welch.mean_a,
                "mean_b": welch.mean_b,
                "df": welch.df,
                "t_stat": welch.t_stat,
                "n_a": welch.n_a,
                "n_b": welch.n_b,
            }),
            created_at: Utc::now(),
        };
        store.insert_performance_shift(shift).await?;
        written += 1;
    }

    Ok(written)
}

/// Detector B: EWMA + CUSUM change-point detection over each group's
/// hourly `mean_quality` series.
pub async fn run_changepoint_detection(
    store: &dyn Store,
    tenant: &str,
) -> anyhow::Result<usize> {
    let since = Utc::now() - Duration::hours(MIN_ROLLUP_HOURS);
    let groups = store.active_groups(tenant, since).await?;
    let mut written = 0;

    for (workflow_id, agent_id, agent_version) in groups {
        let series = store
            .hourly_quality_series(tenant, &workflow_id, &agent_id, &agent_version, since)
            .await?;
        if series.len() < MIN_ROLLUP_POINTS {
            continue;
        }

        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        let baseline_n = values.len().min(6);
        let baseline = values[..baseline_n].iter().sum::<f64>() / baseline_n as f64;

        let ewma_series = ewma(&values, EWMA_LAMBDA);
        let ewma_last = *ewma_series.last().expect("non-empty series");
        let ewma_fires = (ewma_last - baseline).abs() > EWMA_SHIFT_THRESHOLD;

        let cusum_series = cusum(&values, baseline, CUSUM_K, CUSUM_H);
        let cusum_fires = cusum_series.last().map(|p| p.signal).unwrap_or(false);

        if ewma_fires {
            written += write_changepoint_shift(
                store,
                tenant,
                &workflow_id,
                &agent_id,
                &agent_version,
                "ewma",
                baseline,
                ewma_last,
                series.last().map(|(t, _)| *t).unwrap_or_else(Utc::now),
            )
            .await?;
        }
        if cusum_fires {
            written += write_changepoint_shift(
                store,
                tenant,
                &workflow_id,
                &agent_id,
                &agent_version,
                "cusum",
                baseline,
                values.last().copied().unwrap_or(0.0),
                series.last().map(|(t, _)| *t).unwrap_or_else(Utc::now),
            )
            .await?;
        }
    }

    Ok(written)
}

#[allow(clippy::too_many_arguments)]
async fn write_changepoint_shift(
    store: &dyn Store,
    tenant: &str,
    workflow_id: &str,
    agent_id: &str,
    agent_version: &str,
    method: &str,
    baseline: f64,
    last_value: f64,
    last_bucket: DateTime<Utc>,
) -> anyhow::Result<usize> {
    store
        .insert_performance_shift(PerformanceShift {
            tenant: tenant.to_string(),
            shift_id: Uuid::new_v4(),
            workflow_id: workflow_id.to_string(),
            agent_id: agent_id.to_string(),
            agent_version: agent_version.to_string(),
            metric: "mean_quality".to_string(),
            method: method.to_string(),
            window_a_start: last_bucket,
            window_a_end: last_bucket,
            window_b_start: last_bucket,
            window_b_end: last_bucket,
            p_value: 0.0,
            bh_adjusted_p_value: 0.0,
            effect_size: last_value - baseline,
            significant: true,
            details: serde_json::json!({ "baseline": baseline, "last_value": last_value }),
            created_at: Utc::now(),
        })
        .await?;
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn window_comparison_with_no_groups_writes_nothing() {
        let store = MemoryStore::new();
        let written = run_window_comparison(&store, "acme", "faithfulness", 24, 0.05).await.unwrap();
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn changepoint_detection_with_short_series_is_skipped() {
        let store = MemoryStore::new();
        let written = run_changepoint_detection(&store, "acme").await.unwrap();
        assert_eq!(written, 0);
    }
}
