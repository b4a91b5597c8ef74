//! Drift job (C9): population stability index + 1D Wasserstein distance
//! between a baseline and current faithfulness population, per active
//! group, routed into recommended actions through C11.

use chrono::{Duration, Utc};

use crate::stats::drift::{population_stability_index, wasserstein_1d, DriftSeverity};
use crate::store::Store;

const PSI_BINS: usize = 10;
const MIN_BASELINE: usize = 20;
const MIN_CURRENT: usize = 10;

pub struct DriftFinding {
    pub workflow_id: String,
    pub agent_id: String,
    pub agent_version: String,
    pub psi: f64,
    pub wasserstein: f64,
    pub severity: DriftSeverity,
}

/// Evaluates drift for every active group over a baseline window
/// `[now-(baseline_hours+current_hours)h, now-current_hours h)` versus a
/// current window `[now-current_hours h, now)`, and routes findings into
/// recommended actions.
pub async fn run_drift_job(
    store: &dyn Store,
    tenant: &str,
    baseline_hours: i64,
    current_hours: i64,
) -> anyhow::Result<Vec<DriftFinding>> {
    let now = Utc::now();
    let current_start = now - Duration::hours(current_hours);
    let baseline_start = now - Duration::hours(baseline_hours + current_hours);

    let groups = store.active_groups(tenant, baseline_start).await?;
    let mut findings = Vec::new();

    for (workflow_id, agent_id, agent_version) in groups {
        let base_vals = store
            .metric_values_in_window(
                tenant,
                &workflow_id,
                &agent_id,
                &agent_version,
                "faithfulness",
                baseline_start,
                current_start,
            )
            .await?;
        let cur_vals = store
            .metric_values_in_window(
                tenant,
                &workflow_id,
                &agent_id,
                &agent_version,
                "faithfulness",
                current_start,
                now,
            )
            .await?;

        if base_vals.len() < MIN_BASELINE || cur_vals.len() < MIN_CURRENT {
            continue;
        }

        let psi = population_stability_index(&base_vals, &cur_vals, PSI_BINS);
        let wasserstein = wasserstein_1d(&base_vals, &cur_vals);
        let severity = DriftSeverity::from_psi(psi);

        if !matches!(severity, DriftSeverity::None) {
            propose_drift_actions(store, tenant, &workflow_id, &agent_id, &agent_version, severity).await?;
        }

        findings.push(DriftFinding { workflow_id, agent_id, agent_version, psi, wasserstein, severity });
    }

    Ok(findings)
}

async fn propose_drift_actions(
    store: &dyn Store,
    tenant: &str,
    workflow_id: &str,
    agent_id: &str,
    agent_version: &str,
    severity: DriftSeverity,
) -> anyhow::Result<()> {
    let target = serde_json::json!({
        "workflow_id": workflow_id,
        "agent_id": agent_id,
        "agent_version": agent_version,
    });

    let rate = match severity {
        DriftSeverity::Moderate => 0.05,
        DriftSeverity::Severe => 0.2,
        DriftSeverity::None => return Ok(()),
    };

    crate::jobs::actions::propose_action(
        store,
        tenant,
        "increase_eval_sampling",
        target.clone(),
        serde_json::json!({ "sampling_rate_suggested": rate }),
        "drift_job",
    )
    .await?;

    if matches!(severity, DriftSeverity::Severe) {
        crate::jobs::actions::propose_action(
            store,
            tenant,
            "require_human_review",
            target.clone(),
            serde_json::json!({ "reason": "severe_metric_drift" }),
            "drift_job",
        )
        .await?;
        crate::jobs::actions::propose_action(
            store,
            tenant,
            "route_fallback",
            target,
            serde_json::json!({ "reason": "severe_metric_drift" }),
            "drift_job",
        )
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn identical_distributions_yield_no_findings_without_history() {
        let store = MemoryStore::new();
        let findings = run_drift_job(&store, "acme", 48, 24).await.unwrap();
        assert!(findings.is_empty());
    }
}
