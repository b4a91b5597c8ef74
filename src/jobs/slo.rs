//! SLO job (C10): materializes rollups, then evaluates each row against a
//! per-workflow SLO configuration. Grounded on `route_quality/mitigation.rs`'s
//! threshold-breach-to-action pattern.

use chrono::{Duration, Utc};
use std::collections::HashMap;

use crate::domain::entities::MetricRollupHourly;
use crate::materialize::rollup::build_rollups;
use crate::store::Store;

#[derive(Debug, Clone, Default)]
pub struct SloConfig {
    pub max_latency_p95_ms: Option<f64>,
    pub min_faithfulness_p05: Option<f64>,
    pub min_quality_p05: Option<f64>,
    pub max_anomaly_rate: Option<f64>,
}

pub struct SloRegistry {
    default: SloConfig,
    overrides: HashMap<String, SloConfig>,
}

impl SloRegistry {
    pub fn new(default: SloConfig) -> Self {
        Self { default, overrides: HashMap::new() }
    }

    pub fn with_workflow_override(mut self, workflow_id: impl Into<String>, cfg: SloConfig) -> Self {
        self.overrides.insert(workflow_id.into(), cfg);
        self
    }

    pub fn resolve(&self, workflow_id: &str) -> &SloConfig {
        self.overrides.get(workflow_id).unwrap_or(&self.default)
    }
}

/// Runs the rollup builder, then evaluates every fresh rollup row against
/// its workflow's SLO, routing breaches through C11.
pub async fn run_slo_job(
    store: &dyn Store,
    tenant: &str,
    lookback_hours: i64,
    registry: &SloRegistry,
) -> anyhow::Result<usize> {
    let since = Utc::now() - Duration::hours(lookback_hours);
    build_rollups(store, tenant, since).await?;

    let rollups = store.rollups_since(tenant, since).await?;
    let mut violations = 0;

    for rollup in &rollups {
        let cfg = registry.resolve(&rollup.workflow_id);
        for kind in evaluate(rollup, cfg) {
            propose_investigation(store, tenant, rollup, &kind).await?;
            violations += 1;
        }
    }

    Ok(violations)
}

fn evaluate(rollup: &MetricRollupHourly, cfg: &SloConfig) -> Vec<&'static str> {
    let mut violations = Vec::new();
    let stats = &rollup.stats;

    if let (Some(max_latency), Some(p95)) = (cfg.max_latency_p95_ms, stats.p95_latency_ms) {
        if p95 > max_latency {
            violations.push("latency_p95_breach");
        }
    }
    if let (Some(min_faithfulness), Some(p05)) = (cfg.min_faithfulness_p05, stats.p05_faithfulness) {
        if p05 < min_faithfulness {
            violations.push("faithfulness_p05_breach");
        }
    }
    if let (Some(min_quality), Some(p05)) = (cfg.min_quality_p05, stats.p05_quality) {
        if p05 < min_quality {
            violations.push("quality_p05_breach");
        }
    }
    if let Some(max_rate) = cfg.max_anomaly_rate {
        if stats.count > 0 {
            let rate = stats.anomaly_count as f64 / stats.count as f64;
            if rate > max_rate {
                violations.push("anomaly_rate_breach");
            }
        }
    }

    violations
}

async fn propose_investigation(
    store: &dyn Store,
    tenant: &str,
    rollup: &MetricRollupHourly,
    violation_kind: &str,
) -> anyhow::Result<()> {
    let target = serde_json::json!({
        "workflow_id": rollup.workflow_id,
        "agent_id": rollup.agent_id,
        "agent_version": rollup.agent_version,
        "hour_bucket": rollup.hour_bucket,
        "violation_kind": violation_kind,
    });

    crate::jobs::actions::propose_action(
        store,
        tenant,
        "run_investigation",
        target,
        serde_json::json!({ "violation_kind": violation_kind }),
        "slo_job",
    )
    .await
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::RollupStats;

    fn rollup(p95_latency: Option<f64>) -> MetricRollupHourly {
        MetricRollupHourly {
            tenant: "acme".to_string(),
            workflow_id: "wf-1".to_string(),
            agent_id: "agent-a".to_string(),
            agent_version: "1.0.0".to_string(),
            hour_bucket: Utc::now(),
            stats: RollupStats { p95_latency_ms: p95_latency, count: 10, ..Default::default() },
        }
    }

    #[test]
    fn flags_latency_breach_when_configured() {
        let cfg = SloConfig { max_latency_p95_ms: Some(1000.0), ..Default::default() };
        let violations = evaluate(&rollup(Some(1500.0)), &cfg);
        assert_eq!(violations, vec!["latency_p95_breach"]);
    }

    #[test]
    fn no_violations_when_no_thresholds_configured() {
        let cfg = SloConfig::default();
        let violations = evaluate(&rollup(Some(1500.0)), &cfg);
        assert!(violations.is_empty());
    }
}
