//! Per-workflow metric normalization and weighted quality/risk scoring.
//!
//! Generalized from `models::Signal`'s builder style and `Config`'s
//! shallow-merge-of-defaults idiom: a `WorkflowNormalizationConfig` overrides
//! a global default field by field rather than wholesale.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::entities::RawMetrics;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityWeights {
    pub faithfulness: f64,
    pub coverage: f64,
    pub confidence: f64,
    pub hallucination: f64,
    pub latency: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            faithfulness: 0.35,
            coverage: 0.2,
            confidence: 0.15,
            hallucination: 0.2,
            latency: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizationConfig {
    pub latency_p99_target_ms: f64,
    pub quality_weights: QualityWeights,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            latency_p99_target_ms: 5000.0,
            quality_weights: QualityWeights::default(),
        }
    }
}

/// Registry of per-workflow overrides layered onto a single global default.
#[derive(Debug, Clone, Default)]
pub struct NormalizationRegistry {
    default: NormalizationConfig,
    overrides: HashMap<String, NormalizationConfig>,
}

impl NormalizationRegistry {
    pub fn new(default: NormalizationConfig) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_workflow_override(mut self, workflow_id: impl Into<String>, cfg: NormalizationConfig) -> Self {
        self.overrides.insert(workflow_id.into(), cfg);
        self
    }

    pub fn resolve(&self, workflow_id: &str) -> &NormalizationConfig {
        self.overrides.get(workflow_id).unwrap_or(&self.default)
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedMetrics {
    pub latency_norm: Option<f64>,
    pub faithfulness_norm: Option<f64>,
    pub coverage_norm: Option<f64>,
    pub confidence_norm: Option<f64>,
    pub hallucination_norm: Option<f64>,
    pub run_quality_score: Option<f64>,
    pub risk_score: Option<f64>,
}

/// Normalize raw metrics and compute the weighted quality/risk scores under
/// the given config. Components that are missing in `raw` are excluded from
/// `run_quality_score`'s weighted average; the remaining weights are
/// re-normalized to sum to 1. Returns `run_quality_score = None` only when
/// every component is missing.
pub fn normalize_and_score(raw: &RawMetrics, cfg: &NormalizationConfig) -> NormalizedMetrics {
    let latency_norm = raw.latency_ms.map(|ms| {
        let target = cfg.latency_p99_target_ms.max(1.0);
        clamp01(1.0 - ms.max(0.0).ln_1p() / target.ln_1p())
    });
    let faithfulness_norm = raw.faithfulness.map(clamp01);
    let coverage_norm = raw.coverage.map(clamp01);
    let confidence_norm = raw.confidence.map(clamp01);
    let hallucination_norm = raw.hallucination_flag.map(|flag| if flag { 0.0 } else { 1.0 });

    let w = &cfg.quality_weights;
    let components: [(Option<f64>, f64); 5] = [
        (faithfulness_norm, w.faithfulness),
        (coverage_norm, w.coverage),
        (confidence_norm, w.confidence),
        (hallucination_norm, w.hallucination),
        (latency_norm, w.latency),
    ];

    let present_weight: f64 = components
        .iter()
        .filter_map(|(v, weight)| v.map(|_| *weight))
        .sum();

    let run_quality_score = if present_weight > 0.0 {
        let weighted: f64 = components
            .iter()
            .filter_map(|(v, weight)| v.map(|value| value * weight))
            .sum();
        Some(clamp01(weighted / present_weight))
    } else {
        None
    };

    let risk_score = Some(clamp01(
        1.0 - faithfulness_norm.unwrap_or(1.0) * hallucination_norm.unwrap_or(1.0),
    ));

    NormalizedMetrics {
        latency_norm,
        faithfulness_norm,
        coverage_norm,
        confidence_norm,
        hallucination_norm,
        run_quality_score,
        risk_score,
    }
}

/// Empirical-Bayes shrinkage toward a prior, used for small-sample
/// orchestration-level aggregates: `alpha = n/(n+k)`.
pub fn shrink_toward_prior(observed_mean: f64, n: usize, prior: f64, k: f64) -> f64 {
    let alpha = n as f64 / (n as f64 + k);
    alpha * observed_mean + (1.0 - alpha) * prior
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_metrics_present_gives_score_in_unit_interval() {
        let raw = RawMetrics {
            latency_ms: Some(1200.0),
            faithfulness: Some(0.9),
            hallucination_flag: Some(false),
            coverage: Some(0.8),
            confidence: Some(0.95),
        };
        let out = normalize_and_score(&raw, &NormalizationConfig::default());
        let score = out.run_quality_score.unwrap();
        assert!((0.0..=1.0).contains(&score));
        assert!(out.latency_norm.unwrap() > 0.0 && out.latency_norm.unwrap() <= 1.0);
    }

    #[test]
    fn missing_metrics_yield_none_score_only_when_all_absent() {
        let raw = RawMetrics {
            latency_ms: None,
            faithfulness: None,
            hallucination_flag: None,
            coverage: None,
            confidence: None,
        };
        let out = normalize_and_score(&raw, &NormalizationConfig::default());
        assert!(out.run_quality_score.is_none());
    }

    #[test]
    fn partial_metrics_renormalize_weights() {
        let raw = RawMetrics {
            latency_ms: None,
            faithfulness: Some(1.0),
            hallucination_flag: None,
            coverage: None,
            confidence: None,
        };
        let out = normalize_and_score(&raw, &NormalizationConfig::default());
        assert_eq!(out.run_quality_score, Some(1.0));
    }

    #[test]
    fn hallucination_flag_drives_risk_score_up() {
        let raw = RawMetrics {
            latency_ms: None,
            faithfulness: Some(1.0),
            hallucination_flag: Some(true),
            coverage: None,
            confidence: None,
        };
        let out = normalize_and_score(&raw, &NormalizationConfig::default());
        assert_eq!(out.hallucination_norm, Some(0.0));
        assert_eq!(out.risk_score, Some(1.0));
    }

    #[test]
    fn negative_latency_is_clamped_before_log() {
        let raw = RawMetrics {
            latency_ms: Some(-50.0),
            faithfulness: None,
            hallucination_flag: None,
            coverage: None,
            confidence: None,
        };
        let out = normalize_and_score(&raw, &NormalizationConfig::default());
        assert_eq!(out.latency_norm, Some(1.0));
    }

    #[test]
    fn registry_falls_back_to_default_for_unknown_workflow() {
        let registry = NormalizationRegistry::new(NormalizationConfig::default());
        let resolved = registry.resolve("nonexistent");
        assert_eq!(resolved.latency_p99_target_ms, 5000.0);
    }

    #[test]
    fn registry_prefers_workflow_override() {
        let mut override_cfg = NormalizationConfig::default();
        override_cfg.latency_p99_target_ms = 2000.0;
        let registry = NormalizationRegistry::new(NormalizationConfig::default())
            .with_workflow_override("wf-1", override_cfg);
        assert_eq!(registry.resolve("wf-1").latency_p99_target_ms, 2000.0);
        assert_eq!(registry.resolve("wf-2").latency_p99_target_ms, 5000.0);
    }

    #[test]
    fn shrinkage_moves_toward_prior_with_small_n() {
        let shrunk_small_n = shrink_toward_prior(1.0, 1, 0.5, 50.0);
        let shrunk_large_n = shrink_toward_prior(1.0, 1000, 0.5, 50.0);
        assert!(shrunk_small_n < shrunk_large_n);
    }
}
