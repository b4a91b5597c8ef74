//! Backtest runner (C12): joins signals with point-in-time market outcomes
//! and computes portfolio-level IC, Sharpe, and hit-rate. Grounded on
//! `backtest.rs`'s `BacktestEngine`/`TrainingStats` (Sharpe, IC) and
//! `models.rs`'s horizon-string parsing, generalized from a single-symbol
//! P&L simulation to a cross-sectional portfolio backtest.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::entities::{BacktestRun, BacktestStatus, SignalOutcome, SignalValue};
use crate::stats::corr::{pearson, sample_stddev, sharpe as sharpe_ratio, t_stat_of_mean};
use crate::store::Store;

pub struct BacktestParams {
    pub tenant: String,
    pub dataset_version: String,
    pub horizon: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cost_bps: f64,
    pub code_version: String,
}

/// Parses a horizon string like `"2w"` into a millisecond duration. Accepted
/// units: d (day), w (week = 7d), m (month = 30d), y (year = 365d).
pub fn parse_horizon_ms(horizon: &str) -> Option<i64> {
    let trimmed = horizon.trim();
    let digits_end = trimmed.find(|c: char| !c.is_ascii_digit())?;
    let (num, rest) = trimmed.split_at(digits_end);
    let n: i64 = num.parse().ok()?;
    let unit = rest.trim();
    let day_ms: i64 = 86_400_000;
    let ms = match unit {
        "d" => day_ms,
        "w" => 7 * day_ms,
        "m" => 30 * day_ms,
        "y" => 365 * day_ms,
        _ => return None,
    };
    Some(n * ms)
}

struct PricedSignal {
    signal_id: Uuid,
    raw_score: f64,
    net_return: f64,
    benchmark_return: f64,
    excess_return: f64,
}

/// Runs a backtest: for every Signal in `[params.start, params.end)` with
/// the requested horizon, builds portfolio weights from the signal value,
/// matches point-in-time market outcomes, and accumulates summary
/// statistics. Writes one SignalOutcome per priced signal and one
/// BacktestRun with the aggregate summary.
pub async fn run_backtest(store: &dyn Store, params: BacktestParams) -> anyhow::Result<BacktestRun> {
    let backtest_id = Uuid::new_v4();
    let horizon_ms = match parse_horizon_ms(&params.horizon) {
        Some(ms) => ms,
        None => {
            let run = BacktestRun {
                tenant: params.tenant.clone(),
                backtest_id,
                dataset_version: params.dataset_version.clone(),
                horizon: params.horizon.clone(),
                code_version: params.code_version.clone(),
                status: BacktestStatus::Failed,
                summary: serde_json::json!({ "error": "unparseable horizon" }),
                created_at: Utc::now(),
            };
            store.insert_backtest_run(run.clone()).await?;
            return Ok(run);
        }
    };

    let signals = store
        .signals_in_range(&params.tenant, &params.horizon, params.start, params.end)
        .await?;

    let mut priced = Vec::new();

    for signal in &signals {
        let weights = match portfolio_weights(&signal.signal_value, &signal.instrument_universe) {
            Some(w) if w.len() >= 2 => w,
            _ => continue,
        };

        let target_time = signal.event_time + Duration::milliseconds(horizon_ms);
        let instrument_ids: Vec<String> = weights.iter().map(|(id, _, _)| id.clone()).collect();
        let outcomes = store
            .market_outcomes_for(&params.tenant, &params.dataset_version, target_time, &instrument_ids)
            .await?;

        if outcomes.is_empty() {
            continue;
        }

        let mut portfolio_return = 0.0;
        let mut benchmark_returns = Vec::new();
        let mut matched_weight = 0.0;
        let mut matched_score = 0.0;

        for (id, weight, raw_score) in &weights {
            if let Some(outcome) = outcomes.iter().find(|o| &o.instrument_id == id) {
                portfolio_return += weight * outcome.realized_return;
                if let Some(b) = outcome.benchmark_return {
                    benchmark_returns.push(b);
                }
                matched_weight += weight;
                matched_score += weight * raw_score;
            }
        }

        if matched_weight == 0.0 {
            continue;
        }

        let benchmark_return = if benchmark_returns.is_empty() {
            0.0
        } else {
            benchmark_returns.iter().sum::<f64>() / benchmark_returns.len() as f64
        };

        let net_return = portfolio_return - params.cost_bps / 10_000.0;
        let excess_return = net_return - benchmark_return;

        store
            .insert_signal_outcome(SignalOutcome {
                tenant: params.tenant.clone(),
                signal_id: signal.signal_id,
                horizon: params.horizon.clone(),
                backtest_id,
                realized_return: net_return,
                benchmark_return,
                excess_return,
                details: serde_json::json!({ "matched_weight": matched_weight }),
            })
            .await?;

        priced.push(PricedSignal {
            signal_id: signal.signal_id,
            raw_score: matched_score / matched_weight,
            net_return,
            benchmark_return,
            excess_return,
        });
    }

    let summary = summarize(&priced);
    let status = BacktestStatus::Completed;

    let run = BacktestRun {
        tenant: params.tenant,
        backtest_id,
        dataset_version: params.dataset_version,
        horizon: params.horizon,
        code_version: params.code_version,
        status,
        summary,
        created_at: Utc::now(),
    };
    store.insert_backtest_run(run.clone()).await?;
    Ok(run)
}

/// Converts a signal's value variant and instrument universe into
/// `(instrument_id, portfolio_weight, raw_score)` triples, L1-normalized.
fn portfolio_weights(
    value: &SignalValue,
    universe: &[crate::domain::entities::InstrumentWeight],
) -> Option<Vec<(String, f64, f64)>> {
    let raw: Vec<(String, f64)> = match value {
        SignalValue::Text { .. } => return None,
        SignalValue::Scalar { value } => {
            universe.iter().map(|u| (u.id.clone(), value * u.weight.unwrap_or(1.0))).collect()
        }
        SignalValue::Vector { values } => universe
            .iter()
            .filter_map(|u| values.get(&u.id).map(|v| (u.id.clone(), v * u.weight.unwrap_or(1.0))))
            .collect(),
    };

    let l1: f64 = raw.iter().map(|(_, v)| v.abs()).sum();
    if l1 == 0.0 {
        return None;
    }

    Some(raw.into_iter().map(|(id, v)| (id.clone(), v / l1, v)).collect())
}

fn summarize(priced: &[PricedSignal]) -> serde_json::Value {
    if priced.is_empty() {
        return serde_json::json!({
            "signal_count": 0,
            "instrument_observations": 0,
        });
    }

    let net_returns: Vec<f64> = priced.iter().map(|p| p.net_return).collect();
    let excess_returns: Vec<f64> = priced.iter().map(|p| p.excess_return).collect();
    let raw_scores: Vec<f64> = priced.iter().map(|p| p.raw_score).collect();

    let mean_net = net_returns.iter().sum::<f64>() / net_returns.len() as f64;
    let mean_excess = excess_returns.iter().sum::<f64>() / excess_returns.len() as f64;
    let ic = pearson(&raw_scores, &net_returns);
    let hit_rate = net_returns.iter().filter(|r| **r > 0.0).count() as f64 / net_returns.len() as f64;

    serde_json::json!({
        "signal_count": priced.len(),
        "instrument_observations": priced.len(),
        "mean_net_return": mean_net,
        "stddev_net_return": sample_stddev(&net_returns),
        "sharpe_net": sharpe_ratio(&net_returns, 252.0),
        "mean_excess_return": mean_excess,
        "sharpe_excess": sharpe_ratio(&excess_returns, 252.0),
        "mean_ic": ic,
        "ic_t_stat": t_stat_of_mean(&raw_scores),
        "hit_rate": hit_rate,
        "signal_ids": priced.iter().map(|p| p.signal_id).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_week_horizon() {
        assert_eq!(parse_horizon_ms("2w"), Some(2 * 7 * 86_400_000));
    }

    #[test]
    fn parses_day_horizon_with_whitespace() {
        assert_eq!(parse_horizon_ms("5 d"), Some(5 * 86_400_000));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert_eq!(parse_horizon_ms("3x"), None);
    }

    #[test]
    fn scalar_signal_spreads_weight_across_universe() {
        use crate::domain::entities::InstrumentWeight;
        let universe = vec![
            InstrumentWeight { id: "AAPL".to_string(), weight: Some(1.0) },
            InstrumentWeight { id: "MSFT".to_string(), weight: Some(1.0) },
        ];
        let weights = portfolio_weights(&SignalValue::Scalar { value: 0.5 }, &universe).unwrap();
        assert_eq!(weights.len(), 2);
        assert!((weights[0].1 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn text_signal_has_no_weights() {
        let universe = vec![];
        assert!(portfolio_weights(&SignalValue::Text { value: "note".to_string() }, &universe).is_none());
    }
}
