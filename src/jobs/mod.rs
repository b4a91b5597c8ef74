//! Scheduled analysis jobs: anomaly detection, significance testing, drift
//! detection, SLO evaluation, action generation, and the backtest runner.
//! Grounded on the teacher's `route_quality/` mitigation+baseline modules
//! and `backtest.rs`'s engine, generalized from market-making telemetry to
//! agent evaluation telemetry.

pub mod actions;
pub mod anomaly;
pub mod backtest;
pub mod drift;
pub mod significance;
pub mod slo;
