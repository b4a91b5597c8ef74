//! Agent evaluation telemetry pipeline: ingest, materialization, and the
//! statistical analysis jobs that turn raw run events into evaluation
//! scores, anomalies, significance findings, drift alerts, SLO violations,
//! recommended actions, and backtests.

pub mod api;
pub mod domain;
pub mod ingest;
pub mod jobs;
pub mod materialize;
pub mod middleware;
pub mod stats;
pub mod store;
