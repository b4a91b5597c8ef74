//! Scheduled job runner binary: a single CLI entry point selecting which
//! analysis job to run against the Postgres store, one process invocation
//! per job. Grounded on the teacher's `perf_monitor`/`backtest_run` bins,
//! which took their run parameters as `clap` arguments rather than a long-
//! lived config file.

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};

use agent_eval_pipeline::domain::error::PipelineError;
use agent_eval_pipeline::domain::{Config, JobConfig};
use agent_eval_pipeline::jobs::backtest::{run_backtest, BacktestParams};
use agent_eval_pipeline::jobs::slo::{SloConfig, SloRegistry};
use agent_eval_pipeline::jobs::{anomaly, drift, significance, slo};
use agent_eval_pipeline::store::postgres::{connect, run_migrations, PgStore};

#[derive(Parser)]
#[command(name = "pipeline-jobs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan recent evaluation records for per-group anomalies.
    Anomaly,
    /// Welch window comparison and EWMA/CUSUM change-point detection.
    Significance,
    /// PSI and Wasserstein drift between a baseline and current window.
    Drift,
    /// Evaluate hourly rollups against per-workflow SLO thresholds.
    Slo,
    /// Join signals with market outcomes and summarize portfolio returns.
    Backtest {
        #[arg(long)]
        dataset_version: String,
        #[arg(long)]
        horizon: String,
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long)]
        end: DateTime<Utc>,
        #[arg(long, default_value_t = 5.0)]
        cost_bps: f64,
        #[arg(long, default_value = "v1")]
        code_version: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let jobs = JobConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();

    let pool = connect(&config.database_url, &config.pool).await?;
    run_migrations(&pool).await?;
    let store = PgStore::new(pool);

    let result = run(&cli.command, &store, &jobs).await;

    match result {
        Ok(summary) => {
            tracing::info!(%summary, "job complete");
            Ok(())
        }
        Err(e) => {
            let code = e
                .downcast_ref::<PipelineError>()
                .map(agent_eval_pipeline::domain::error::job_exit_code)
                .unwrap_or(1);
            tracing::error!(error = %e, "job failed");
            std::process::exit(code);
        }
    }
}

async fn run(command: &Command, store: &PgStore, jobs: &JobConfig) -> anyhow::Result<String> {
    match command {
        Command::Anomaly => {
            let since = Utc::now() - Duration::hours(jobs.lookback_hours);
            let created = anomaly::run_anomaly_job(store, &jobs.tenant_id, since, jobs.min_history).await?;
            Ok(format!("{created} anomalies created"))
        }
        Command::Significance => {
            let shifts = significance::run_window_comparison(
                store,
                &jobs.tenant_id,
                &jobs.significance_metric,
                jobs.window_hours,
                jobs.alpha,
            )
            .await?;
            let changepoints = significance::run_changepoint_detection(store, &jobs.tenant_id).await?;
            Ok(format!("{shifts} window shifts, {changepoints} changepoint shifts"))
        }
        Command::Drift => {
            let findings =
                drift::run_drift_job(store, &jobs.tenant_id, jobs.baseline_hours, jobs.current_hours).await?;
            Ok(format!("{} drift findings", findings.len()))
        }
        Command::Slo => {
            let registry = SloRegistry::new(SloConfig::default());
            let violations = slo::run_slo_job(store, &jobs.tenant_id, jobs.lookback_hours, &registry).await?;
            Ok(format!("{violations} SLO violations"))
        }
        Command::Backtest { dataset_version, horizon, start, end, cost_bps, code_version } => {
            let params = BacktestParams {
                tenant: jobs.tenant_id.clone(),
                dataset_version: dataset_version.clone(),
                horizon: horizon.clone(),
                start: *start,
                end: *end,
                cost_bps: *cost_bps,
                code_version: code_version.clone(),
            };
            let run = run_backtest(store, params).await?;
            Ok(format!("backtest {} status={:?}", run.backtest_id, run.status))
        }
    }
}
