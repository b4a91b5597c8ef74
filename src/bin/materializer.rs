//! Materialization worker binary: polls claimed raw events and dispatches
//! them into the normalized store. Grounded on the teacher's background-task
//! bootstrap in `main.rs` (pool connect, spawn the loop, wait on shutdown).

use std::sync::Arc;

use agent_eval_pipeline::domain::normalize::NormalizationRegistry;
use agent_eval_pipeline::domain::Config;
use agent_eval_pipeline::materialize;
use agent_eval_pipeline::store::postgres::{connect, run_migrations, PgStore};

const BATCH_SIZE: usize = 100;
const MAX_ATTEMPTS: i32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();

    let pool = connect(&config.database_url, &config.pool).await?;
    run_migrations(&pool).await?;

    let store = Arc::new(PgStore::new(pool));
    let registry = Arc::new(NormalizationRegistry::new(Default::default()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tracing::info!("materializer starting");

    let worker = tokio::spawn(materialize::run(
        store,
        registry,
        BATCH_SIZE,
        MAX_ATTEMPTS,
        shutdown_rx,
    ));

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(true);
    let _ = worker.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
