//! Ingest HTTP server binary: boots the connection pool, runs schema setup,
//! and serves the ingest + query + ops router. Grounded on the teacher's
//! `main.rs` bootstrap sequence (env config, pool, tracing init, bind,
//! serve-with-graceful-shutdown).

use std::net::SocketAddr;
use std::sync::Arc;

use agent_eval_pipeline::api::{build_router, AppState};
use agent_eval_pipeline::domain::normalize::NormalizationRegistry;
use agent_eval_pipeline::domain::Config;
use agent_eval_pipeline::store::postgres::{connect, run_migrations, PgStore};
use metrics_exporter_prometheus::PrometheusBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();

    let pool = connect(&config.database_url, &config.pool).await?;
    run_migrations(&pool).await?;

    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        store: Arc::new(PgStore::new(pool)),
        registry: Arc::new(NormalizationRegistry::new(Default::default())),
        prometheus_handle,
    };

    let app = build_router(state, config.api_keys.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "ingest server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

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
    tracing::info!("shutdown signal received");
}
