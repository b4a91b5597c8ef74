//! HTTP surface (C14). Router assembly mirrors the teacher's
//! `Router::new().route(...).layer(...).with_state(state)` composition in
//! `main.rs`: ops endpoints are mounted outside the auth layer (same
//! exemption the teacher gives `/health`), auth is a layer rather than a
//! per-handler check, and CORS + request logging wrap the whole router.

pub mod handlers;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

pub use state::AppState;

pub fn build_router(state: AppState, api_keys: Vec<String>) -> Router {
    let ops_routes = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .with_state(state.clone());

    let mut app_routes = Router::new()
        .route("/events", post(handlers::ingest_events))
        .route("/metrics/agents", get(handlers::agent_metrics))
        .route("/metrics/workflows", get(handlers::workflow_metrics))
        .route("/anomalies", get(handlers::list_anomalies))
        .route("/shifts", get(handlers::list_shifts))
        .route("/actions/recommended", get(handlers::list_actions))
        .route("/backtests", get(handlers::list_backtests))
        .route("/signals/:id", get(handlers::get_signal))
        .with_state(state.clone());

    if !api_keys.is_empty() {
        app_routes = app_routes.route_layer(axum::middleware::from_fn_with_state(
            crate::middleware::ApiKeys(std::sync::Arc::new(api_keys)),
            crate::middleware::auth_middleware,
        ));
    }

    Router::new()
        .merge(ops_routes)
        .merge(app_routes)
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(crate::middleware::request_logging))
}
