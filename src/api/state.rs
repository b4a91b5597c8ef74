//! Shared application state threaded through `with_state`, mirroring the
//! teacher's single `Clone`-able `AppState` struct built once in `main`.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::domain::normalize::NormalizationRegistry;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: Arc<NormalizationRegistry>,
    pub prometheus_handle: PrometheusHandle,
}
