use std::future::ready;
use std::sync::Arc;

use axum::{routing::get, Router};
use health::HealthRegistry;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::accept::{self, AcceptService};
use crate::prometheus::track_metrics;

#[derive(Clone)]
pub struct State {
    pub service: Arc<AcceptService>,
}

async fn index() -> &'static str {
    "accept"
}

pub fn router(
    service: Arc<AcceptService>,
    liveness: HealthRegistry,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let state = State { service };

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(|| ready("ready")))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route("/api/verve/accept", get(accept::accept))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Only installed when asked to: a global recorder does not work well
    // when the crate is used as a library (tests etc)
    match metrics {
        Some(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        None => router,
    }
}
