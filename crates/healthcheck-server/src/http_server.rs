//! HTTP surface: health report and Prometheus metrics endpoints.

use crate::metrics::MetricsRegistry;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use healthcheck_engine::{HealthCheckEngine, HealthStatus, Report};
use prometheus_client::encoding::text::encode;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Shared state of the request handlers
#[derive(Clone)]
pub struct AppState {
    engine: HealthCheckEngine,
    metrics: Option<Arc<MetricsRegistry>>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        engine: HealthCheckEngine,
        metrics: Option<Arc<MetricsRegistry>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            metrics,
            shutdown,
        }
    }
}

/// Query string of `GET /health`
#[derive(Debug, Default, Deserialize)]
pub struct HealthQuery {
    /// Only run registrations carrying this tag
    pub tag: Option<String>,
}

/// Build the router. `/metrics` is only mounted when metrics are enabled.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new().route("/health", get(health_handler));
    if state.metrics.is_some() {
        app = app.route("/metrics", get(metrics_handler));
    }
    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// HTTP status for an aggregate health status
pub fn status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Handler for /health endpoint
async fn health_handler(
    State(state): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> (StatusCode, Json<Report>) {
    let token = state.shutdown.child_token();
    let report = match query.tag {
        Some(tag) => {
            state
                .engine
                .run_filtered(|r| r.has_tag(&tag), &token)
                .await
        }
        None => state.engine.run(&token).await,
    };

    if let Some(metrics) = &state.metrics {
        metrics.record_report(&report);
    }

    (status_code(report.status()), Json(report))
}

/// Handler for /metrics endpoint
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let Some(metrics) = state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &metrics.registry) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(status_code(HealthStatus::Healthy), StatusCode::OK);
        assert_eq!(status_code(HealthStatus::Degraded), StatusCode::OK);
        assert_eq!(
            status_code(HealthStatus::Unhealthy),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
