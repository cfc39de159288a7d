//! Health check server
//!
//! Hosts a [`healthcheck_engine::HealthCheckEngine`] behind HTTP. Probes are
//! registered from the YAML configuration at startup and every `GET /health`
//! runs one sweep.
//!
//! # Components
//!
//! - **Config**: YAML loading, validation and the probe options tree
//! - **HTTP server**: `/health` report and `/metrics` endpoints
//! - **Metrics**: Prometheus counters and histograms recorded per sweep
//! - **Telemetry**: stdout logging with optional OTLP span export

pub mod config;
pub mod http_server;
pub mod metrics;
pub mod server;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use http_server::{AppState, router};
pub use metrics::MetricsRegistry;
pub use server::{HealthcheckServer, ServerError, build_registry};
pub use telemetry::{TelemetryError, TelemetryGuard, setup_tracing};
