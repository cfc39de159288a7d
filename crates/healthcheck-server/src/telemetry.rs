//! Tracing setup with optional OpenTelemetry export
//!
//! Log lines always go to stdout through `tracing-subscriber`. When telemetry
//! is enabled, spans (including the per-probe `probe` spans) are also exported
//! to an OTLP collector over gRPC or HTTP.

use crate::config::{LoggingSettings, OtlpProtocol, TelemetrySettings};
use common::logging::{LogFormat, env_filter};
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider},
};
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Telemetry setup errors
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to build OTLP exporter: {0}")]
    Exporter(String),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

/// OpenTelemetry tracer guard
///
/// When dropped, flushes all pending spans and shuts down the tracer
pub struct TelemetryGuard;

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

/// Build the OTLP tracer and install its provider globally.
///
/// Returns `None` when telemetry is disabled.
pub fn init_tracer(settings: &TelemetrySettings) -> Result<Option<Tracer>, TelemetryError> {
    if !settings.enabled {
        return Ok(None);
    }

    let exporter = match settings.protocol {
        OtlpProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&settings.otlp_endpoint)
            .build(),
        OtlpProtocol::Http => opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(&settings.otlp_endpoint)
            .build(),
    }
    .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    let resource = Resource::new(vec![
        KeyValue::new("service.name", settings.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION").to_string()),
    ]);

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .build();

    let tracer = provider.tracer("healthcheck-server");
    opentelemetry::global::set_tracer_provider(provider);
    Ok(Some(tracer))
}

/// Install the global tracing subscriber
///
/// The returned guard must be kept alive for the duration of the program when
/// telemetry is enabled.
pub fn setup_tracing(
    logging: &LoggingSettings,
    telemetry: &TelemetrySettings,
) -> Result<Option<TelemetryGuard>, TelemetryError> {
    let tracer = init_tracer(telemetry)?;
    let guard = tracer.as_ref().map(|_| TelemetryGuard);
    let otel_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let format = logging.log_format();
    tracing_subscriber::registry()
        .with(env_filter(&logging.level))
        .with((format == LogFormat::Text).then(fmt::layer))
        .with((format == LogFormat::Json).then(|| fmt::layer().json()))
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    tracing::info!(
        otel = guard.is_some(),
        endpoint = %telemetry.otlp_endpoint,
        "Tracing initialized"
    );
    Ok(guard)
}
