//! Main health check server implementation.

use crate::config::{Config, ProbeConfig, ProbeKind};
use crate::http_server::{AppState, router};
use crate::metrics::MetricsRegistry;
use healthcheck_engine::probes::{ApplicationLifetime, DnsProbe, HttpProbe, LifecycleProbe, TcpProbe};
use healthcheck_engine::{HealthCheckEngine, Probe, RegistrationBuilder, Registry};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Server error types
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid probe registration: {0}")]
    Registration(#[from] common::Error),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Health check server
pub struct HealthcheckServer {
    config: Config,
    lifetime: ApplicationLifetime,
}

impl HealthcheckServer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            lifetime: ApplicationLifetime::new(),
        }
    }

    /// Lifecycle signals observed by `lifecycle` probes
    pub fn lifetime(&self) -> &ApplicationLifetime {
        &self.lifetime
    }

    /// Build the engine from the configured probes.
    ///
    /// All HTTP probes share one client.
    pub fn build_engine(&self) -> Result<HealthCheckEngine, ServerError> {
        let client = reqwest::Client::builder().build()?;
        let registry = build_registry(&self.config, client, &self.lifetime)?;
        Ok(HealthCheckEngine::new(registry))
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let engine = self.build_engine()?;
        info!(probes = engine.registry().len(), "Probes registered");

        let metrics = if self.config.metrics.enabled {
            info!("Metrics enabled on {}/metrics", self.config.server.listen_addr);
            Some(Arc::new(MetricsRegistry::new()))
        } else {
            info!("Metrics disabled");
            None
        };

        let app = router(AppState::new(engine, metrics, shutdown.clone()));
        let listener = TcpListener::bind(&self.config.server.listen_addr).await?;
        info!(listen_addr = %self.config.server.listen_addr, "Health check server listening");
        self.lifetime.notify_started();

        let lifetime = self.lifetime.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                lifetime.notify_stopping();
                info!("Shutdown requested");
            })
            .await?;

        info!("Health check server stopped");
        Ok(())
    }
}

/// Register every configured probe, binding options from the config's
/// `health_checks` tree.
pub fn build_registry(
    config: &Config,
    client: reqwest::Client,
    lifetime: &ApplicationLifetime,
) -> Result<Registry, common::Error> {
    let mut registry = Registry::new(Arc::new(config.options_source()));
    for probe in &config.probes {
        match probe.kind {
            ProbeKind::Tcp => registry.register(builder(probe, TcpProbe)?)?,
            ProbeKind::Http => registry.register(builder(probe, HttpProbe::new(client.clone()))?)?,
            ProbeKind::Dns => registry.register(builder(probe, DnsProbe)?)?,
            ProbeKind::Lifecycle => {
                registry.register(builder(probe, LifecycleProbe::new(lifetime.clone()))?)?
            }
        }
    }
    Ok(registry)
}

fn builder<P: Probe>(config: &ProbeConfig, probe: P) -> Result<RegistrationBuilder<P>, common::Error> {
    Ok(RegistrationBuilder::new(&config.name, probe)?
        .tags(config.tags.iter().cloned())
        .failure_status(config.failure_status)
        .timeout(config.registration_timeout()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthcheck_engine::{FailureStatus, HealthStatus, Timeout};
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn config(yaml: &str) -> Config {
        Config::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_build_registry_from_config() {
        let config = config(
            r#"
probes:
  - kind: tcp
    name: edge
    tags: [ready, network]
    timeout: 500ms
  - kind: lifecycle
    name: self
    failure_status: Degraded
"#,
        );

        let registry = assert_ok!(build_registry(
            &config,
            reqwest::Client::new(),
            &ApplicationLifetime::new()
        ));
        assert_eq!(registry.len(), 2);

        let edge = registry.get("EDGE").unwrap();
        assert_eq!(edge.kind(), "Tcp");
        assert!(edge.has_tag("network"));
        assert_eq!(edge.timeout(), Timeout::After(Duration::from_millis(500)));

        let lifecycle = registry.get("self").unwrap();
        assert_eq!(lifecycle.failure_status(), FailureStatus::Degraded);
        assert_eq!(lifecycle.internal_name(), "lifecycle-self");
    }

    #[test]
    fn test_duplicate_probe_names_fail() {
        let config = config(
            r#"
probes:
  - kind: tcp
    name: edge
  - kind: dns
    name: Edge
"#,
        );

        let result = build_registry(&config, reqwest::Client::new(), &ApplicationLifetime::new());
        assert!(matches!(result, Err(common::Error::DuplicateName(_))));
    }

    #[tokio::test]
    async fn test_lifecycle_follows_server_lifetime() {
        let config = config(
            r#"
probes:
  - kind: lifecycle
    name: self
"#,
        );
        let server = HealthcheckServer::new(config);
        let engine = server.build_engine().unwrap();
        let token = CancellationToken::new();

        let report = engine.run(&token).await;
        assert_eq!(report.status(), HealthStatus::Degraded);

        server.lifetime().notify_started();
        let report = engine.run(&token).await;
        assert_eq!(report.status(), HealthStatus::Healthy);

        server.lifetime().notify_stopping();
        let report = engine.run(&token).await;
        assert_eq!(report.status(), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_unconfigured_tcp_probe_is_unhealthy() {
        let config = config(
            r#"
probes:
  - kind: tcp
    name: edge
"#,
        );
        let engine = HealthcheckServer::new(config).build_engine().unwrap();
        let report = engine.run(&CancellationToken::new()).await;

        let outcome = report.get("edge").unwrap();
        assert_eq!(outcome.status, HealthStatus::Unhealthy);
        assert_eq!(
            outcome.description.as_deref(),
            Some("The address cannot be null or whitespace.")
        );
    }
}
