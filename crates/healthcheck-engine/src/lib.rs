//! On-demand health checking for applications with many dependencies.
//!
//! An application registers named probes (a database, a broker, a cache, its
//! own lifecycle) and asks, whenever it needs to, for the health of the
//! system as a whole. Every sweep:
//!
//! - resolves and validates each probe's options from a configuration source
//! - runs every probe concurrently, isolated from the others
//! - races each probe against a soft timeout that flags it late but never
//!   cancels it
//! - classifies every outcome as Healthy, Degraded or Unhealthy
//! - aggregates outcomes and timing into a [`Report`]
//!
//! # Example
//!
//! ```no_run
//! use healthcheck_engine::{
//!     ConfigTree, HealthCheckEngine, HealthStatus, RegistrationBuilder, Registry,
//!     probes::TcpProbe,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Arc::new(ConfigTree::new(serde_json::json!({
//!     "HealthChecks": { "Tcp": { "edge": { "Address": "192.168.1.100:80", "Timeout": 250 } } }
//! })));
//!
//! let mut registry = Registry::new(source);
//! registry.register(RegistrationBuilder::new("edge", TcpProbe)?.tag("network"))?;
//!
//! let engine = HealthCheckEngine::new(registry);
//! let report = engine.run(&CancellationToken::new()).await;
//!
//! if report.status() == HealthStatus::Unhealthy {
//!     for (name, outcome) in report.iter() {
//!         println!("{}: {} {:?}", name, outcome.status, outcome.description);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod engine;
pub mod options;
pub mod probe;
pub mod probes;
pub mod race;
pub mod registry;
pub mod types;

pub use engine::HealthCheckEngine;
pub use options::{
    BasicOptions, ConfigTree, ConfigurationSource, OptionsResolver, ProbeOptions,
    ValidationFailure,
};
pub use probe::{Check, CheckFailure, Probe, ProbeContext, ProbeError, ProbeResult};
pub use race::{Timeout, classify, race, race_with};
pub use registry::{Registration, RegistrationBuilder, Registry};
pub use types::{FailureStatus, HealthStatus, Outcome, ProbeName, Report};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_display() {
        assert_eq!(HealthStatus::Healthy.to_string(), "HEALTHY");
        assert_eq!(HealthStatus::Degraded.to_string(), "DEGRADED");
        assert_eq!(HealthStatus::Unhealthy.to_string(), "UNHEALTHY");
    }

    #[test]
    fn test_probe_result_constructors() {
        let result = ProbeResult::healthy("ok");
        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(result.description.as_deref(), Some("ok"));
        assert!(result.data.is_empty());

        assert_eq!(ProbeResult::degraded("slow").status, HealthStatus::Degraded);
        assert_eq!(ProbeResult::unhealthy("down").status, HealthStatus::Unhealthy);
    }
}
