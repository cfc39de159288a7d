//! The probe contract.

use crate::options::{OptionsResolver, ProbeOptions, ValidationFailure};
use crate::race::{Timeout, classify};
use crate::types::{FailureStatus, HealthStatus, ProbeName};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Error raised from inside a probe body.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Probe was cancelled")]
    Cancelled,

    #[error("Unexpected result: {0}")]
    UnexpectedResult(String),

    #[error("Probe panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ProbeError {
    /// Create an unexpected result error.
    pub fn unexpected(msg: impl Into<String>) -> Self {
        ProbeError::UnexpectedResult(msg.into())
    }

    /// Wrap any other error.
    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ProbeError::Other(err.into())
    }
}

/// Per-call context handed to a probe.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    name: ProbeName,
    failure_status: FailureStatus,
    cancellation: CancellationToken,
}

impl ProbeContext {
    pub fn new(name: ProbeName, failure_status: FailureStatus, cancellation: CancellationToken) -> Self {
        Self {
            name,
            failure_status,
            cancellation,
        }
    }

    pub fn name(&self) -> &ProbeName {
        &self.name
    }

    pub fn failure_status(&self) -> FailureStatus {
        self.failure_status
    }

    /// Cooperative cancellation signal. Cancelled either by the caller of the
    /// sweep or when the registration's own timeout elapses.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fail with [`ProbeError::Cancelled`] if cancellation was requested.
    pub fn ensure_active(&self) -> Result<(), ProbeError> {
        if self.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }
        Ok(())
    }

    /// Await `fut` unless cancellation is requested first.
    ///
    /// Only use this for waits that are safe to abandon (a connect, a lookup,
    /// an idempotent request).
    pub async fn cancellable<F, T, E>(&self, fut: F) -> Result<T, ProbeError>
    where
        F: Future<Output = Result<T, E>>,
        ProbeError: From<E>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(ProbeError::Cancelled),
            result = fut => result.map_err(ProbeError::from),
        }
    }
}

/// What a probe reports when it completes its check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub status: HealthStatus,
    pub description: Option<String>,
    pub data: BTreeMap<String, String>,
}

impl ProbeResult {
    pub fn new(status: HealthStatus, description: Option<String>) -> Self {
        Self {
            status,
            description,
            data: BTreeMap::new(),
        }
    }

    /// Create a healthy result
    pub fn healthy(description: impl Into<String>) -> Self {
        Self::new(HealthStatus::Healthy, Some(description.into()))
    }

    /// Create a degraded result
    pub fn degraded(description: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded, Some(description.into()))
    }

    /// Create an unhealthy result
    pub fn unhealthy(description: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy, Some(description.into()))
    }

    /// The check completed but its answer was wrong. Reports the
    /// registration's failure status.
    pub fn failed(ctx: &ProbeContext, description: impl Into<String>) -> Self {
        Self::new(ctx.failure_status().into(), Some(description.into()))
    }

    /// Standard tri-state classification of a raced operation.
    pub fn from_timely(name: &ProbeName, is_timely: bool, elapsed: Duration, timeout: Timeout) -> Self {
        let description = if is_timely {
            format!("{} is healthy.", name)
        } else {
            format!(
                "{} responded in {}ms, exceeding its {} timeout.",
                name,
                elapsed.as_millis(),
                timeout
            )
        };
        Self::new(classify(is_timely), Some(description))
            .with_data("elapsed_ms", elapsed.as_millis().to_string())
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// A health probe against one dependency.
///
/// `execute` performs exactly one unit of work. It must not assume it is
/// safe to retry. Errors it returns are folded by the engine into the
/// registration's failure status; a probe that wants a softer answer for an
/// expected error returns a Degraded [`ProbeResult`] instead.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    /// Kind name, used in configuration keys and uniqueness checks.
    const KIND: &'static str;

    type Options: ProbeOptions;

    /// Name used for the configuration key and uniqueness within the kind.
    fn internal_name(&self, name: &ProbeName) -> String {
        name.as_str().to_string()
    }

    /// Probe-specific defaults, applied after the configuration source is
    /// bound and before validation.
    fn post_configure(&self, _name: &ProbeName, _options: &mut Self::Options) {}

    async fn execute(
        &self,
        ctx: &ProbeContext,
        options: Self::Options,
    ) -> Result<ProbeResult, ProbeError>;
}

/// Why a check did not produce a [`ProbeResult`].
#[derive(Debug, thiserror::Error)]
pub enum CheckFailure {
    /// Options could not be bound or validated; the probe body never ran.
    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    /// The probe body returned an error.
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Object-safe view of a probe bound to its options resolver.
#[async_trait]
pub trait Check: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Configuration key the options are bound from.
    fn options_key(&self) -> &str;

    /// Resolve options and run the probe once.
    async fn check(&self, ctx: &ProbeContext) -> Result<ProbeResult, CheckFailure>;
}

pub(crate) struct BoundProbe<P: Probe> {
    probe: P,
    resolver: OptionsResolver<P::Options>,
}

impl<P: Probe> BoundProbe<P> {
    pub(crate) fn new(probe: P, resolver: OptionsResolver<P::Options>) -> Self {
        Self { probe, resolver }
    }
}

#[async_trait]
impl<P: Probe> Check for BoundProbe<P> {
    fn kind(&self) -> &'static str {
        P::KIND
    }

    fn options_key(&self) -> &str {
        self.resolver.key()
    }

    async fn check(&self, ctx: &ProbeContext) -> Result<ProbeResult, CheckFailure> {
        let options = self
            .resolver
            .resolve_with(ctx.name(), |o| self.probe.post_configure(ctx.name(), o))?;
        Ok(self.probe.execute(ctx, options).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(failure_status: FailureStatus) -> ProbeContext {
        ProbeContext::new(
            ProbeName::new("cache-a").unwrap(),
            failure_status,
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_from_timely() {
        let name = ProbeName::new("cache-a").unwrap();
        let timeout = Timeout::After(Duration::ZERO);

        let late = ProbeResult::from_timely(&name, false, Duration::from_millis(50), timeout);
        assert_eq!(late.status, HealthStatus::Degraded);
        assert!(late.description.as_deref().unwrap().contains("cache-a"));
        assert_eq!(late.data.get("elapsed_ms").map(String::as_str), Some("50"));

        let ok = ProbeResult::from_timely(&name, true, Duration::from_millis(1), timeout);
        assert_eq!(ok.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_failed_uses_failure_status() {
        assert_eq!(
            ProbeResult::failed(&ctx(FailureStatus::Degraded), "nope").status,
            HealthStatus::Degraded
        );
        assert_eq!(
            ProbeResult::failed(&ctx(FailureStatus::Unhealthy), "nope").status,
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_cancellable_abandons_on_cancel() {
        let ctx = ctx(FailureStatus::Unhealthy);
        ctx.cancellation().cancel();
        assert!(ctx.ensure_active().is_err());

        let result: Result<(), ProbeError> = ctx
            .cancellable(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, std::io::Error>(())
            })
            .await;
        assert!(matches!(result, Err(ProbeError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellable_passes_result_through() {
        let ctx = ctx(FailureStatus::Unhealthy);
        let result = ctx
            .cancellable(async { Err::<(), _>(std::io::Error::other("refused")) })
            .await;
        assert!(matches!(result, Err(ProbeError::Io(_))));
    }
}
