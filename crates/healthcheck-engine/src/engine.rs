//! Execution and aggregation of a health check sweep.

use crate::probe::{CheckFailure, ProbeContext, ProbeError, ProbeResult};
use crate::race::race_with;
use crate::registry::{Registration, Registry};
use crate::types::{HealthStatus, Outcome, Report};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Runs every registration concurrently and aggregates a [`Report`].
///
/// A sweep never fails as a whole: validation failures, probe errors and
/// panics are each folded into the outcome of the registration that caused
/// them.
#[derive(Clone)]
pub struct HealthCheckEngine {
    registry: Arc<Registry>,
}

impl HealthCheckEngine {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run every registration once.
    pub async fn run(&self, cancellation: &CancellationToken) -> Report {
        self.run_filtered(|_| true, cancellation).await
    }

    /// Run the registrations matching `predicate` once.
    ///
    /// `cancellation` is advisory: every selected probe is still invoked and
    /// gets an outcome, even if the token is already cancelled.
    pub async fn run_filtered<F>(&self, predicate: F, cancellation: &CancellationToken) -> Report
    where
        F: Fn(&Registration) -> bool,
    {
        let selected = self.registry.filter(predicate);
        let sweep_start = Instant::now();

        if cancellation.is_cancelled() {
            debug!("Sweep started with a cancelled token, probes still run");
        }

        let tasks = selected.into_iter().map(|registration| {
            let span = info_span!(
                "probe",
                name = %registration.name(),
                kind = registration.kind()
            );
            let started = Instant::now();
            let handle = tokio::spawn(
                execute(registration.clone(), cancellation.clone()).instrument(span),
            );
            async move {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => aborted(&registration, e, started.elapsed()),
                };
                (registration, outcome)
            }
        });

        let results = join_all(tasks).await;

        let mut entries = HashMap::with_capacity(results.len());
        for (registration, outcome) in results {
            let previous = entries.insert(registration.name().clone(), outcome);
            debug_assert!(previous.is_none(), "registry names are unique");
        }

        let report = Report::new(entries, sweep_start.elapsed());
        info!(
            status = %report.status(),
            probes = report.len(),
            duration_ms = report.total_duration().as_millis(),
            "Health check sweep finished"
        );
        report
    }
}

/// Execute one registration and classify the result.
async fn execute(registration: Arc<Registration>, ambient: CancellationToken) -> Outcome {
    let token = ambient.child_token();
    let ctx = ProbeContext::new(
        registration.name().clone(),
        registration.failure_status(),
        token.clone(),
    );

    let timeout = registration.timeout();
    let start = Instant::now();
    let check = registration.check().check(&ctx);
    // A positive deadline cancels the probe's token; the call itself is still
    // awaited to completion. Zero only marks the call late.
    let (timely, result) = race_with(check, timeout, || {
        if timeout.deadline().is_some() {
            debug!(timeout = %timeout, "Probe deadline elapsed");
            token.cancel();
        }
    })
    .await;
    let duration = start.elapsed();

    match result {
        Ok(result) if !timely && result.status == HealthStatus::Healthy => {
            debug!(
                timeout = %timeout,
                duration_ms = duration.as_millis(),
                "Probe completed after its registration timeout"
            );
            completed(&registration, late(&registration, result, duration), duration)
        }
        Ok(result) => {
            debug!(
                status = %result.status,
                duration_ms = duration.as_millis(),
                "Probe completed"
            );
            completed(&registration, result, duration)
        }
        Err(CheckFailure::Validation(failure)) => {
            warn!(error = %failure, "Probe options are invalid");
            outcome(
                &registration,
                HealthStatus::Unhealthy,
                Some(failure.to_string()),
                duration,
                None,
            )
        }
        Err(CheckFailure::Probe(e)) => {
            warn!(error = %e, duration_ms = duration.as_millis(), "Probe failed");
            failed(&registration, e, duration)
        }
    }
}

fn completed(registration: &Registration, result: ProbeResult, duration: Duration) -> Outcome {
    let mut outcome = outcome(
        registration,
        result.status,
        result.description,
        duration,
        None,
    );
    outcome.data = result.data;
    outcome
}

/// A healthy result that missed the registration timeout is degraded.
fn late(registration: &Registration, result: ProbeResult, duration: Duration) -> ProbeResult {
    let mut late = ProbeResult::from_timely(
        registration.name(),
        false,
        duration,
        registration.timeout(),
    );
    late.data.extend(result.data);
    late
}

fn failed(registration: &Registration, error: ProbeError, duration: Duration) -> Outcome {
    outcome(
        registration,
        registration.failure_status().into(),
        Some(error.to_string()),
        duration,
        Some(Arc::new(error)),
    )
}

/// The probe task itself died (panic or runtime shutdown).
fn aborted(registration: &Registration, e: JoinError, duration: Duration) -> Outcome {
    let error = if e.is_panic() {
        let payload = e.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(name = %registration.name(), panic = %message, "Probe panicked");
        ProbeError::Panicked(message)
    } else {
        warn!(name = %registration.name(), "Probe task was cancelled");
        ProbeError::Cancelled
    };
    failed(registration, error, duration)
}

fn outcome(
    registration: &Registration,
    status: HealthStatus,
    description: Option<String>,
    duration: Duration,
    error: Option<Arc<ProbeError>>,
) -> Outcome {
    Outcome {
        status,
        description,
        duration,
        error,
        data: BTreeMap::new(),
        tags: registration.tags().clone(),
    }
}
