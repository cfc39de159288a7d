//! Health check types and structures.

use crate::probe::ProbeError;
use common::{Error, Result};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// Tri-state health status, ordered by severity.
///
/// `Healthy < Degraded < Unhealthy`, so the worst of several statuses is their
/// maximum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum HealthStatus {
    /// Dependency responded correctly and in time
    #[default]
    Healthy,
    /// Dependency responded correctly but too slowly, or a probe chose to downgrade
    Degraded,
    /// Dependency failed its check
    Unhealthy,
}

impl HealthStatus {
    /// Combine two statuses, keeping the worst.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        self.max(other)
    }

    /// Lowercase label used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// Status reported when a probe fails its check outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FailureStatus {
    #[default]
    Unhealthy,
    Degraded,
}

impl From<FailureStatus> for HealthStatus {
    fn from(status: FailureStatus) -> Self {
        match status {
            FailureStatus::Unhealthy => HealthStatus::Unhealthy,
            FailureStatus::Degraded => HealthStatus::Degraded,
        }
    }
}

/// Name of a registered probe.
///
/// Never empty or whitespace. Equality and hashing ignore case, so `DB-1` and
/// `db-1` are the same probe.
#[derive(Clone)]
pub struct ProbeName(Arc<str>);

impl ProbeName {
    /// Validate and wrap a probe name.
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        if name.trim().is_empty() {
            return Err(Error::invalid_name("probe name cannot be empty or whitespace"));
        }
        Ok(Self(Arc::from(name)))
    }

    /// The name as originally registered.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn folded(&self) -> impl Iterator<Item = char> + '_ {
        fold_case(&self.0)
    }
}

fn fold_case(s: &str) -> impl Iterator<Item = char> + '_ {
    s.chars().flat_map(char::to_lowercase)
}

/// Case-insensitive comparison used for probe names and configuration keys.
pub(crate) fn eq_ignore_case(a: &str, b: &str) -> bool {
    a == b || fold_case(a).eq(fold_case(b))
}

impl PartialEq for ProbeName {
    fn eq(&self, other: &Self) -> bool {
        eq_ignore_case(&self.0, &other.0)
    }
}

impl Eq for ProbeName {}

impl Hash for ProbeName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for c in self.folded() {
            c.hash(state);
        }
    }
}

impl fmt::Debug for ProbeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ProbeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ProbeName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Result of executing one registration during a sweep.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    /// Classified status
    pub status: HealthStatus,

    /// Human readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Wall time of the execution attempt
    #[serde(serialize_with = "humantime_serde::serialize")]
    pub duration: Duration,

    /// Error that made the probe fail, if any
    #[serde(
        serialize_with = "serialize_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<Arc<ProbeError>>,

    /// Probe-specific diagnostic values
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,

    /// Tags copied from the registration
    pub tags: BTreeSet<String>,
}

fn serialize_error<S: Serializer>(
    error: &Option<Arc<ProbeError>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_str(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Aggregate of one execution sweep.
#[derive(Debug, Clone, Default)]
pub struct Report {
    entries: HashMap<ProbeName, Outcome>,
    total_duration: Duration,
}

impl Report {
    pub(crate) fn new(entries: HashMap<ProbeName, Outcome>, total_duration: Duration) -> Self {
        Self {
            entries,
            total_duration,
        }
    }

    /// Overall status: the worst outcome, Healthy when the report is empty.
    pub fn status(&self) -> HealthStatus {
        self.entries
            .values()
            .fold(HealthStatus::Healthy, |status, outcome| status.worst(outcome.status))
    }

    /// Wall time of the whole sweep.
    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    /// Outcome for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&Outcome> {
        let key = ProbeName::new(name).ok()?;
        self.entries.get(&key)
    }

    /// Iterate over all outcomes. Order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&ProbeName, &Outcome)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Report", 3)?;
        state.serialize_field("status", &self.status())?;
        state.serialize_field(
            "total_duration",
            &humantime_serde::Serde::from(self.total_duration),
        )?;
        state.serialize_field("entries", &self.entries)?;
        state.end()
    }
}
