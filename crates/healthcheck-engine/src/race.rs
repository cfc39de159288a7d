//! Soft, non-cancelling timeout race.
//!
//! A timed-out operation here means "took too long", not "was aborted". Many
//! client calls are not safe to abandon halfway (a request already written to
//! a socket, a command already sent), so the race always drives the operation
//! to completion and only reports whether it finished before the timer.

use crate::types::HealthStatus;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Timeout sentinel used by registrations and probe options.
///
/// Configured as milliseconds: `-1` is [`Timeout::Infinite`], any value `>= 0`
/// is [`Timeout::After`]. `After(Duration::ZERO)` is already expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Timeout {
    #[default]
    Infinite,
    After(Duration),
}

impl Timeout {
    /// Millisecond value meaning "no timeout".
    pub const INFINITE_MILLIS: i64 = -1;

    /// Parse the millisecond representation. Values below `-1` are rejected.
    pub fn from_millis(millis: i64) -> Option<Self> {
        match millis {
            Self::INFINITE_MILLIS => Some(Timeout::Infinite),
            m if m >= 0 => Some(Timeout::After(Duration::from_millis(m as u64))),
            _ => None,
        }
    }

    pub fn as_millis(&self) -> i64 {
        match self {
            Timeout::Infinite => Self::INFINITE_MILLIS,
            Timeout::After(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Whether an operation that took `elapsed` finished in time.
    pub fn is_within(&self, elapsed: Duration) -> bool {
        match self {
            Timeout::Infinite => true,
            Timeout::After(d) => elapsed <= *d,
        }
    }

    /// Duration after which a deadline should fire, if any.
    ///
    /// Only strictly positive timeouts produce a deadline; `Infinite` and zero
    /// leave the caller's cancellation untouched.
    pub fn deadline(&self) -> Option<Duration> {
        match self {
            Timeout::After(d) if !d.is_zero() => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Infinite => write!(f, "infinite"),
            Timeout::After(d) => write!(f, "{}ms", d.as_millis()),
        }
    }
}

impl Serialize for Timeout {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_millis())
    }
}

impl<'de> Deserialize<'de> for Timeout {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        Timeout::from_millis(millis).ok_or_else(|| {
            serde::de::Error::custom(format!("timeout must be -1 or >= 0, got {}", millis))
        })
    }
}

/// Race `op` against `timeout` without cancelling it.
///
/// Returns `(is_timely, output)`. When the timer wins, `op` is still awaited
/// and its output returned with `is_timely = false`.
pub async fn race<F>(op: F, timeout: Timeout) -> (bool, F::Output)
where
    F: Future,
{
    race_with(op, timeout, || {}).await
}

/// Like [`race`], but runs `on_expired` once if the timer fires first.
pub async fn race_with<F, E>(op: F, timeout: Timeout, on_expired: E) -> (bool, F::Output)
where
    F: Future,
    E: FnOnce(),
{
    let mut op = std::pin::pin!(op);

    match timeout {
        Timeout::Infinite => (true, op.await),
        Timeout::After(d) if d.is_zero() => {
            // Already expired: only an operation that is ready on its first
            // poll counts as timely.
            if let std::task::Poll::Ready(output) = futures::poll!(op.as_mut()) {
                return (true, output);
            }
            on_expired();
            (false, op.await)
        }
        Timeout::After(d) => {
            // The timer lives only inside the select and is dropped on every
            // exit path.
            tokio::select! {
                biased;
                output = op.as_mut() => return (true, output),
                _ = sleep(d) => {}
            }
            on_expired();
            (false, op.await)
        }
    }
}

/// Standard classification: Healthy when timely, Degraded otherwise.
pub fn classify(is_timely: bool) -> HealthStatus {
    if is_timely {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}
