//! Common error types for the health check components.

use std::fmt;

/// A specialized Result type for health check operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for health check operations.
///
/// These are configuration-time errors: they surface synchronously when a
/// probe is registered or the host is wired up, never from inside a sweep.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid probe name: {0}")]
    InvalidName(String),

    #[error("A probe named '{0}' is already registered")]
    DuplicateName(String),

    #[error("A {kind} probe with internal name '{name}' is already registered")]
    DuplicateProbe { kind: &'static str, name: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new invalid name error.
    pub fn invalid_name(msg: impl fmt::Display) -> Self {
        Error::InvalidName(msg.to_string())
    }

    /// Create a new duplicate name error.
    pub fn duplicate_name(name: impl fmt::Display) -> Self {
        Error::DuplicateName(name.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::duplicate_name("db-1").to_string(),
            "A probe named 'db-1' is already registered"
        );
        assert_eq!(
            Error::DuplicateProbe { kind: "Tcp", name: "edge".into() }.to_string(),
            "A Tcp probe with internal name 'edge' is already registered"
        );
        assert_eq!(
            Error::config("unknown log format 'xml'").to_string(),
            "Configuration error: unknown log format 'xml'"
        );
    }
}

