//! Common utilities and types shared across the health check crates.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
