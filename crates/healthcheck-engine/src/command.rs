//! Generic "open a connection, run a command, measure" probes.
//!
//! Database-style checks differ only in how a connection is opened and how a
//! command is sent. A connector supplies those two steps; the probes here
//! supply everything else. Two execution strategies exist:
//!
//! - [`CommandProbe`] drives an async connector through the soft timeout race.
//! - [`BlockingCommandProbe`] runs a blocking connector on the blocking pool
//!   and compares the stopwatch against the timeout.
//!
//! Connections are opened per call and dropped on every exit path; they are
//! never shared between sweeps.

use crate::options::{DEFAULT_TIMEOUT_MILLIS, ProbeOptions, validate_connection_string};
use crate::probe::{Probe, ProbeContext, ProbeError, ProbeResult};
use crate::race::race;
use crate::types::ProbeName;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use validator::Validate;

/// Options shared by every command probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase", default)]
pub struct CommandOptions {
    /// Driver-specific connection string
    #[validate(custom = "validate_connection_string")]
    pub connection_string: String,

    /// Command to run; defaults to the connector's own
    pub command: String,

    /// Soft timeout in milliseconds
    pub timeout: i64,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            command: String::new(),
            timeout: DEFAULT_TIMEOUT_MILLIS,
        }
    }
}

impl ProbeOptions for CommandOptions {
    fn timeout_millis(&self) -> i64 {
        self.timeout
    }
}

fn default_command(options: &mut CommandOptions, default: &str) {
    if options.command.trim().is_empty() {
        options.command = default.to_string();
    }
}

/// Async driver for [`CommandProbe`].
#[async_trait]
pub trait AsyncConnector: Send + Sync + 'static {
    /// Probe kind name, e.g. `Postgres`.
    const KIND: &'static str;

    /// Command used when none is configured.
    const DEFAULT_COMMAND: &'static str;

    type Connection: Send;

    async fn connect(&self, connection_string: &str) -> Result<Self::Connection, ProbeError>;

    async fn execute(
        &self,
        connection: &mut Self::Connection,
        command: &str,
    ) -> Result<(), ProbeError>;
}

/// Blocking driver for [`BlockingCommandProbe`].
pub trait BlockingConnector: Send + Sync + 'static {
    const KIND: &'static str;

    const DEFAULT_COMMAND: &'static str;

    type Connection;

    fn connect(&self, connection_string: &str) -> Result<Self::Connection, ProbeError>;

    fn execute(&self, connection: &mut Self::Connection, command: &str) -> Result<(), ProbeError>;
}

/// Command probe over an async connector.
pub struct CommandProbe<C> {
    connector: C,
}

impl<C: AsyncConnector> CommandProbe<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl<C: AsyncConnector> Probe for CommandProbe<C> {
    const KIND: &'static str = C::KIND;
    type Options = CommandOptions;

    fn post_configure(&self, _name: &ProbeName, options: &mut CommandOptions) {
        default_command(options, C::DEFAULT_COMMAND);
    }

    async fn execute(
        &self,
        ctx: &ProbeContext,
        options: CommandOptions,
    ) -> Result<ProbeResult, ProbeError> {
        let timeout = options.timeout();
        let start = Instant::now();

        let (timely, result) = race(
            async {
                // Opening a connection can be abandoned; the command cannot.
                let mut connection = ctx
                    .cancellable(self.connector.connect(&options.connection_string))
                    .await?;
                self.connector
                    .execute(&mut connection, &options.command)
                    .await
            },
            timeout,
        )
        .await;
        result?;

        let elapsed = start.elapsed();
        debug!(kind = C::KIND, duration_ms = elapsed.as_millis(), "Command completed");
        Ok(ProbeResult::from_timely(ctx.name(), timely, elapsed, timeout)
            .with_data("command", options.command))
    }
}

/// Command probe over a blocking connector.
pub struct BlockingCommandProbe<C> {
    connector: Arc<C>,
}

impl<C: BlockingConnector> BlockingCommandProbe<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
        }
    }
}

#[async_trait]
impl<C: BlockingConnector> Probe for BlockingCommandProbe<C> {
    const KIND: &'static str = C::KIND;
    type Options = CommandOptions;

    fn post_configure(&self, _name: &ProbeName, options: &mut CommandOptions) {
        default_command(options, C::DEFAULT_COMMAND);
    }

    async fn execute(
        &self,
        ctx: &ProbeContext,
        options: CommandOptions,
    ) -> Result<ProbeResult, ProbeError> {
        let timeout = options.timeout();
        let connector = self.connector.clone();
        let connection_string = options.connection_string.clone();
        let command = options.command.clone();

        let start = Instant::now();
        tokio::task::spawn_blocking(move || {
            let mut connection = connector.connect(&connection_string)?;
            connector.execute(&mut connection, &command)
        })
        .await
        .map_err(|e| ProbeError::Panicked(e.to_string()))??;
        let elapsed = start.elapsed();

        debug!(kind = C::KIND, duration_ms = elapsed.as_millis(), "Blocking command completed");
        Ok(
            ProbeResult::from_timely(ctx.name(), timeout.is_within(elapsed), elapsed, timeout)
                .with_data("command", options.command),
        )
    }
}
