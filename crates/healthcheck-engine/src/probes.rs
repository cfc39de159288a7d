//! Built-in probe kinds.
//!
//! Each probe does one thin call into its dependency and classifies it with
//! the soft timeout race. Waits that are safe to abandon (connects, lookups,
//! idempotent requests) stop early when the probe's token is cancelled.

use crate::options::{DEFAULT_TIMEOUT_MILLIS, ProbeOptions, validation_error};
use crate::probe::{Probe, ProbeContext, ProbeError, ProbeResult};
use crate::race::race;
use crate::types::ProbeName;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use validator::{Validate, ValidationError};

/// TCP connect options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase", default)]
pub struct TcpOptions {
    /// Target address (host:port)
    #[validate(custom = "validate_address")]
    pub address: String,

    /// Soft timeout in milliseconds
    pub timeout: i64,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            address: String::new(),
            timeout: DEFAULT_TIMEOUT_MILLIS,
        }
    }
}

impl ProbeOptions for TcpOptions {
    fn timeout_millis(&self) -> i64 {
        self.timeout
    }
}

fn validate_address(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(validation_error("address", "The address cannot be null or whitespace."));
    }
    Ok(())
}

/// Opens a TCP connection to the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    const KIND: &'static str = "Tcp";
    type Options = TcpOptions;

    async fn execute(
        &self,
        ctx: &ProbeContext,
        options: TcpOptions,
    ) -> Result<ProbeResult, ProbeError> {
        let timeout = options.timeout();
        let start = Instant::now();

        let (timely, result) = race(
            ctx.cancellable(TcpStream::connect(options.address.as_str())),
            timeout,
        )
        .await;
        let elapsed = start.elapsed();

        match result {
            Ok(_stream) => {
                debug!(address = %options.address, duration_ms = elapsed.as_millis(), "TCP connect succeeded");
                Ok(ProbeResult::from_timely(ctx.name(), timely, elapsed, timeout)
                    .with_data("address", options.address))
            }
            Err(e) => {
                warn!(address = %options.address, error = %e, "TCP connect failed");
                Err(e)
            }
        }
    }
}

/// HTTP request options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase", default)]
pub struct HttpOptions {
    /// Absolute request URI
    #[validate(custom = "validate_uri")]
    pub uri: String,

    /// HTTP method (GET, HEAD, ...)
    #[validate(custom = "validate_method")]
    pub method: String,

    /// Accepted status codes; empty accepts any 2xx
    pub expected_codes: Vec<u16>,

    /// Soft timeout in milliseconds
    pub timeout: i64,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            uri: String::new(),
            method: "GET".to_string(),
            expected_codes: Vec::new(),
            timeout: DEFAULT_TIMEOUT_MILLIS,
        }
    }
}

impl ProbeOptions for HttpOptions {
    fn timeout_millis(&self) -> i64 {
        self.timeout
    }
}

fn validate_uri(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(validation_error("uri", "The URI cannot be null or whitespace."));
    }
    if reqwest::Url::parse(value).is_err() {
        return Err(validation_error("uri", "The URI must be absolute."));
    }
    Ok(())
}

fn validate_method(value: &str) -> Result<(), ValidationError> {
    if reqwest::Method::from_bytes(value.to_ascii_uppercase().as_bytes()).is_err() {
        return Err(validation_error("method", "The HTTP method is not valid."));
    }
    Ok(())
}

/// Sends one HTTP request and checks the status code.
///
/// The client is shared and owned by the host; build it once and clone it
/// into every probe.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    const KIND: &'static str = "Http";
    type Options = HttpOptions;

    async fn execute(
        &self,
        ctx: &ProbeContext,
        options: HttpOptions,
    ) -> Result<ProbeResult, ProbeError> {
        let method = reqwest::Method::from_bytes(options.method.to_ascii_uppercase().as_bytes())
            .map_err(ProbeError::other)?;
        let timeout = options.timeout();
        let start = Instant::now();

        let request = self.client.request(method, &options.uri);
        let (timely, response) = race(ctx.cancellable(request.send()), timeout).await;
        let elapsed = start.elapsed();

        let response = response.inspect_err(|e| {
            warn!(uri = %options.uri, error = %e, "HTTP request failed");
        })?;
        let code = response.status().as_u16();
        let accepted = if options.expected_codes.is_empty() {
            response.status().is_success()
        } else {
            options.expected_codes.contains(&code)
        };

        if !accepted {
            warn!(uri = %options.uri, status = code, "HTTP check failed: unexpected status code");
            return Ok(
                ProbeResult::failed(ctx, format!("Unexpected status code: {}", code))
                    .with_data("status_code", code.to_string()),
            );
        }

        debug!(uri = %options.uri, status = code, duration_ms = elapsed.as_millis(), "HTTP check successful");
        Ok(ProbeResult::from_timely(ctx.name(), timely, elapsed, timeout)
            .with_data("status_code", code.to_string()))
    }
}

/// DNS lookup options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase", default)]
pub struct DnsOptions {
    /// Host name to resolve
    #[validate(custom = "validate_host")]
    pub host: String,

    /// If set, at least one of these must be in the answer
    #[validate(custom = "validate_addresses")]
    pub expected_addresses: Vec<String>,

    /// Soft timeout in milliseconds
    pub timeout: i64,
}

impl Default for DnsOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            expected_addresses: Vec::new(),
            timeout: DEFAULT_TIMEOUT_MILLIS,
        }
    }
}

impl ProbeOptions for DnsOptions {
    fn timeout_millis(&self) -> i64 {
        self.timeout
    }
}

fn validate_host(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(validation_error("host", "The host cannot be null or whitespace."));
    }
    Ok(())
}

fn validate_addresses(values: &[String]) -> Result<(), ValidationError> {
    if let Some(bad) = values.iter().find(|v| v.parse::<IpAddr>().is_err()) {
        let mut error = ValidationError::new("expected_addresses");
        error.message = Some(Cow::Owned(format!(
            "The expected address '{}' is not a valid IP address.",
            bad
        )));
        return Err(error);
    }
    Ok(())
}

/// Resolves a host name through the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsProbe;

#[async_trait]
impl Probe for DnsProbe {
    const KIND: &'static str = "Dns";
    type Options = DnsOptions;

    async fn execute(
        &self,
        ctx: &ProbeContext,
        options: DnsOptions,
    ) -> Result<ProbeResult, ProbeError> {
        let timeout = options.timeout();
        let start = Instant::now();

        let (timely, addrs) = race(
            ctx.cancellable(tokio::net::lookup_host((options.host.as_str(), 0))),
            timeout,
        )
        .await;
        let elapsed = start.elapsed();
        let resolved: Vec<IpAddr> = addrs?.map(|addr| addr.ip()).collect();

        if resolved.is_empty() {
            warn!(host = %options.host, "DNS check failed: no addresses resolved");
            return Ok(ProbeResult::failed(ctx, "No addresses resolved"));
        }

        if !options.expected_addresses.is_empty() {
            let found = options
                .expected_addresses
                .iter()
                .filter_map(|a| a.parse::<IpAddr>().ok())
                .any(|expected| resolved.contains(&expected));
            if !found {
                warn!(host = %options.host, "DNS check failed: expected address not found");
                return Ok(ProbeResult::failed(
                    ctx,
                    "Expected address not found in DNS results",
                ));
            }
        }

        debug!(host = %options.host, count = resolved.len(), "DNS check successful");
        Ok(ProbeResult::from_timely(ctx.name(), timely, elapsed, timeout)
            .with_data("addresses", resolved.len().to_string()))
    }
}

/// Lifecycle signals of the hosting application.
///
/// Owned by the host and shared with the lifecycle probe.
#[derive(Debug, Clone, Default)]
pub struct ApplicationLifetime {
    started: Arc<AtomicBool>,
    stopping: CancellationToken,
}

impl ApplicationLifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the application as fully started.
    pub fn notify_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    /// Signal that shutdown has begun.
    pub fn notify_stopping(&self) {
        self.stopping.cancel();
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.is_cancelled()
    }
}

/// Reports the application's own lifecycle: degraded while starting, the
/// failure status once stopping.
#[derive(Debug, Clone)]
pub struct LifecycleProbe {
    lifetime: ApplicationLifetime,
}

impl LifecycleProbe {
    pub fn new(lifetime: ApplicationLifetime) -> Self {
        Self { lifetime }
    }
}

#[async_trait]
impl Probe for LifecycleProbe {
    const KIND: &'static str = "Lifecycle";
    type Options = crate::options::BasicOptions;

    fn internal_name(&self, name: &ProbeName) -> String {
        format!("lifecycle-{}", name)
    }

    async fn execute(
        &self,
        ctx: &ProbeContext,
        _options: Self::Options,
    ) -> Result<ProbeResult, ProbeError> {
        if self.lifetime.is_stopping() {
            return Ok(ProbeResult::failed(ctx, "Application is stopping."));
        }
        if !self.lifetime.is_started() {
            return Ok(ProbeResult::degraded("Application is starting."));
        }
        Ok(ProbeResult::healthy(format!("{} is running.", ctx.name())))
    }
}
