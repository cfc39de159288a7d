//! Probe registrations.

use crate::options::{ConfigurationSource, Configure, OptionsResolver};
use crate::probe::{BoundProbe, Check, Probe};
use crate::race::Timeout;
use crate::types::{FailureStatus, ProbeName};
use common::{Error, Result};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Immutable binding of a probe to a name, tags, timeout and failure policy.
pub struct Registration {
    name: ProbeName,
    internal_name: String,
    check: Arc<dyn Check>,
    failure_status: FailureStatus,
    tags: BTreeSet<String>,
    timeout: Timeout,
}

impl Registration {
    pub fn name(&self) -> &ProbeName {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        self.check.kind()
    }

    pub fn internal_name(&self) -> &str {
        &self.internal_name
    }

    pub fn check(&self) -> &Arc<dyn Check> {
        &self.check
    }

    pub fn failure_status(&self) -> FailureStatus {
        self.failure_status
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Engine-level deadline for this registration.
    pub fn timeout(&self) -> Timeout {
        self.timeout
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("internal_name", &self.internal_name)
            .field("failure_status", &self.failure_status)
            .field("tags", &self.tags)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builder for a single registration.
///
/// ```
/// use healthcheck_engine::{FailureStatus, RegistrationBuilder, Timeout, probes::TcpProbe};
/// use std::time::Duration;
///
/// # fn main() -> common::Result<()> {
/// let builder = RegistrationBuilder::new("edge", TcpProbe)?
///     .configure(|o| o.address = "10.0.0.1:443".into())
///     .tags(["network", "edge"])
///     .failure_status(FailureStatus::Degraded)
///     .timeout(Timeout::After(Duration::from_secs(2)));
/// # let _ = builder;
/// # Ok(())
/// # }
/// ```
pub struct RegistrationBuilder<P: Probe> {
    name: ProbeName,
    probe: P,
    configure: Vec<Configure<P::Options>>,
    failure_status: FailureStatus,
    tags: BTreeSet<String>,
    timeout: Timeout,
}

impl<P: Probe> RegistrationBuilder<P> {
    /// Start a registration. Fails if `name` is empty or whitespace.
    pub fn new(name: impl AsRef<str>, probe: P) -> Result<Self> {
        Ok(Self {
            name: ProbeName::new(name)?,
            probe,
            configure: Vec::new(),
            failure_status: FailureStatus::default(),
            tags: BTreeSet::new(),
            timeout: Timeout::Infinite,
        })
    }

    /// Adjust the options before the configuration source is bound.
    pub fn configure<F>(mut self, configure: F) -> Self
    where
        F: Fn(&mut P::Options) + Send + Sync + 'static,
    {
        self.configure.push(Arc::new(configure));
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn failure_status(mut self, failure_status: FailureStatus) -> Self {
        self.failure_status = failure_status;
        self
    }

    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    fn build(self, source: Arc<dyn ConfigurationSource>) -> Registration {
        let internal_name = self.probe.internal_name(&self.name);
        let resolver = OptionsResolver::new(P::KIND, &internal_name, source, self.configure);
        Registration {
            name: self.name,
            internal_name,
            check: Arc::new(BoundProbe::new(self.probe, resolver)),
            failure_status: self.failure_status,
            tags: self.tags,
            timeout: self.timeout,
        }
    }
}

/// Ordered collection of registrations with unique names.
pub struct Registry {
    source: Arc<dyn ConfigurationSource>,
    registrations: Vec<Arc<Registration>>,
    names: HashSet<ProbeName>,
    internal_names: HashSet<(&'static str, String)>,
}

impl Registry {
    /// Create an empty registry whose probes bind options from `source`.
    pub fn new(source: Arc<dyn ConfigurationSource>) -> Self {
        Self {
            source,
            registrations: Vec::new(),
            names: HashSet::new(),
            internal_names: HashSet::new(),
        }
    }

    /// Add a registration.
    ///
    /// Names are unique across the registry ignoring case, and internal names
    /// are unique within a probe kind.
    pub fn register<P: Probe>(&mut self, builder: RegistrationBuilder<P>) -> Result<()> {
        if self.names.contains(&builder.name) {
            return Err(Error::duplicate_name(&builder.name));
        }

        let internal_key = (P::KIND, builder.probe.internal_name(&builder.name).to_lowercase());
        if self.internal_names.contains(&internal_key) {
            return Err(Error::DuplicateProbe {
                kind: P::KIND,
                name: internal_key.1,
            });
        }

        let registration = builder.build(self.source.clone());
        debug!(
            name = %registration.name,
            kind = registration.kind(),
            options_key = registration.check.options_key(),
            "Registered probe"
        );

        self.names.insert(registration.name.clone());
        self.internal_names.insert(internal_key);
        self.registrations.push(Arc::new(registration));
        Ok(())
    }

    /// Shorthand for `register(RegistrationBuilder::new(name, probe)?)`.
    pub fn add_probe<P: Probe>(&mut self, name: &str, probe: P) -> Result<()> {
        self.register(RegistrationBuilder::new(name, probe)?)
    }

    /// All registrations in insertion order.
    pub fn all(&self) -> &[Arc<Registration>] {
        &self.registrations
    }

    /// Registrations matching `predicate`, in insertion order.
    pub fn filter<F>(&self, predicate: F) -> Vec<Arc<Registration>>
    where
        F: Fn(&Registration) -> bool,
    {
        self.registrations
            .iter()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Registration>> {
        let name = ProbeName::new(name).ok()?;
        self.registrations.iter().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn source(&self) -> &Arc<dyn ConfigurationSource> {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{BasicOptions, ConfigTree};
    use crate::probe::{ProbeContext, ProbeError, ProbeResult};
    use async_trait::async_trait;

    struct NoopProbe;

    #[async_trait]
    impl Probe for NoopProbe {
        const KIND: &'static str = "Noop";
        type Options = BasicOptions;

        async fn execute(
            &self,
            ctx: &ProbeContext,
            _options: BasicOptions,
        ) -> std::result::Result<ProbeResult, ProbeError> {
            Ok(ProbeResult::healthy(ctx.name().to_string()))
        }
    }

    struct PrefixedProbe;

    #[async_trait]
    impl Probe for PrefixedProbe {
        const KIND: &'static str = "Prefixed";
        type Options = BasicOptions;

        fn internal_name(&self, name: &ProbeName) -> String {
            format!("prefixed-{}", name)
        }

        async fn execute(
            &self,
            _ctx: &ProbeContext,
            _options: BasicOptions,
        ) -> std::result::Result<ProbeResult, ProbeError> {
            Ok(ProbeResult::healthy("ok"))
        }
    }

    fn registry() -> Registry {
        Registry::new(Arc::new(ConfigTree::default()))
    }

    #[test]
    fn test_register_rejects_blank_name() {
        assert!(matches!(
            RegistrationBuilder::new("  ", NoopProbe),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn test_register_rejects_duplicate_names_ignoring_case() {
        let mut registry = registry();
        registry.add_probe("cache-a", NoopProbe).unwrap();

        let err = registry.add_probe("CACHE-A", NoopProbe).unwrap_err();
        assert!(matches!(err, Error::DuplicateName(_)));

        let err = registry.add_probe("Cache-A", PrefixedProbe).unwrap_err();
        assert!(matches!(err, Error::DuplicateName(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_internal_name_scopes_options_key() {
        let mut registry = registry();
        registry.add_probe("edge", PrefixedProbe).unwrap();

        let registration = registry.get("EDGE").unwrap();
        assert_eq!(registration.internal_name(), "prefixed-edge");
        assert_eq!(
            registration.check().options_key(),
            "HealthChecks:Prefixed:prefixed-edge"
        );
    }

    #[test]
    fn test_registration_defaults() {
        let mut registry = registry();
        registry.add_probe("db", NoopProbe).unwrap();

        let registration = &registry.all()[0];
        assert_eq!(registration.kind(), "Noop");
        assert_eq!(registration.failure_status(), FailureStatus::Unhealthy);
        assert_eq!(registration.timeout(), Timeout::Infinite);
        assert!(registration.tags().is_empty());
    }

    #[test]
    fn test_filter_preserves_insertion_order() {
        let mut registry = registry();
        for (name, tag) in [("c", "db"), ("a", "cache"), ("b", "db")] {
            registry
                .register(RegistrationBuilder::new(name, NoopProbe).unwrap().tag(tag))
                .unwrap();
        }

        let names: Vec<_> = registry
            .filter(|r| r.has_tag("db"))
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, vec!["c", "b"]);

        let all: Vec<_> = registry.all().iter().map(|r| r.name().to_string()).collect();
        assert_eq!(all, vec!["c", "a", "b"]);
    }
}
