//! Per-probe options: binding from a configuration source, defaults and
//! validation.
//!
//! Options are resolved fresh on every sweep, so edits to the configuration
//! source show up on the next run. Resolution never raises: anything wrong
//! with the bound options comes back as a [`ValidationFailure`] that the
//! engine folds into an Unhealthy outcome for that one probe.

use crate::race::Timeout;
use crate::types::{ProbeName, eq_ignore_case};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::sync::{Arc, PoisonError, RwLock};
use validator::{Validate, ValidationError, ValidationErrors};

/// Root of every probe's configuration key.
pub const CONFIGURATION_ROOT: &str = "HealthChecks";

/// Separator between configuration key segments.
pub const KEY_DELIMITER: char = ':';

/// Default soft timeout for probe options, in milliseconds.
pub const DEFAULT_TIMEOUT_MILLIS: i64 = 100;

pub const CONNECTION_STRING_MESSAGE: &str = "The connection string cannot be null or whitespace.";
pub const TIMEOUT_MESSAGE: &str =
    "The timeout must be -1 (infinite) or a non-negative number of milliseconds.";

/// Configuration key for a probe kind and name, e.g. `HealthChecks:Tcp:edge`.
pub fn options_key(kind: &str, name: &str) -> String {
    format!("{CONFIGURATION_ROOT}{KEY_DELIMITER}{kind}{KEY_DELIMITER}{name}")
}

/// Hierarchical key/value source that options are bound from.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigurationSource: Send + Sync {
    /// Subtree stored under a `:`-separated key, or `None` when absent.
    fn section(&self, key: &str) -> Option<Value>;
}

/// In-memory configuration tree.
///
/// Segment lookup ignores case. The tree can be swapped at runtime with
/// [`ConfigTree::replace`].
#[derive(Debug, Default)]
pub struct ConfigTree {
    root: RwLock<Value>,
}

impl ConfigTree {
    pub fn new(root: Value) -> Self {
        Self {
            root: RwLock::new(root),
        }
    }

    /// Replace the whole tree. Takes effect on the next resolution.
    pub fn replace(&self, root: Value) {
        *self.root.write().unwrap_or_else(PoisonError::into_inner) = root;
    }
}

impl ConfigurationSource for ConfigTree {
    fn section(&self, key: &str) -> Option<Value> {
        let root = self.root.read().unwrap_or_else(PoisonError::into_inner);
        let mut node = &*root;
        for segment in key.split(KEY_DELIMITER).filter(|s| !s.is_empty()) {
            node = find_ignore_case(node.as_object()?, segment)?.1;
        }
        Some(node.clone())
    }
}

fn find_ignore_case<'a>(map: &'a Map<String, Value>, key: &str) -> Option<(&'a String, &'a Value)> {
    map.get_key_value(key)
        .or_else(|| map.iter().find(|(k, _)| eq_ignore_case(k, key)))
}

/// Bind the section stored under `key` onto `target`.
///
/// Fields present in the section overwrite the current values; everything
/// else is left as it was. Returns `Ok(false)` when the key is absent.
pub fn bind<O>(source: &dyn ConfigurationSource, key: &str, target: &mut O) -> serde_json::Result<bool>
where
    O: Serialize + DeserializeOwned,
{
    let Some(section) = source.section(key) else {
        return Ok(false);
    };
    let mut current = serde_json::to_value(&*target)?;
    merge(&mut current, section);
    *target = serde_json::from_value(current)?;
    Ok(true)
}

fn merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                let existing = target
                    .keys()
                    .find(|k| eq_ignore_case(k, &key))
                    .cloned();
                match existing {
                    Some(existing) => {
                        if let Some(slot) = target.get_mut(&existing) {
                            merge(slot, value);
                        }
                    }
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = coerce(target, source),
    }
}

// Configuration sources often carry scalars as strings ("250", "true").
fn coerce(target: &Value, source: Value) -> Value {
    let Value::String(text) = &source else {
        return source;
    };
    match target {
        Value::Number(_) => text
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| text.trim().parse::<f64>().map(Value::from))
            .unwrap_or(source),
        Value::Bool(_) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => source,
        },
        _ => source,
    }
}

/// Options record carried by a probe kind.
pub trait ProbeOptions:
    Validate + Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Soft timeout in milliseconds (`-1` = infinite).
    fn timeout_millis(&self) -> i64;

    /// Soft timeout as a typed value. Only meaningful after validation.
    fn timeout(&self) -> Timeout {
        Timeout::from_millis(self.timeout_millis()).unwrap_or_default()
    }

    /// Fill in defaults for fields left unset after binding.
    fn post_configure(&mut self, _name: &ProbeName) {}
}

/// Options that carry nothing but the soft timeout.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, Validate)]
#[serde(rename_all = "PascalCase", default)]
pub struct BasicOptions {
    pub timeout: i64,
}

impl Default for BasicOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_MILLIS,
        }
    }
}

impl ProbeOptions for BasicOptions {
    fn timeout_millis(&self) -> i64 {
        self.timeout
    }
}

/// Options failed to bind or validate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", .messages.join(" "))]
pub struct ValidationFailure {
    messages: Vec<String>,
}

impl ValidationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    fn from_messages(messages: Vec<String>) -> Option<Self> {
        if messages.is_empty() {
            None
        } else {
            Some(Self { messages })
        }
    }
}

fn error_messages(errors: &ValidationErrors) -> Vec<String> {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by_key(|(field, _)| *field);
    fields
        .into_iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| match &error.message {
                Some(message) => message.to_string(),
                None => format!("{} is invalid ({})", field, error.code),
            })
        })
        .collect()
}

/// Run the common rules and then the options' own rules.
pub fn validate_options<O: ProbeOptions>(options: &O) -> Result<(), ValidationFailure> {
    let mut messages = Vec::new();
    if options.timeout_millis() < Timeout::INFINITE_MILLIS {
        messages.push(TIMEOUT_MESSAGE.to_string());
    }
    if let Err(errors) = options.validate() {
        messages.extend(error_messages(&errors));
    }
    match ValidationFailure::from_messages(messages) {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}

/// Build a validation error carrying a human readable message.
pub fn validation_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}

/// Connection strings must contain something other than whitespace.
pub fn validate_connection_string(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(validation_error("connection_string", CONNECTION_STRING_MESSAGE));
    }
    Ok(())
}

/// Callback applied to a probe's options at registration time.
pub type Configure<O> = Arc<dyn Fn(&mut O) + Send + Sync>;

/// Resolves the options for one registration.
pub struct OptionsResolver<O: ProbeOptions> {
    key: String,
    source: Arc<dyn ConfigurationSource>,
    configure: Vec<Configure<O>>,
}

impl<O: ProbeOptions> OptionsResolver<O> {
    pub fn new(
        kind: &str,
        internal_name: &str,
        source: Arc<dyn ConfigurationSource>,
        configure: Vec<Configure<O>>,
    ) -> Self {
        Self {
            key: options_key(kind, internal_name),
            source,
            configure,
        }
    }

    /// Configuration key this resolver binds from.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Bind, default and validate the options for `name`.
    ///
    /// `name` is a [`ProbeName`], so the blank-name case is already rejected
    /// when the registration is built.
    pub fn resolve(&self, name: &ProbeName) -> Result<O, ValidationFailure> {
        self.resolve_with(name, |_| {})
    }

    /// Like [`resolve`](Self::resolve), with an extra defaulting step that runs
    /// after the options' own `post_configure`.
    pub fn resolve_with<F>(&self, name: &ProbeName, post_configure: F) -> Result<O, ValidationFailure>
    where
        F: FnOnce(&mut O),
    {
        let mut options = O::default();
        for configure in &self.configure {
            configure(&mut options);
        }

        bind(self.source.as_ref(), &self.key, &mut options).map_err(|e| {
            ValidationFailure::new(format!(
                "Failed to bind configuration section '{}': {}",
                self.key, e
            ))
        })?;

        options.post_configure(name);
        post_configure(&mut options);
        validate_options(&options)?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, Validate)]
    #[serde(rename_all = "PascalCase", default)]
    struct DbOptions {
        #[validate(custom = "validate_connection_string")]
        connection_string: String,
        command: String,
        timeout: i64,
    }

    impl Default for DbOptions {
        fn default() -> Self {
            Self {
                connection_string: String::new(),
                command: String::new(),
                timeout: DEFAULT_TIMEOUT_MILLIS,
            }
        }
    }

    impl ProbeOptions for DbOptions {
        fn timeout_millis(&self) -> i64 {
            self.timeout
        }

        fn post_configure(&mut self, _name: &ProbeName) {
            if self.command.is_empty() {
                self.command = "SELECT 1;".to_string();
            }
        }
    }

    fn name(value: &str) -> ProbeName {
        ProbeName::new(value).unwrap()
    }

    #[test]
    fn test_options_key() {
        assert_eq!(options_key("Tcp", "edge"), "HealthChecks:Tcp:edge");
    }

    #[test]
    fn test_config_tree_lookup_ignores_case() {
        let tree = ConfigTree::new(json!({
            "HealthChecks": { "Db": { "primary": { "ConnectionString": "x" } } }
        }));
        assert_eq!(
            tree.section("healthchecks:DB:Primary"),
            Some(json!({ "ConnectionString": "x" }))
        );
        assert_eq!(tree.section("HealthChecks:Db:replica"), None);
    }

    #[test]
    fn test_lookup_folds_like_registered_names() {
        let tree = ConfigTree::new(json!({
            "HealthChecks": { "Tcp": { "ÄRZTE": { "Address": "x" } } }
        }));
        assert_eq!(
            tree.section("HealthChecks:Tcp:ärzte"),
            Some(json!({ "Address": "x" }))
        );
        assert_eq!(
            ProbeName::new("ÄRZTE").unwrap(),
            ProbeName::new("ärzte").unwrap()
        );

        let mut target = json!({ "Ärzte": { "Port": 1 } });
        merge(&mut target, json!({ "ÄRZTE": { "Port": 2 } }));
        assert_eq!(target, json!({ "Ärzte": { "Port": 2 } }));
    }

    #[test]
    fn test_bind_keeps_absent_fields() {
        let tree = ConfigTree::new(json!({ "a": { "timeout": "250" } }));
        let mut options = DbOptions {
            connection_string: "Server=db".into(),
            ..DbOptions::default()
        };

        assert!(bind(&tree, "a", &mut options).unwrap());
        assert_eq!(options.timeout, 250);
        assert_eq!(options.connection_string, "Server=db");

        assert!(!bind(&tree, "missing", &mut options).unwrap());
    }

    #[test]
    fn test_bind_type_mismatch_fails() {
        let tree = ConfigTree::new(json!({ "a": { "Timeout": "soon" } }));
        let mut options = DbOptions::default();
        assert!(bind(&tree, "a", &mut options).is_err());
    }

    #[test]
    fn test_resolve_applies_configure_then_source_then_defaults() {
        let mut source = MockConfigurationSource::new();
        source
            .expect_section()
            .with(eq("HealthChecks:Db:db-1"))
            .times(1)
            .returning(|_| Some(json!({ "Timeout": 500 })));

        let resolver = OptionsResolver::<DbOptions>::new(
            "Db",
            "db-1",
            Arc::new(source),
            vec![Arc::new(|o: &mut DbOptions| {
                o.connection_string = "Server=db".into();
                o.timeout = 10;
            }) as Configure<DbOptions>],
        );

        let options = resolver.resolve(&name("db-1")).unwrap();
        assert_eq!(options.connection_string, "Server=db");
        assert_eq!(options.timeout, 500);
        assert_eq!(options.command, "SELECT 1;");
    }

    #[test]
    fn test_resolve_rejects_blank_connection_string() {
        let mut source = MockConfigurationSource::new();
        source
            .expect_section()
            .returning(|_| Some(json!({ "ConnectionString": "   " })));

        let resolver = OptionsResolver::<DbOptions>::new("Db", "db-1", Arc::new(source), vec![]);
        let failure = resolver.resolve(&name("db-1")).unwrap_err();
        assert_eq!(failure.to_string(), CONNECTION_STRING_MESSAGE);
    }

    #[test]
    fn test_resolve_rejects_timeout_below_infinite() {
        let tree = ConfigTree::new(json!({
            "HealthChecks": { "Db": { "db-1": { "ConnectionString": "x", "Timeout": -2 } } }
        }));
        let resolver = OptionsResolver::<DbOptions>::new("Db", "db-1", Arc::new(tree), vec![]);
        let failure = resolver.resolve(&name("db-1")).unwrap_err();
        assert_eq!(failure.messages(), &[TIMEOUT_MESSAGE.to_string()]);
    }

    #[test]
    fn test_resolve_accepts_infinite_timeout() {
        let tree = ConfigTree::new(json!({
            "HealthChecks": { "Db": { "db-1": { "ConnectionString": "x", "Timeout": -1 } } }
        }));
        let resolver = OptionsResolver::<DbOptions>::new("Db", "db-1", Arc::new(tree), vec![]);
        let options = resolver.resolve(&name("db-1")).unwrap();
        assert_eq!(options.timeout(), Timeout::Infinite);
    }

    #[test]
    fn test_resolve_sees_replaced_tree() {
        let tree = Arc::new(ConfigTree::default());
        let resolver =
            OptionsResolver::<DbOptions>::new("Db", "db-1", tree.clone(), vec![]);
        assert!(resolver.resolve(&name("db-1")).is_err());

        tree.replace(json!({
            "HealthChecks": { "Db": { "db-1": { "ConnectionString": "Server=db" } } }
        }));
        assert!(resolver.resolve(&name("db-1")).is_ok());
    }

    #[test]
    fn test_basic_options_defaults() {
        let options = BasicOptions::default();
        assert_eq!(options.timeout, DEFAULT_TIMEOUT_MILLIS);
        assert!(validate_options(&options).is_ok());
    }
}
