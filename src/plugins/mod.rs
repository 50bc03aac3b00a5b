//! Plugin contract: the boundary between the dispatch kernel and handlers.
//!
//! # Parameter schema
//!
//! A plugin declares the argument names it recognises through
//! [`Plugin::params`]. The kernel uses that declaration to filter each
//! message payload before invocation: unknown keys are dropped, and keys the
//! plugin recognises but the payload lacks are simply absent from
//! [`PluginArgs`]. What a missing argument means is up to the plugin.
//!
//! # Registration
//!
//! Plugins are compiled in. [`builtin`] returns one instance of every plugin
//! enabled through cargo features (`plugin-a`, `plugin-b`, …); `main` filters
//! that list against `[plugins] enabled` and hands it to the registry.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[cfg(feature = "plugin-a")]
pub mod plugin_a;
#[cfg(feature = "plugin-b")]
pub mod plugin_b;
#[cfg(feature = "plugin-c")]
pub mod plugin_c;

// ── Results ───────────────────────────────────────────────────────────────────

/// What a plugin hands back on success.
///
/// Serialises untagged, so a logged result reads as the plain value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PluginOutput {
    Text(String),
    Map(Map<String, Value>),
    List(Vec<Value>),
}

impl From<&str> for PluginOutput {
    fn from(s: &str) -> Self {
        PluginOutput::Text(s.to_string())
    }
}

impl From<String> for PluginOutput {
    fn from(s: String) -> Self {
        PluginOutput::Text(s)
    }
}

/// A plugin's own failure for one invocation. Recorded as data in that
/// plugin's result slot; never fails the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("missing argument: {name}")]
    MissingArgument { name: String },

    #[error("invalid argument {name}: expected {expected}")]
    InvalidArgument { name: String, expected: &'static str },

    #[error("plugin failed: {0}")]
    Failed(String),

    #[error("plugin panicked: {0}")]
    Panicked(String),
}

pub type PluginResult = Result<PluginOutput, PluginError>;

/// A boxed, owned future returned by [`Plugin::execute`].
pub type PluginFuture = Pin<Box<dyn Future<Output = PluginResult> + Send + 'static>>;

// ── Parameter schema ──────────────────────────────────────────────────────────

/// Expected JSON type of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Integer,
    String,
    Bool,
    Any,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Integer => "integer",
            ParamKind::String => "string",
            ParamKind::Bool => "bool",
            ParamKind::Any => "any",
        }
    }

    /// `true` if `value` has this kind. `null` matches nothing but `Any`.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::String => value.is_string(),
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Any => true,
        }
    }
}

/// One recognised parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub const fn new(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind }
    }
}

// ── Arguments ─────────────────────────────────────────────────────────────────

/// Filtered arguments for one invocation, checked against the plugin's
/// declared [`ParamSpec`]s on access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginArgs {
    values: Map<String, Value>,
    specs: &'static [ParamSpec],
}

impl PluginArgs {
    pub fn new(specs: &'static [ParamSpec], values: Map<String, Value>) -> Self {
        Self { values, specs }
    }

    /// Names actually supplied, in payload order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether the payload carried `name` at all, `null` included.
    pub fn supplied(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Raw value for `name`, type-checked against its declared kind.
    ///
    /// `Ok(None)` means the payload did not carry it or carried `null`.
    pub fn get(&self, name: &str) -> Result<Option<&Value>, PluginError> {
        let Some(value) = self.values.get(name).filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        match self.specs.iter().find(|s| s.name == name) {
            Some(spec) if !spec.kind.accepts(value) => Err(PluginError::InvalidArgument {
                name: name.to_string(),
                expected: spec.kind.as_str(),
            }),
            _ => Ok(Some(value)),
        }
    }

    pub fn get_i64(&self, name: &str) -> Result<Option<i64>, PluginError> {
        match self.get(name)? {
            None => Ok(None),
            Some(v) => v.as_i64().map(Some).ok_or_else(|| PluginError::InvalidArgument {
                name: name.to_string(),
                expected: ParamKind::Integer.as_str(),
            }),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<Option<&str>, PluginError> {
        match self.get(name)? {
            None => Ok(None),
            Some(v) => v.as_str().map(Some).ok_or_else(|| PluginError::InvalidArgument {
                name: name.to_string(),
                expected: ParamKind::String.as_str(),
            }),
        }
    }
}

// ── Plugin ────────────────────────────────────────────────────────────────────

/// A named, stateless unit of work.
///
/// Implementations must be `Send + Sync`: the registry shares them behind
/// `Arc` and the kernel runs each invocation on its own task.
pub trait Plugin: Send + Sync + 'static {
    /// Unique registry key.
    fn name(&self) -> &str;

    /// Parameters this plugin recognises. Default: none.
    fn params(&self) -> &'static [ParamSpec] {
        &[]
    }

    /// Run one invocation with already-filtered arguments.
    ///
    /// The returned future must own everything it needs; it may sleep or do
    /// I/O without blocking sibling invocations.
    fn execute(&self, args: PluginArgs) -> PluginFuture;
}

/// Every plugin compiled into this binary, one instance each.
pub fn builtin() -> Vec<Box<dyn Plugin>> {
    #[allow(unused_mut)]
    let mut plugins: Vec<Box<dyn Plugin>> = Vec::new();
    #[cfg(feature = "plugin-a")]
    plugins.push(Box::new(plugin_a::PluginA::default()));
    #[cfg(feature = "plugin-b")]
    plugins.push(Box::new(plugin_b::PluginB::default()));
    #[cfg(feature = "plugin-c")]
    plugins.push(Box::new(plugin_c::PluginC::default()));
    plugins
}

/// Keep only plugins named in `enabled`. An empty list keeps everything.
pub fn select(plugins: Vec<Box<dyn Plugin>>, enabled: &[String]) -> Vec<Box<dyn Plugin>> {
    if enabled.is_empty() {
        return plugins;
    }
    plugins
        .into_iter()
        .filter(|p| enabled.iter().any(|name| name == p.name()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SPECS: &[ParamSpec] = &[
        ParamSpec::new("id", ParamKind::Integer),
        ParamSpec::new("name", ParamKind::String),
    ];

    fn args(v: Value) -> PluginArgs {
        match v {
            Value::Object(map) => PluginArgs::new(SPECS, map),
            _ => panic!("test args must be an object"),
        }
    }

    #[test]
    fn kind_accepts_matching_values() {
        assert!(ParamKind::Integer.accepts(&json!(42)));
        assert!(!ParamKind::Integer.accepts(&json!(4.2)));
        assert!(!ParamKind::Integer.accepts(&json!("42")));
        assert!(ParamKind::String.accepts(&json!("x")));
        assert!(ParamKind::Bool.accepts(&json!(true)));
        assert!(ParamKind::Any.accepts(&Value::Null));
        assert!(!ParamKind::String.accepts(&Value::Null));
    }

    #[test]
    fn absent_argument_is_none() {
        let a = args(json!({}));
        assert_eq!(a.get_i64("id"), Ok(None));
        assert!(a.is_empty());
    }

    #[test]
    fn typed_access_checks_declared_kind() {
        let a = args(json!({"id": "not-a-number", "name": "x"}));
        assert_eq!(
            a.get_i64("id"),
            Err(PluginError::InvalidArgument { name: "id".into(), expected: "integer" })
        );
        assert_eq!(a.get_str("name"), Ok(Some("x")));
    }

    #[test]
    fn explicit_null_reads_as_absent() {
        let a = args(json!({"id": null, "name": null}));
        assert_eq!(a.get_i64("id"), Ok(None));
        assert_eq!(a.get_str("name"), Ok(None));
        assert!(a.supplied("name"));
        assert!(!args(json!({})).supplied("name"));
    }

    #[test]
    fn output_serialises_untagged() {
        let text = serde_json::to_value(PluginOutput::from("hi")).unwrap();
        assert_eq!(text, json!("hi"));
        let list = serde_json::to_value(PluginOutput::List(vec![json!(1), json!("a")])).unwrap();
        assert_eq!(list, json!([1, "a"]));
    }

    #[test]
    fn select_filters_by_name() {
        let names: Vec<String> = builtin().iter().map(|p| p.name().to_string()).collect();
        let kept = select(builtin(), &[]);
        assert_eq!(kept.len(), names.len());

        let kept = select(builtin(), &["NoSuchPlugin".to_string()]);
        assert!(kept.is_empty());
    }
}
