//! Dispatch: turn one decoded [`Message`] into per-plugin results.
//!
//! # Ordering and failure
//!
//! Every entry is resolved against the registry before any plugin runs. An
//! unknown name fails the whole message with
//! [`DispatchError::UnknownHandler`] and nothing is invoked, so a rejected
//! message has no side effects.
//!
//! Resolved entries then run concurrently, one tokio task each. Results are
//! put back into entry order regardless of which finishes first. A plugin
//! error or panic lands in that plugin's slot; it does not fail the message.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::task::{Id, JoinSet};
use tracing::{debug, warn};

use super::message::Message;
use super::registry::Registry;
use crate::plugins::{Plugin, PluginArgs, PluginError, PluginResult};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unknown handler: {name:?}")]
    UnknownHandler { name: String },
}

/// Result of one plugin invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    pub plugin: String,
    pub outcome: PluginResult,
}

impl InvocationResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// `{"plugin": …, "result": …}` or `{"plugin": …, "error": …}`.
    pub fn to_json(&self) -> Value {
        match &self.outcome {
            Ok(output) => json!({ "plugin": self.plugin, "result": output }),
            Err(e) => json!({ "plugin": self.plugin, "error": e.to_string() }),
        }
    }
}

pub type DispatchOutcome = Result<Vec<InvocationResult>, DispatchError>;

struct Resolved {
    plugin: Arc<dyn Plugin>,
    args: PluginArgs,
}

/// Dispatch every entry of `message` against `registry`.
pub async fn dispatch(message: Message, registry: &Registry) -> DispatchOutcome {
    let entries = message.into_entries();

    let mut names = Vec::with_capacity(entries.len());
    let mut resolved = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(registered) = registry.lookup(&entry.plugin) else {
            warn!(plugin = %entry.plugin, "unknown handler, rejecting message");
            return Err(DispatchError::UnknownHandler { name: entry.plugin });
        };

        let plugin = Arc::clone(registered.plugin());
        let mut args = Map::new();
        for (key, value) in entry.args {
            if registered.accepts(&key) {
                args.insert(key, value);
            } else {
                debug!(plugin = %entry.plugin, arg = %key, "dropping unrecognised argument");
            }
        }
        resolved.push(Resolved {
            args: PluginArgs::new(plugin.params(), args),
            plugin,
        });
        names.push(entry.plugin);
    }

    let outcomes = invoke_all(resolved).await;

    Ok(names
        .into_iter()
        .zip(outcomes)
        .map(|(plugin, outcome)| InvocationResult { plugin, outcome })
        .collect())
}

/// Run each invocation on its own task; return outcomes in input order.
async fn invoke_all(resolved: Vec<Resolved>) -> Vec<PluginResult> {
    let mut slots: Vec<Option<PluginResult>> = vec![None; resolved.len()];
    let mut index_of: HashMap<Id, usize> = HashMap::with_capacity(resolved.len());
    let mut set = JoinSet::new();

    for (index, Resolved { plugin, args }) in resolved.into_iter().enumerate() {
        // `execute` itself runs on the task so a panic there is caught too.
        let handle = set.spawn(async move { plugin.execute(args).await });
        index_of.insert(handle.id(), index);
    }

    while let Some(joined) = set.join_next_with_id().await {
        let (id, outcome) = match joined {
            Ok((id, outcome)) => (id, outcome),
            Err(e) => {
                warn!("plugin task failed: {e}");
                let outcome = Err(PluginError::Panicked(e.to_string()));
                (e.id(), outcome)
            }
        };
        if let Some(&index) = index_of.get(&id) {
            slots[index] = Some(outcome);
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(PluginError::Failed("no result recorded".into()))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::plugins::{ParamKind, ParamSpec, PluginFuture, PluginOutput};

    /// Records the argument names it was called with, then replies after
    /// `latency`.
    struct Recorder {
        name: &'static str,
        latency: Duration,
        calls: Arc<Mutex<Vec<Vec<String>>>>,
    }

    const RECORDER_PARAMS: &[ParamSpec] = &[
        ParamSpec::new("id", ParamKind::Integer),
        ParamSpec::new("label", ParamKind::String),
    ];

    impl Plugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn params(&self) -> &'static [ParamSpec] {
            RECORDER_PARAMS
        }

        fn execute(&self, args: PluginArgs) -> PluginFuture {
            self.calls
                .lock()
                .unwrap()
                .push(args.keys().map(str::to_string).collect());
            let latency = self.latency;
            let name = self.name;
            Box::pin(async move {
                tokio::time::sleep(latency).await;
                Ok::<_, PluginError>(PluginOutput::from(name))
            })
        }
    }

    struct Failing;

    impl Plugin for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn execute(&self, _args: PluginArgs) -> PluginFuture {
            Box::pin(async { Err::<PluginOutput, _>(PluginError::Failed("boom".into())) })
        }
    }

    struct Panicking;

    impl Plugin for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn execute(&self, _args: PluginArgs) -> PluginFuture {
            let blow_up = true;
            Box::pin(async move {
                if blow_up {
                    panic!("plugin blew up");
                }
                Ok::<_, PluginError>(PluginOutput::from("unreachable"))
            })
        }
    }

    /// Panics while building its future, before any `.await`.
    struct PanicsOnCall;

    impl Plugin for PanicsOnCall {
        fn name(&self) -> &str {
            "panics_on_call"
        }

        fn execute(&self, _args: PluginArgs) -> PluginFuture {
            panic!("execute blew up")
        }
    }

    type Calls = Arc<Mutex<Vec<Vec<String>>>>;

    fn registry_with(recorders: &[(&'static str, u64)]) -> (Registry, Calls) {
        let calls: Calls = Arc::default();
        let mut reg = Registry::new();
        for &(name, ms) in recorders {
            reg.register(Arc::new(Recorder {
                name,
                latency: Duration::from_millis(ms),
                calls: Arc::clone(&calls),
            }))
            .unwrap();
        }
        (reg, calls)
    }

    fn msg(body: &str) -> Message {
        Message::decode(body.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn empty_message_yields_no_results() {
        let (reg, calls) = registry_with(&[("a", 0)]);
        assert_eq!(dispatch(Message::default(), &reg).await, Ok(vec![]));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_entry_order_not_completion_order() {
        let (reg, _) = registry_with(&[("slow", 300), ("fast", 10), ("mid", 100)]);
        let results = dispatch(msg(r#"{"slow": {}, "fast": {}, "mid": {}}"#), &reg)
            .await
            .unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.plugin.as_str()).collect();
        assert_eq!(names, vec!["slow", "fast", "mid"]);
        for r in &results {
            assert_eq!(r.outcome, Ok(PluginOutput::from(r.plugin.as_str())));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn invocations_run_concurrently() {
        let (reg, _) = registry_with(&[("a", 1_000), ("b", 1_000), ("c", 1_000)]);
        let started = tokio::time::Instant::now();
        dispatch(msg(r#"{"a": {}, "b": {}, "c": {}}"#), &reg).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn arguments_are_filtered_to_declared_names() {
        let (reg, calls) = registry_with(&[("a", 0)]);
        dispatch(msg(r#"{"a": {"extra": true, "id": 7, "other": "x"}}"#), &reg)
            .await
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![vec!["id".to_string()]]);
    }

    #[tokio::test]
    async fn absent_arguments_are_not_synthesised() {
        let (reg, calls) = registry_with(&[("a", 0)]);
        dispatch(msg(r#"{"a": {"label": "x"}}"#), &reg).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![vec!["label".to_string()]]);
    }

    #[tokio::test]
    async fn unknown_handler_fails_without_invoking_anything() {
        let (reg, calls) = registry_with(&[("a", 0), ("b", 0)]);
        let out = dispatch(msg(r#"{"a": {}, "nope": {}, "b": {}}"#), &reg).await;
        assert_eq!(out, Err(DispatchError::UnknownHandler { name: "nope".into() }));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_unknown_name_is_reported() {
        let (reg, _) = registry_with(&[]);
        let out = dispatch(msg(r#"{"x": {}, "y": {}}"#), &reg).await;
        assert_eq!(out, Err(DispatchError::UnknownHandler { name: "x".into() }));
    }

    #[tokio::test]
    async fn plugin_failure_is_recorded_as_data() {
        let (mut reg, _) = registry_with(&[("a", 0)]);
        reg.register(Arc::new(Failing)).unwrap();
        let results = dispatch(msg(r#"{"failing": {}, "a": {}}"#), &reg).await.unwrap();
        assert_eq!(results[0].outcome, Err(PluginError::Failed("boom".into())));
        assert!(results[1].is_ok());
    }

    #[tokio::test]
    async fn plugin_panic_is_recorded_as_data() {
        let (mut reg, _) = registry_with(&[("a", 0)]);
        reg.register(Arc::new(Panicking)).unwrap();
        let results = dispatch(msg(r#"{"a": {}, "panicking": {}}"#), &reg).await.unwrap();
        assert!(results[0].is_ok());
        assert!(matches!(results[1].outcome, Err(PluginError::Panicked(_))));
    }

    #[tokio::test]
    async fn panic_inside_execute_is_recorded_as_data() {
        let (mut reg, _) = registry_with(&[("a", 0)]);
        reg.register(Arc::new(PanicsOnCall)).unwrap();
        let results = dispatch(msg(r#"{"panics_on_call": {}, "a": {}}"#), &reg)
            .await
            .unwrap();
        assert!(matches!(results[0].outcome, Err(PluginError::Panicked(_))));
        assert!(results[1].is_ok());
    }

    #[tokio::test]
    async fn redispatch_is_structurally_identical() {
        let (reg, _) = registry_with(&[("a", 0), ("b", 0)]);
        let body = r#"{"b": {"id": 1}, "a": {"label": "z"}}"#;
        let first = dispatch(msg(body), &reg).await;
        let second = dispatch(msg(body), &reg).await;
        assert_eq!(first, second);
    }

    #[test]
    fn result_json_shape() {
        let ok = InvocationResult { plugin: "a".into(), outcome: Ok(PluginOutput::from("done")) };
        assert_eq!(ok.to_json(), json!({"plugin": "a", "result": "done"}));

        let err = InvocationResult {
            plugin: "b".into(),
            outcome: Err(PluginError::MissingArgument { name: "id".into() }),
        };
        assert_eq!(err.to_json(), json!({"plugin": "b", "error": "missing argument: id"}));
    }
}
