//! `PluginA` echoes the `id` it was given.

use std::time::Duration;

use super::{ParamKind, ParamSpec, Plugin, PluginArgs, PluginError, PluginFuture, PluginOutput};

const PARAMS: &[ParamSpec] = &[ParamSpec::new("id", ParamKind::Integer)];

pub struct PluginA {
    latency: Duration,
}

impl PluginA {
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for PluginA {
    fn default() -> Self {
        Self::with_latency(Duration::from_secs(1))
    }
}

impl Plugin for PluginA {
    fn name(&self) -> &str {
        "PluginA"
    }

    fn params(&self) -> &'static [ParamSpec] {
        PARAMS
    }

    fn execute(&self, args: PluginArgs) -> PluginFuture {
        let latency = self.latency;
        Box::pin(async move {
            tokio::time::sleep(latency).await;
            // A missing id is a normal answer, not a failure.
            let out = match args.get_i64("id")? {
                Some(id) => PluginOutput::Text(format!("Plugin A executed successfully! ID: {id}")),
                None => PluginOutput::from("id is missing"),
            };
            Ok::<_, PluginError>(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn args(v: Value) -> PluginArgs {
        PluginArgs::new(PARAMS, v.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test(start_paused = true)]
    async fn executes_with_id() {
        let out = PluginA::default().execute(args(json!({"id": 42}))).await;
        assert_eq!(out, Ok(PluginOutput::from("Plugin A executed successfully! ID: 42")));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_missing_id_as_text() {
        let out = PluginA::default().execute(args(json!({}))).await;
        assert_eq!(out, Ok(PluginOutput::from("id is missing")));
    }

    #[tokio::test(start_paused = true)]
    async fn null_id_counts_as_missing() {
        let out = PluginA::default().execute(args(json!({"id": null}))).await;
        assert_eq!(out, Ok(PluginOutput::from("id is missing")));
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_non_integer_id() {
        let out = PluginA::default().execute(args(json!({"id": "abc"}))).await;
        assert!(matches!(out, Err(PluginError::InvalidArgument { .. })));
    }

    #[test]
    fn declares_id() {
        let p = PluginA::default();
        assert_eq!(p.name(), "PluginA");
        assert_eq!(p.params().iter().map(|s| s.name).collect::<Vec<_>>(), vec!["id"]);
    }
}
