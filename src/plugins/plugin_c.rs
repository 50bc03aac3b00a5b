//! `PluginC` returns a list tagged with the caller's `name`.

use std::time::Duration;

use serde_json::Value;

use super::{ParamKind, ParamSpec, Plugin, PluginArgs, PluginError, PluginFuture, PluginOutput};

const PARAMS: &[ParamSpec] = &[ParamSpec::new("name", ParamKind::String)];

pub struct PluginC {
    latency: Duration,
}

impl PluginC {
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for PluginC {
    fn default() -> Self {
        Self::with_latency(Duration::from_secs(3))
    }
}

impl Plugin for PluginC {
    fn name(&self) -> &str {
        "PluginC"
    }

    fn params(&self) -> &'static [ParamSpec] {
        PARAMS
    }

    fn execute(&self, args: PluginArgs) -> PluginFuture {
        let latency = self.latency;
        Box::pin(async move {
            tokio::time::sleep(latency).await;
            // An explicit `null` is answered in text; no `name` key at all
            // is a failure.
            let Some(name) = args.get_str("name")? else {
                if args.supplied("name") {
                    return Ok(PluginOutput::from("name is missing"));
                }
                return Err(PluginError::MissingArgument { name: "name".into() });
            };
            Ok::<_, PluginError>(PluginOutput::List(vec![
                Value::from(1),
                Value::from(2),
                Value::from(3),
                Value::from("Plugin C"),
                Value::from(name),
            ]))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn returns_tagged_list() {
        let args = PluginArgs::new(PARAMS, json!({"name": "ada"}).as_object().cloned().unwrap());
        let out = PluginC::default().execute(args).await.unwrap();
        assert_eq!(serde_json::to_value(out).unwrap(), json!([1, 2, 3, "Plugin C", "ada"]));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_name_is_a_plugin_failure() {
        let out = PluginC::default().execute(PluginArgs::new(PARAMS, Default::default())).await;
        assert_eq!(out, Err(PluginError::MissingArgument { name: "name".into() }));
    }

    #[tokio::test(start_paused = true)]
    async fn null_name_is_answered_in_text() {
        let args = PluginArgs::new(PARAMS, json!({"name": null}).as_object().cloned().unwrap());
        let out = PluginC::default().execute(args).await;
        assert_eq!(out, Ok(PluginOutput::from("name is missing")));
    }
}
