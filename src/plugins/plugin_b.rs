//! `PluginB` takes no arguments and reports a status object.

use std::time::Duration;

use serde_json::{Map, Value};

use super::{Plugin, PluginArgs, PluginError, PluginFuture, PluginOutput};

pub struct PluginB {
    latency: Duration,
}

impl PluginB {
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for PluginB {
    fn default() -> Self {
        Self::with_latency(Duration::from_secs(2))
    }
}

impl Plugin for PluginB {
    fn name(&self) -> &str {
        "PluginB"
    }

    fn execute(&self, _args: PluginArgs) -> PluginFuture {
        let latency = self.latency;
        Box::pin(async move {
            tokio::time::sleep(latency).await;
            let mut status = Map::new();
            status.insert("status".into(), Value::from("success"));
            status.insert("message".into(), Value::from("Plugin B executed"));
            Ok::<_, PluginError>(PluginOutput::Map(status))
        })
    }
}
