//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or the file given by `-f` / `KERNEL_CONFIG`), then applies the `RABBITMQ_*` and
//! `KERNEL_LOG_LEVEL` env overrides. The broker password is only ever read
//! from `RABBITMQ_PASSWORD`.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::AppError;

/// What the consume loop does with a message it will not acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectPolicy {
    /// `nack` without requeue; the broker moves it to `<queue>_dlq`.
    DeadLetter,
    /// `nack` with requeue, then back off before the next fetch.
    Requeue,
}

impl RejectPolicy {
    pub fn requeues(&self) -> bool {
        matches!(self, RejectPolicy::Requeue)
    }
}

/// Broker connection and queue settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// From `RABBITMQ_PASSWORD` only.
    pub password: String,
    pub vhost: String,
    /// Queue to consume from.
    pub name: String,
    pub durable: bool,
    /// Wait after an empty poll or a transport error.
    pub backoff: Duration,
    pub reject: RejectPolicy,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub log_level: String,
    pub queue: QueueConfig,
    /// Plugin names to register; empty means every compiled-in plugin.
    pub enabled_plugins: Vec<String>,
}

/// Environment overrides, gathered once so tests can pass them directly
/// instead of mutating the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub host: Option<String>,
    pub port: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub queue: Option<String>,
    pub log_level: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            host: env::var("RABBITMQ_HOST").ok(),
            port: env::var("RABBITMQ_PORT").ok(),
            user: env::var("RABBITMQ_USER").ok(),
            password: env::var("RABBITMQ_PASSWORD").ok(),
            queue: env::var("RABBITMQ_QUEUE").ok(),
            log_level: env::var("KERNEL_LOG_LEVEL").ok(),
        }
    }
}

/// Raw TOML shape, the `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    kernel: RawKernel,
    #[serde(default)]
    queue: RawQueue,
    #[serde(default)]
    plugins: RawPlugins,
}

#[derive(Deserialize)]
struct RawKernel {
    #[serde(default = "default_name")]
    name: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

impl Default for RawKernel {
    fn default() -> Self {
        Self { name: default_name(), log_level: default_log_level() }
    }
}

#[derive(Deserialize)]
struct RawQueue {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_user")]
    user: String,
    #[serde(default = "default_vhost")]
    vhost: String,
    #[serde(default = "default_queue_name")]
    name: String,
    #[serde(default = "default_true")]
    durable: bool,
    #[serde(default = "default_backoff_secs")]
    backoff_secs: u64,
    #[serde(default = "default_reject")]
    reject: RejectPolicy,
}

impl Default for RawQueue {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            vhost: default_vhost(),
            name: default_queue_name(),
            durable: true,
            backoff_secs: default_backoff_secs(),
            reject: default_reject(),
        }
    }
}

#[derive(Deserialize, Default)]
struct RawPlugins {
    #[serde(default)]
    enabled: Vec<String>,
}

fn default_name() -> String { "plugin-kernel".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { 5672 }
fn default_user() -> String { "guest".to_string() }
fn default_password() -> String { "guest".to_string() }
fn default_vhost() -> String { "/".to_string() }
fn default_queue_name() -> String { "microkernel-queue".to_string() }
fn default_backoff_secs() -> u64 { 5 }
fn default_reject() -> RejectPolicy { RejectPolicy::DeadLetter }

fn default_true() -> bool {
    true
}

/// Load config from `path`, else `KERNEL_CONFIG`, else
/// `config/default.toml`, then apply env overrides.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let path = match path {
        Some(p) => PathBuf::from(p),
        None => env::var("KERNEL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml")),
    };
    load_from(&path, &EnvOverrides::from_env())
}

/// Loader with an explicit path and overrides.
pub fn load_from(path: &Path, overrides: &EnvOverrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse(&raw, overrides)
        .map_err(|e| AppError::Config(format!("{} in {}", e, path.display())))
}

fn parse(raw: &str, overrides: &EnvOverrides) -> Result<Config, String> {
    let parsed: RawConfig = toml::from_str(raw).map_err(|e| format!("parse error: {e}"))?;

    let q = parsed.queue;
    let port = match overrides.port.as_deref() {
        Some(p) => p
            .parse::<u16>()
            .map_err(|e| format!("invalid RABBITMQ_PORT {p:?}: {e}"))?,
        None => q.port,
    };
    let name = overrides.queue.clone().unwrap_or(q.name);
    if name.is_empty() {
        return Err("queue name must not be empty".into());
    }
    if q.backoff_secs == 0 {
        return Err("queue.backoff_secs must be at least 1".into());
    }

    Ok(Config {
        name: parsed.kernel.name,
        log_level: overrides.log_level.clone().unwrap_or(parsed.kernel.log_level),
        queue: QueueConfig {
            host: overrides.host.clone().unwrap_or(q.host),
            port,
            user: overrides.user.clone().unwrap_or(q.user),
            password: overrides.password.clone().unwrap_or_else(default_password),
            vhost: q.vhost,
            name,
            durable: q.durable,
            backoff: Duration::from_secs(q.backoff_secs),
            reject: q.reject,
        },
        enabled_plugins: parsed.plugins.enabled,
    })
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// In-memory defaults for tests; no file, no env.
#[cfg(test)]
impl QueueConfig {
    pub fn test_default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: default_password(),
            vhost: default_vhost(),
            name: "test-queue".into(),
            durable: true,
            backoff: Duration::from_secs(5),
            reject: RejectPolicy::DeadLetter,
        }
    }
}
