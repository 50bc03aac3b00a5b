//! Plugin kernel consumer entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Register compiled-in plugins
//!   6. Connect to the broker
//!   7. Spawn Ctrl-C → shutdown signal watcher
//!   8. Run the consume loop until shutdown

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use plugin_kernel::config;
use plugin_kernel::consumer::Consumer;
use plugin_kernel::error::AppError;
use plugin_kernel::kernel::Registry;
use plugin_kernel::logger;
use plugin_kernel::plugins;
use plugin_kernel::transport::QueueTransport;
use plugin_kernel::transport::amqp::AmqpTransport;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();
    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::check(effective_log_level)?;
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        name = %config.name,
        host = %config.queue.host,
        port = config.queue.port,
        queue = %config.queue.name,
        "config loaded"
    );

    let selected = plugins::select(plugins::builtin(), &config.enabled_plugins);
    for wanted in &config.enabled_plugins {
        if !selected.iter().any(|p| p.name() == wanted.as_str()) {
            warn!(plugin = %wanted, "enabled plugin is not compiled in");
        }
    }
    let registry = Registry::from_plugins(selected)?;
    if registry.is_empty() {
        return Err(AppError::Config("no plugins registered".into()));
    }
    for name in registry.names() {
        info!(plugin = %name, "plugin loaded");
    }

    let amqp = Arc::new(AmqpTransport::connect(&config.queue, &config.name).await?);
    let transport: Arc<dyn QueueTransport> = amqp.clone();

    // Shared shutdown token. Ctrl-C cancels it, the consume loop watches it.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    let consumer = Consumer::new(transport, Arc::new(registry), &config.queue);
    let result = consumer.run(shutdown).await;

    amqp.close().await;
    let stats = result?;
    info!(acked = stats.acked, rejected = stats.rejected, "shutdown complete");
    Ok(())
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: plugin-kernel [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv              Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            other => eprintln!("warning: ignoring unknown argument {other:?}"),
        }
    }

    //   -v   → info
    //   -vv  → debug (routing, dropped arguments, empty polls)
    //   -vvv → trace
    let log_level = match verbosity {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path }
}
