//! Tracing setup for the consumer binary.
//!
//! `kernel.log_level` (or `-v`) is either a bare level or a full `EnvFilter`
//! directive. A bare level is widened with `lapin=warn` so broker heartbeat
//! chatter does not drown the per-delivery logs; a directive is used as given.
//! Everything goes to stderr.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Install the global subscriber.
///
/// With `prefer_level` the given level wins over `RUST_LOG` (used for `-v`
/// flags); otherwise `RUST_LOG` wins and the level is the fallback.
pub fn init(level: &str, prefer_level: bool) -> Result<(), AppError> {
    let filter = build_filter(&directive_for(level), prefer_level)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}

/// Reject a level or directive that would not produce a usable filter.
///
/// Bare words must be level names, since `EnvFilter` would otherwise
/// read `"verbose"` as a target name and accept it.
pub fn check(level: &str) -> Result<(), AppError> {
    if is_directive(level) {
        EnvFilter::try_new(level)
            .map(drop)
            .map_err(|e| AppError::Logger(format!("invalid log directive '{level}': {e}")))
    } else {
        parse_level(level).map(drop)
    }
}

/// Parse a bare level name.
fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

fn is_directive(level: &str) -> bool {
    level.contains(['=', ','])
}

fn directive_for(level: &str) -> String {
    if is_directive(level) || level.eq_ignore_ascii_case("trace") {
        level.to_string()
    } else {
        format!("{level},lapin=warn")
    }
}

fn build_filter(directive: &str, prefer_level: bool) -> Result<EnvFilter, AppError> {
    if prefer_level {
        EnvFilter::try_new(directive).or_else(|level_err| {
            EnvFilter::try_from_default_env().map_err(|env_err| {
                AppError::Logger(format!(
                    "invalid log level '{directive}': {level_err}; RUST_LOG parse failed: {env_err}"
                ))
            })
        })
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(directive))
            .map_err(|e| AppError::Logger(format!("invalid log level '{directive}': {e}")))
    }
}
