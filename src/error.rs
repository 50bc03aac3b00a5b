//! Application-wide error types.
//!
//! Layer-specific errors live next to the code that raises them
//! ([`crate::kernel::DispatchError`], [`crate::kernel::DecodeError`],
//! [`crate::transport::TransportError`], [`crate::plugins::PluginError`]).
//! [`AppError`] is what startup and the consume loop hand back to `main`.

use thiserror::Error;

use crate::kernel::registry::RegistryError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
