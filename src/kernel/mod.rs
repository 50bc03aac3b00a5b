//! Dispatch kernel: registry, message decoding and per-message routing.

pub mod dispatch;
pub mod message;
pub mod registry;

pub use dispatch::{DispatchError, DispatchOutcome, InvocationResult, dispatch};
pub use message::{DecodeError, Entry, Message};
pub use registry::{RegisteredPlugin, Registry, RegistryError};
