// Library root. Exposes the kernel for integration tests and embedders.
// The binary entry point is src/main.rs.

pub mod config;
pub mod consumer;
pub mod error;
pub mod kernel;
pub mod logger;
pub mod plugins;
pub mod transport;
