//! bisync library: Exposes the binary's modules for testing.
//!
//! This is a thin library layer over the CLI components,
//! allowing integration tests to access internal types.

pub mod app;
pub mod config;
pub mod native_fs;

// Re-export key types for convenience
pub use app::{App, EndpointStatus, log_events};
pub use config::{Config, ConfigError, EndpointConfig, EndpointKind};
pub use native_fs::NativeFs;
