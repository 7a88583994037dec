//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - Project YAML files plus an optional explicit file
//! - `METAOPT_*` environment variable overrides
//! - Validation after extraction

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
