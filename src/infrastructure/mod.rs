//! Infrastructure layer module
//!
//! Filesystem and process-level concerns behind the services:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Run artifact persistence
//! - Task directory lookups

pub mod checkpoint;
pub mod config;
pub mod logging;
pub mod tasks;
