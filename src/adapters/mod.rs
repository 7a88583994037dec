//! Adapters for external systems.
//!
//! - `generators`: generative text services
//! - `runtimes`: interpreters that run candidate programs
//! - `utilities`: scoring functions

pub mod generators;
pub mod runtimes;
pub mod utilities;
