//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces that adapters implement:
//! - Generator: the external generative text service
//! - Utility: a scoring function over candidate text
//! - Runtime: the interpreter that materializes and runs candidates
//! - HostCapabilities: host-side services callable from inside a worker
pub mod capabilities;
pub mod generator;
pub mod runtime;
pub mod utility;

pub use capabilities::{HostCapabilities, NoCapabilities};
pub use generator::Generator;
pub use runtime::{Materialized, Runtime};
pub use utility::{Utility, UtilityScore};
