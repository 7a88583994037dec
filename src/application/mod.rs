//! Application layer: assembles services for the CLI.

pub mod session;

pub use session::{OptimizationSession, RunStart};
