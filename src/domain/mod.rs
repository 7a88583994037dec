//! Domain layer for metaopt
//!
//! Core vocabulary, error taxonomy and the ports adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{
    AttemptError, CheckpointError, EvaluationError, GenerationError, InvalidRunId, LoadError, SandboxError,
    SandboxViolation,
};
