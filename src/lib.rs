//! metaopt - a sandboxed, budgeted self-improving code optimizer
//!
//! Candidate programs are source text produced by a generative service. An
//! *improver* program takes a candidate, a budgeted utility and a budgeted
//! language model, and returns a better candidate. The optimizer runs the
//! improver in isolated worker processes, re-scores what comes back, and in
//! iterative mode lets an accepted candidate improve the next one.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, ports and the error taxonomy
//! - **Adapters** (`adapters`): generative services, interpreters, scoring programs
//! - **Service Layer** (`services`): sandbox, budgets, evaluation and the loop
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging, artifacts, tasks
//! - **Application Layer** (`application`): composition for the CLI
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{OptimizationSession, RunStart};
pub use domain::errors::{
    AttemptError, CheckpointError, EvaluationError, GenerationError, LoadError, SandboxError,
    SandboxViolation,
};
pub use domain::models::{Config, EvalMode, EvaluatePolicy, RunId, RunSummary};
pub use domain::ports::{Generator, Runtime, Utility, UtilityScore};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{MetaOptimizer, MetaUtility, SandboxExecutor, UtilityEvaluator};
