//! Domain models
//!
//! Plain data carried between the optimizer, the sandbox and the checkpoint store.
pub mod config;
pub mod generation;
pub mod program;
pub mod run;

pub use config::{
    Config, GeneratorConfig, GeneratorProvider, HarnessKind, LanguageModelConfig, PathsConfig,
    RuntimeConfig, SandboxConfig, UtilityConfig,
};
pub use generation::GenerationRequest;
pub use program::{ArtifactRole, EvalMode, EvaluatePolicy};
pub use run::{IterationOutcome, IterationRecord, LoopPhase, RunId, RunState, RunSummary};
