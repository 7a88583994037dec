//! Service layer
//!
//! - [`sandbox`]: loading and running untrusted programs
//! - [`language_model`]: budgeted, cached access to the generative service
//! - [`evaluator`]: utility scoring with per-context budgets
//! - [`meta_utility`]: scoring improvers through a downstream task
//! - [`meta_optimizer`]: the improvement loop
//! - [`transfer`]: scoring an improver across tasks

pub mod capabilities;
pub mod code_extract;
pub mod evaluator;
pub mod language_model;
pub mod meta_optimizer;
pub mod meta_utility;
pub mod sandbox;
pub mod transfer;

pub use capabilities::AttemptCapabilities;
pub use code_extract::{extract_code, largest_code_block};
pub use evaluator::{UsageBudget, UtilityEvaluator};
pub use language_model::{GenerationCache, LanguageModel, UsageLog};
pub use meta_optimizer::{generate_seed_algorithm, IterationObserver, MetaOptimizer, OptimizerSettings};
pub use meta_utility::{MetaUtility, MetaUtilitySettings, IMPROVER_ENTRY};
pub use sandbox::SandboxExecutor;
pub use transfer::{TransferEntry, TransferReport};
