//! Utility adapters.

pub mod program;

pub use program::ProgramUtility;
