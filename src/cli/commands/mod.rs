//! CLI command implementations.

pub mod evaluate;
pub mod run;
pub mod runs;
pub mod transfer;
