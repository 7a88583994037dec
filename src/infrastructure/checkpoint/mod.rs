//! Run artifact persistence
//!
//! One directory per run under the results root:
//! - `seed_algorithm_<i>.<ext>` / `improved_algorithm_<i>.<ext>` per iteration
//! - `base_algorithm_<elapsed>_<trial>.<ext>` / `improved_algorithm_<elapsed>_<trial>.<ext>` meta-utility samples
//! - `meta_utility_log.txt`, append-only `val,test` lines
//! - `usage_log.jsonl`, generation calls

pub mod store;

pub use store::{CheckpointStore, RunInfo, ScoreEntry, ScoreLog};
