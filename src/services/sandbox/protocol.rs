//! Newline-delimited JSON protocol spoken between the host and a worker.
//!
//! The host writes one `invoke` line. The worker answers with any number of
//! `call` lines (each answered by a `reply`) and finishes with a `result` or
//! an `error` line. Anything on stdout that is not a protocol message is
//! ignored.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Key marking an argument as a capability descriptor.
pub const CAPABILITY_KEY: &str = "$capability";

/// Arguments for one worker invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    pub args: Vec<Value>,
}

impl Invocation {
    pub const fn new() -> Self {
        Self { args: Vec::new() }
    }

    /// Append a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    #[must_use]
    pub fn args(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.args.extend(values);
        self
    }
}

/// Descriptor for the utility capability handed to an improver.
pub fn utility_capability(budget: u32, description: &str) -> Value {
    json!({
        CAPABILITY_KEY: "utility",
        "budget": budget,
        "description": description,
    })
}

/// Descriptor for the language model capability handed to an improver.
pub fn language_model_capability(budget: u32, max_responses_per_call: u32) -> Value {
    json!({
        CAPABILITY_KEY: "language_model",
        "budget": budget,
        "max_responses_per_call": max_responses_per_call,
    })
}

/// Messages written by the host.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage<'a> {
    Invoke {
        entry: &'a str,
        module: &'a Path,
        args: &'a [Value],
        disabled_operations: &'a [String],
    },
    #[serde(rename = "reply")]
    ReplyOk { id: u64, ok: Value },
    #[serde(rename = "reply")]
    ReplyError { id: u64, error: String },
}

impl HostMessage<'_> {
    /// Serialize as one protocol line, newline included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Why a worker gave up without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerErrorKind {
    /// The candidate could not be imported or lacks the entry function
    Load,
    /// The entry function raised
    Raised,
}

/// Messages read from a worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Call {
        id: u64,
        target: String,
        method: String,
        #[serde(default)]
        params: Value,
    },
    #[serde(rename = "result")]
    Finished {
        #[serde(default)]
        value: Value,
    },
    Error {
        kind: WorkerErrorKind,
        message: String,
    },
}

impl WorkerMessage {
    /// Parse one stdout line; `None` when the line is not a protocol message.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }
}
