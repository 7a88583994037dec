use serde::{Deserialize, Serialize};

/// A single request to the generative service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// System role text
    pub role: String,
    /// User message
    pub message: String,
    /// Number of independent responses wanted (at least 1)
    pub n_responses: u32,
    /// Sampling temperature
    pub temperature: f64,
}

impl GenerationRequest {
    /// Create a request for `n_responses` completions of `message`.
    pub fn new(
        role: impl Into<String>,
        message: impl Into<String>,
        n_responses: u32,
        temperature: f64,
    ) -> Self {
        Self {
            role: role.into(),
            message: message.into(),
            n_responses: n_responses.max(1),
            temperature,
        }
    }
}
