//! Generator port - interface for generative text services.

use async_trait::async_trait;

use crate::domain::errors::GenerationError;
use crate::domain::models::GenerationRequest;

/// A generative text service.
///
/// Implementations answer one request with up to `request.n_responses` texts.
/// Budgets and caching are layered on top by the language model service, so
/// adapters only talk to the backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Get the generator name.
    fn name(&self) -> &'static str;

    /// Produce responses for a request, in order.
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>, GenerationError>;
}
