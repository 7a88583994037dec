//! Host capabilities port - services a worker may call back into.

use async_trait::async_trait;
use serde_json::Value;

/// Dispatches `call` messages arriving from a worker.
///
/// Errors are returned as plain messages; they travel back to the worker as
/// an error reply and become an exception inside the candidate.
#[async_trait]
pub trait HostCapabilities: Send + Sync {
    /// Handle `target.method(params)`.
    async fn call(&self, target: &str, method: &str, params: Value) -> Result<Value, String>;
}

/// Capabilities for workers that receive none.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapabilities;

#[async_trait]
impl HostCapabilities for NoCapabilities {
    async fn call(&self, target: &str, method: &str, _params: Value) -> Result<Value, String> {
        Err(format!("capability `{target}.{method}` is not available"))
    }
}
