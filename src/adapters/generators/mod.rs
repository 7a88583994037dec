//! Generator adapter implementations.

pub mod anthropic_api;
pub mod mock;

pub use anthropic_api::{AnthropicApiConfig, AnthropicGenerator};
pub use mock::{MockGenerator, MockResponse};
