//! Text generation collaborator
//!
//! The executor only sees [`TextGenerator`]: a prompt goes in, a stream of
//! raw text fragments comes out. Dropping the stream cancels generation.

pub mod openai;
pub mod retry;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::GenerationError;

pub use openai::OpenAiCompatibleGenerator;
pub use retry::{with_retry, IsRetryable, RetryConfig};

/// Lazily produced text fragments
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Start generating an answer for `prompt`
    ///
    /// Errors returned here happen before any fragment was produced.
    async fn generate(&self, prompt: &str) -> Result<FragmentStream, GenerationError>;
}
