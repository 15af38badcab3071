//! Generation provider trait and shared types
//!
//! A generation provider accepts a prompt and returns a forward-only, finite
//! sequence of text fragments. Beyond that contract the provider is opaque:
//! it eventually yields zero or more fragments, then ends or errors.

use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Incremental text fragments produced by a provider, in arrival order
///
/// Dropping the stream abandons the underlying connection.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Provider trait for streaming text generation
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use parley::error::Result;
/// use parley::providers::{FragmentStream, GenerationProvider};
///
/// struct Echo;
///
/// #[async_trait]
/// impl GenerationProvider for Echo {
///     async fn stream(&self, prompt: &str) -> Result<FragmentStream> {
///         let fragments = vec![Ok(prompt.to_string())];
///         Ok(Box::pin(futures::stream::iter(fragments)))
///     }
///
///     fn name(&self) -> &'static str {
///         "echo"
///     }
///
///     fn model(&self) -> String {
///         "echo-1".to_string()
///     }
/// }
/// ```
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Open a generation stream for a single prompt
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::ProviderUnavailable`](crate::error::ParleyError::ProviderUnavailable)
    /// when the request cannot be issued or is rejected. Failures after the
    /// stream has started are delivered as error items of the stream.
    async fn stream(&self, prompt: &str) -> Result<FragmentStream>;

    /// Short provider identifier ("gemini", "ollama")
    fn name(&self) -> &'static str;

    /// Model the provider streams from
    fn model(&self) -> String;
}

/// Sampling parameters sent with each generation request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    /// Sampling temperature
    pub temperature: f32,
    /// Top-k sampling
    pub top_k: u32,
    /// Nucleus sampling
    pub top_p: f32,
    /// Maximum tokens generated per reply
    pub max_output_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 1,
            top_p: 1.0,
            max_output_tokens: 2048,
        }
    }
}
