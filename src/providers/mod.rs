//! Provider module for Parley
//!
//! This module contains the generation provider abstraction and the
//! streaming implementations for Google Gemini and Ollama.

pub mod base;
pub mod decode;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod gemini;
pub mod ollama;

pub use base::{FragmentStream, GenerationProvider, GenerationSettings};
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;

use crate::config::ProviderConfig;
use crate::error::{ParleyError, Result};
use std::sync::Arc;

/// Create a provider instance based on configuration
///
/// # Arguments
///
/// * `config` - Provider configuration
/// * `provider_override` - Optional provider type overriding `config.provider_type`
///
/// # Errors
///
/// Returns error if the provider type is unknown or initialization fails
///
/// # Examples
///
/// ```
/// use parley::config::ProviderConfig;
/// use parley::providers::create_provider;
///
/// let config = ProviderConfig::default();
/// let provider = create_provider(&config, Some("ollama")).unwrap();
/// assert_eq!(provider.name(), "ollama");
/// ```
pub fn create_provider(
    config: &ProviderConfig,
    provider_override: Option<&str>,
) -> Result<Arc<dyn GenerationProvider>> {
    let provider_type = provider_override.unwrap_or(&config.provider_type);

    match provider_type {
        "gemini" => Ok(Arc::new(GeminiProvider::new(config.gemini.clone())?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config.ollama.clone())?)),
        _ => Err(ParleyError::Provider(format!("Unknown provider type: {}", provider_type)).into()),
    }
}
