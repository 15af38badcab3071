//! Google Gemini provider implementation for Parley
//!
//! Streams completions from the Gemini `streamGenerateContent` endpoint using
//! its SSE framing (`alt=sse`). Every request is a single-turn chat with no
//! history: the prompt is the only content sent.

use crate::config::GeminiConfig;
use crate::error::{ParleyError, Result};
use crate::providers::decode::sse_data_events;
use crate::providers::{FragmentStream, GenerationProvider, GenerationSettings};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gemini API provider
///
/// # Examples
///
/// ```no_run
/// use futures::StreamExt;
/// use parley::config::GeminiConfig;
/// use parley::providers::{GeminiProvider, GenerationProvider};
///
/// # async fn example() -> parley::error::Result<()> {
/// let config = GeminiConfig {
///     api_key: Some("key".to_string()),
///     ..Default::default()
/// };
/// let provider = GeminiProvider::new(config)?;
/// let mut fragments = provider.stream("Hello!").await?;
/// while let Some(fragment) = fragments.next().await {
///     print!("{}", fragment?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    settings: GenerationSettings,
}

/// Request body for `streamGenerateContent`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationSettings,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

/// One SSE event of the streamed response
#[derive(Debug, Deserialize)]
struct GeminiStreamEvent {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    error: Option<GeminiApiError>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiApiError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider instance
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no API key is set, or a provider
    /// error if the HTTP client cannot be built
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ParleyError::Config(
                    "Gemini API key is not set (provider.gemini.api_key or PARLEY_GEMINI_API_KEY)"
                        .to_string(),
                )
            })?;

        // No overall request timeout: a reply streams for as long as the model talks.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ParleyError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!("Initialized Gemini provider: model={}", config.model);

        Ok(Self {
            client,
            api_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model,
            settings: GenerationSettings {
                temperature: config.temperature,
                top_k: config.top_k,
                top_p: config.top_p,
                max_output_tokens: config.max_output_tokens,
            },
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.api_base, self.model
        )
    }
}

/// Concatenate the text parts of the first candidate of one stream event
fn event_text(data: &str) -> Result<String> {
    let event: GeminiStreamEvent = serde_json::from_str(data).map_err(|e| {
        ParleyError::UpstreamStream(format!("Failed to parse Gemini stream event: {}", e))
    })?;

    if let Some(error) = event.error {
        return Err(ParleyError::UpstreamStream(format!(
            "Gemini returned error {}: {}",
            error.code, error.message
        ))
        .into());
    }

    Ok(event
        .candidates
        .into_iter()
        .next()
        .map(|candidate| {
            candidate
                .content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default())
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    async fn stream(&self, prompt: &str) -> Result<FragmentStream> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: self.settings,
        };

        tracing::debug!(model = %self.model, prompt_chars = prompt.chars().count(), "Opening Gemini stream");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Failed to reach Gemini: {}", e);
                ParleyError::ProviderUnavailable(format!("Failed to reach Gemini: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Gemini returned error {}: {}", status, error_text);
            return Err(ParleyError::ProviderUnavailable(format!(
                "Gemini returned error {}: {}",
                status, error_text
            ))
            .into());
        }

        let fragments = sse_data_events(response.bytes_stream()).filter_map(|event| async move {
            match event.and_then(|data| event_text(&data)) {
                Ok(text) if text.is_empty() => None,
                other => Some(other),
            }
        });

        Ok(Box::pin(fragments))
    }

    fn name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}
