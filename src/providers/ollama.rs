//! Ollama provider implementation for Parley
//!
//! Connects to a local or remote Ollama server and streams chat completions
//! from `/api/chat`. Ollama frames its streamed output as one JSON object per
//! line, the last of which carries `done: true`.

use crate::config::OllamaConfig;
use crate::error::{ParleyError, Result};
use crate::providers::decode::json_lines;
use crate::providers::{FragmentStream, GenerationProvider};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ollama API provider
///
/// # Examples
///
/// ```
/// use parley::config::OllamaConfig;
/// use parley::providers::OllamaProvider;
///
/// let config = OllamaConfig {
///     host: "http://localhost:11434".to_string(),
///     model: "llama3.2:latest".to_string(),
/// };
/// let provider = OllamaProvider::new(config);
/// assert!(provider.is_ok());
/// ```
pub struct OllamaProvider {
    client: Client,
    config: OllamaConfig,
}

/// Request structure for Ollama API
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

/// Message structure for Ollama API
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
}

/// One line of the streamed `/api/chat` response
#[derive(Debug, Deserialize)]
struct OllamaStreamLine {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// What a single response line contributes to the fragment stream
#[derive(Debug, PartialEq)]
enum LineOutcome {
    Fragment(String),
    Skip,
    Done,
}

impl OllamaProvider {
    /// Create a new Ollama provider instance
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ParleyError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!(
            "Initialized Ollama provider: host={}, model={}",
            config.host,
            config.model
        );

        Ok(Self { client, config })
    }

    /// Get the configured Ollama host
    pub fn host(&self) -> &str {
        &self.config.host
    }
}

fn parse_line(line: &str) -> Result<LineOutcome> {
    let parsed: OllamaStreamLine = serde_json::from_str(line).map_err(|e| {
        ParleyError::UpstreamStream(format!("Failed to parse Ollama stream line: {}", e))
    })?;

    if let Some(error) = parsed.error {
        return Err(ParleyError::UpstreamStream(format!("Ollama returned error: {}", error)).into());
    }

    let content = parsed.message.map(|m| m.content).unwrap_or_default();
    Ok(match (content.is_empty(), parsed.done) {
        (false, _) => LineOutcome::Fragment(content),
        (true, true) => LineOutcome::Done,
        (true, false) => LineOutcome::Skip,
    })
}

#[async_trait]
impl GenerationProvider for OllamaProvider {
    async fn stream(&self, prompt: &str) -> Result<FragmentStream> {
        let url = format!("{}/api/chat", self.config.host.trim_end_matches('/'));
        let request = OllamaRequest {
            model: self.config.model.clone(),
            messages: vec![OllamaMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: true,
        };

        tracing::debug!("Opening Ollama stream: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Failed to reach Ollama: {}", e);
                ParleyError::ProviderUnavailable(format!("Failed to connect to Ollama server: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Ollama returned error {}: {}", status, error_text);
            return Err(ParleyError::ProviderUnavailable(format!(
                "Ollama returned error {}: {}",
                status, error_text
            ))
            .into());
        }

        let fragments = json_lines(response.bytes_stream())
            .map(|line| line.and_then(|l| parse_line(&l)))
            .take_while(|outcome| {
                futures::future::ready(!matches!(outcome, Ok(LineOutcome::Done)))
            })
            .filter_map(|outcome| async move {
                match outcome {
                    Ok(LineOutcome::Fragment(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                }
            });

        Ok(Box::pin(fragments))
    }

    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> String {
        self.config.model.clone()
    }
}
