//! In-process fake generation provider for unit and integration tests
//!
//! [`FakeProvider`] replays a fixed script of fragments, pauses, and failures
//! instead of talking to a model. Pauses use `tokio::time::sleep`, so tests
//! running with a paused clock observe exact elapsed times.
//!
//! Only built for this crate's own tests and with the `test-util` feature.
//!
//! # Example
//!
//! ```
//! use futures::StreamExt;
//! use parley::providers::fake::FakeProvider;
//! use parley::providers::GenerationProvider;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let provider = FakeProvider::new(["Hel", "lo!"]);
//! let fragments: Vec<String> = provider
//!     .stream("hi")
//!     .await
//!     .unwrap()
//!     .map(|f| f.unwrap())
//!     .collect()
//!     .await;
//! assert_eq!(fragments, vec!["Hel", "lo!"]);
//! assert_eq!(provider.prompts(), vec!["hi"]);
//! # }
//! ```

use crate::error::{ParleyError, Result};
use crate::providers::{FragmentStream, GenerationProvider};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// One step of a fake provider script
#[derive(Debug, Clone, PartialEq)]
pub enum FakeStep {
    /// Emit a text fragment
    Fragment(String),
    /// Wait before the next step
    Delay(Duration),
    /// Fail the stream with an upstream error
    Fail(String),
}

/// Scripted generation provider
#[derive(Debug, Default)]
pub struct FakeProvider {
    script: Vec<FakeStep>,
    open_error: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl FakeProvider {
    /// Emit the given fragments back to back
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(
            fragments
                .into_iter()
                .map(|f| FakeStep::Fragment(f.into()))
                .collect(),
        )
    }

    /// Replay an explicit script
    pub fn with_script(script: Vec<FakeStep>) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    /// Reject every stream request with `ProviderUnavailable`
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            open_error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Prompts received so far, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }

    /// Number of stream requests received
    pub fn calls(&self) -> usize {
        self.prompts().len()
    }
}

#[async_trait]
impl GenerationProvider for FakeProvider {
    async fn stream(&self, prompt: &str) -> Result<FragmentStream> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        if let Some(message) = &self.open_error {
            return Err(ParleyError::ProviderUnavailable(message.clone()).into());
        }

        let script = self.script.clone();
        Ok(Box::pin(async_stream::stream! {
            for step in script {
                match step {
                    FakeStep::Fragment(text) => yield Ok(text),
                    FakeStep::Delay(duration) => tokio::time::sleep(duration).await,
                    FakeStep::Fail(message) => {
                        yield Err(anyhow::Error::from(ParleyError::UpstreamStream(message)));
                        return;
                    }
                }
            }
        }))
    }

    fn name(&self) -> &'static str {
        "fake"
    }

    fn model(&self) -> String {
        "fake-model".to_string()
    }
}
