//! Response relay
//!
//! Drives one streaming generation request and republishes every provider
//! fragment as a [`StreamChunk`] annotated with a running token estimate and a
//! throughput figure. The relay never touches storage: the consumer takes the
//! finalized text from [`RelayStream::into_text`] and persists it.
//!
//! Token counts are approximated as `ceil(chars / 4)` per fragment and summed
//! over the stream. Persisted message token counts use the same estimate, so
//! replacing it with an exact tokenizer changes the meaning of stored data.

pub mod metrics;

use crate::error::{ParleyError, Result};
use crate::providers::GenerationProvider;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;

use self::metrics::RelayMetrics;

/// Estimate the token count of a fragment as `ceil(chars / 4)`
///
/// Characters are Unicode scalar values, not bytes.
///
/// # Examples
///
/// ```
/// use parley::relay::estimate_tokens;
///
/// assert_eq!(estimate_tokens(""), 0);
/// assert_eq!(estimate_tokens("Hel"), 1);
/// assert_eq!(estimate_tokens("Hello"), 2);
/// assert_eq!(estimate_tokens("héllo wörld"), 3);
/// ```
pub fn estimate_tokens(fragment: &str) -> u64 {
    (fragment.chars().count() as u64).div_ceil(4)
}

/// Format a throughput figure with exactly two decimal places
///
/// Elapsed time is measured at millisecond resolution; anything under one
/// millisecond reports `"0.00"`.
///
/// # Examples
///
/// ```
/// use parley::relay::format_throughput;
/// use std::time::Duration;
///
/// assert_eq!(format_throughput(2, Duration::from_secs(2)), "1.00");
/// assert_eq!(format_throughput(10, Duration::from_millis(3000)), "3.33");
/// assert_eq!(format_throughput(5, Duration::ZERO), "0.00");
/// ```
pub fn format_throughput(total_tokens: u64, elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis == 0 {
        return "0.00".to_string();
    }
    let seconds = millis as f64 / 1000.0;
    format!("{:.2}", total_tokens as f64 / seconds)
}

/// One relayed fragment with its metric snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    /// Text fragment exactly as the provider produced it
    pub fragment: String,
    /// Tokens per second since the request was issued, two decimal places
    pub tokens_per_second: String,
    /// Estimated tokens across all fragments so far
    #[serde(rename = "totalTokensSoFar")]
    pub total_tokens: u64,
}

/// Relays generation streams from a single provider
///
/// # Examples
///
/// ```
/// use parley::providers::fake::FakeProvider;
/// use parley::relay::ResponseRelay;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> parley::error::Result<()> {
/// let relay = ResponseRelay::new(Arc::new(FakeProvider::new(["Hel", "lo!"])));
/// let mut stream = relay.relay("Say hello");
/// while let Some(chunk) = stream.next_chunk().await {
///     let chunk = chunk?;
///     print!("{}", chunk.fragment);
/// }
/// assert_eq!(stream.total_tokens(), 2);
/// assert_eq!(stream.into_text(), "Hello!");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ResponseRelay {
    provider: Arc<dyn GenerationProvider>,
}

impl ResponseRelay {
    /// Create a relay over the given provider
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }

    /// The provider this relay streams from
    pub fn provider(&self) -> &Arc<dyn GenerationProvider> {
        &self.provider
    }

    /// Start relaying a prompt
    ///
    /// The returned stream is lazy: nothing is sent to the provider until it is
    /// first polled. An empty or whitespace-only prompt yields no chunks and
    /// never reaches the provider.
    pub fn relay(&self, prompt: &str) -> RelayStream {
        let provider = Arc::clone(&self.provider);
        let prompt = prompt.to_string();

        let chunks = async_stream::stream! {
            if prompt.trim().is_empty() {
                tracing::debug!("Skipping relay for empty prompt");
                return;
            }

            let metrics = RelayMetrics::new(provider.name());
            let started = Instant::now();

            let mut fragments = match provider.stream(&prompt).await {
                Ok(fragments) => fragments,
                Err(e) => {
                    tracing::warn!(provider = provider.name(), "Failed to open generation stream: {:#}", e);
                    metrics.record_error("unavailable");
                    yield Err(e);
                    return;
                }
            };

            let mut total_tokens = 0u64;
            while let Some(item) = fragments.next().await {
                match item {
                    Ok(fragment) => {
                        total_tokens += estimate_tokens(&fragment);
                        let tokens_per_second = format_throughput(total_tokens, started.elapsed());
                        metrics.record_fragment();
                        yield Ok(StreamChunk {
                            fragment,
                            tokens_per_second,
                            total_tokens,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(provider = provider.name(), "Generation stream failed: {:#}", e);
                        metrics.record_error("upstream");
                        yield Err(as_upstream(e));
                        return;
                    }
                }
            }

            let elapsed = started.elapsed();
            tracing::debug!(
                provider = provider.name(),
                total_tokens,
                elapsed_ms = elapsed.as_millis() as u64,
                "Generation stream finished"
            );
            metrics.record_completion(total_tokens, elapsed);
        };

        RelayStream {
            chunks: Box::pin(chunks),
            accumulated: String::new(),
            total_tokens: 0,
            last_throughput: None,
            finished: false,
        }
    }
}

/// Mid-stream failures surface as `UpstreamStream` unless already classified
fn as_upstream(err: anyhow::Error) -> anyhow::Error {
    if err.downcast_ref::<ParleyError>().is_some() {
        err
    } else {
        ParleyError::UpstreamStream(format!("{:#}", err)).into()
    }
}

/// Single-consumer stream of relayed chunks
///
/// Folds every chunk into the accumulated response as it passes through.
/// After an error or the end of the provider stream every further poll
/// returns `None`.
pub struct RelayStream {
    chunks: Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>,
    accumulated: String,
    total_tokens: u64,
    last_throughput: Option<String>,
    finished: bool,
}

impl RelayStream {
    /// Pull the next chunk
    pub async fn next_chunk(&mut self) -> Option<Result<StreamChunk>> {
        self.next().await
    }

    /// Text received so far
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Estimated tokens received so far
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    /// Throughput reported with the most recent chunk
    pub fn last_throughput(&self) -> Option<&str> {
        self.last_throughput.as_deref()
    }

    /// Whether the stream has ended or failed
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume the stream handle, returning the accumulated text
    pub fn into_text(self) -> String {
        self.accumulated
    }
}

impl Stream for RelayStream {
    type Item = Result<StreamChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.chunks.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                this.accumulated.push_str(&chunk.fragment);
                this.total_tokens = chunk.total_tokens;
                this.last_throughput = Some(chunk.tokens_per_second.clone());
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
        }
    }
}

impl std::fmt::Debug for RelayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStream")
            .field("accumulated", &self.accumulated)
            .field("total_tokens", &self.total_tokens)
            .field("last_throughput", &self.last_throughput)
            .field("finished", &self.finished)
            .finish()
    }
}
