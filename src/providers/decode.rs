//! Byte-stream decoders for streaming provider responses
//!
//! Providers return their output as a chunked HTTP body. Gemini frames it as
//! Server-Sent Events, Ollama as newline-delimited JSON. Both decoders buffer
//! raw bytes (so multi-byte characters split across chunks survive) and yield
//! one complete payload at a time, in arrival order.
//!
//! A transport error on the underlying body ends the decoded stream with an
//! [`ParleyError::UpstreamStream`] item.

use crate::error::{ParleyError, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};

/// Decode an SSE body into the `data:` payload of each event
///
/// Field handling:
///
/// - `data:` lines of one event are joined with `\n`.
/// - `event: ping` events and empty payloads are dropped.
/// - `id:`, `retry:` and comment lines (`:`) are ignored.
/// - `\r` is stripped so both `\n\n` and `\r\n\r\n` delimit events.
pub fn sse_data_events<S, E>(byte_stream: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::try_stream! {
        let mut buffer: Vec<u8> = Vec::new();
        tokio::pin!(byte_stream);

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| {
                ParleyError::UpstreamStream(format!("Failed to read event stream: {}", e))
            })?;
            buffer.extend(chunk.iter().filter(|b| **b != b'\r'));

            while let Some(pos) = find_delimiter(&buffer, b"\n\n") {
                let block: Vec<u8> = buffer.drain(..pos + 2).collect();
                if let Some(data) = parse_sse_block(&block[..pos]) {
                    yield data;
                }
            }
        }

        if let Some(data) = parse_sse_block(&buffer) {
            yield data;
        }
    }
}

/// Decode a newline-delimited body into one string per non-empty line
pub fn json_lines<S, E>(byte_stream: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::try_stream! {
        let mut buffer: Vec<u8> = Vec::new();
        tokio::pin!(byte_stream);

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| {
                ParleyError::UpstreamStream(format!("Failed to read response stream: {}", e))
            })?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = find_delimiter(&buffer, b"\n") {
                let line: Vec<u8> = buffer.drain(..pos + 1).collect();
                let line = String::from_utf8_lossy(&line[..pos]).trim().to_string();
                if !line.is_empty() {
                    yield line;
                }
            }
        }

        let rest = String::from_utf8_lossy(&buffer).trim().to_string();
        if !rest.is_empty() {
            yield rest;
        }
    }
}

fn find_delimiter(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Extract the joined `data:` payload of a single SSE event block
fn parse_sse_block(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event_type: Option<&str> = None;

    for line in text.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        } else if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        }
    }

    if event_type.is_some_and(|et| et.eq_ignore_ascii_case("ping")) {
        return None;
    }

    let data = data_lines.join("\n");
    if data.trim().is_empty() {
        None
    } else {
        Some(data)
    }
}
