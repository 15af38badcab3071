//! Error types for Parley
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Parley operations
///
/// The first four variants form the failure taxonomy shared by the
/// conversation store, the response relay, and the session gate. The
/// remaining variants cover configuration, storage, and transport failures.
#[derive(Error, Debug)]
pub enum ParleyError {
    /// Network or backend failure talking to an external collaborator
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// No identity or session is present
    #[error("Not authenticated")]
    Unauthenticated,

    /// Referenced conversation or message does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generation provider failed while a stream was in flight
    #[error("Upstream stream error: {0}")]
    UpstreamStream(String),

    /// A reply is already being generated for this conversation
    #[error("Conversation is busy: {0}")]
    ConversationBusy(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider-related errors (request construction, bad responses)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Authentication service errors (code exchange, token rejected)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Conversation storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// SQLite errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl ParleyError {
    /// Returns true when the error means "no identity/session"
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }
}

/// Result type alias for Parley operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Find the first `ParleyError` in an `anyhow` chain, if any
pub fn classify(err: &anyhow::Error) -> Option<&ParleyError> {
    err.chain().find_map(|cause| cause.downcast_ref::<ParleyError>())
}
