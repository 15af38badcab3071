//! Parley - streaming LLM chat with per-user conversation history
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `providers`: Generation provider abstraction and implementations (Gemini, Ollama)
//! - `relay`: Turns a provider's fragment stream into chunks with token accounting
//! - `identity`: Who is signed in, backed by the auth service or a fixed local user
//! - `storage`: Persistence backends (SQLite, in-memory)
//! - `store`: Owner-scoped conversation and message operations
//! - `gate`: Route-level session checks and redirects
//! - `chat`: One chat turn end to end
//! - `server`: HTTP pages, conversation API and the reply event stream
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use parley::chat::ChatSession;
//! use parley::identity::StaticIdentity;
//! use parley::providers::create_provider;
//! use parley::relay::ResponseRelay;
//! use parley::storage::SqliteBackend;
//! use parley::store::ConversationStore;
//! use parley::Config;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let store = ConversationStore::new(
//!         Arc::new(SqliteBackend::new()?),
//!         Arc::new(StaticIdentity::user("local")),
//!     );
//!     let relay = ResponseRelay::new(create_provider(&config.provider, None)?);
//!     let session = ChatSession::new(store, relay);
//!     session.send(None, "Hello!", |chunk| print!("{}", chunk.fragment)).await?;
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod gate;
pub mod identity;
pub mod providers;
pub mod relay;
pub mod server;
pub mod storage;
pub mod store;

// Re-export commonly used types
pub use chat::{ChatSession, TurnOutcome};
pub use config::Config;
pub use error::{ParleyError, Result};
pub use relay::{ResponseRelay, StreamChunk};
pub use store::ConversationStore;
