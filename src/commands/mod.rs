/*!
Command handlers for the CLI

- `serve`: HTTP server with the session gate, conversation API and reply stream
- `chat`: Interactive chat in the terminal
- `history`: List, show, rename and delete stored conversations

Terminal commands run as a single local user: `auth.local_user` when set,
otherwise `local`.
*/

use crate::config::Config;
use crate::error::Result;
use crate::identity::StaticIdentity;
use crate::storage::{PersistenceBackend, SqliteBackend};
use std::sync::Arc;

// Conversation history management
pub mod history;

/// User id for terminal commands when none is configured
pub const DEFAULT_LOCAL_USER: &str = "local";

/// Identity used by terminal commands
pub fn local_identity(config: &Config) -> StaticIdentity {
    StaticIdentity::user(
        config
            .auth
            .local_user
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_USER.to_string()),
    )
}

/// Open the configured SQLite database
pub fn open_backend(config: &Config) -> Result<Arc<dyn PersistenceBackend>> {
    let backend = SqliteBackend::open(config.storage.db_path.as_deref())?;
    tracing::debug!("Using conversation database at {}", backend.db_path().display());
    Ok(Arc::new(backend))
}

// Server command handler
pub mod serve {
    //! Runs the HTTP surface until Ctrl-C.

    use super::*;
    use crate::providers::create_provider;
    use crate::relay::{metrics::init_metrics_exporter, ResponseRelay};
    use crate::server;

    /// Start the server
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration
    /// * `bind` - Optional override for `server.bind`
    pub async fn run_serve(config: Config, bind: Option<String>) -> Result<()> {
        let backend = open_backend(&config)?;
        let provider = create_provider(&config.provider, None)?;
        tracing::info!("Serving replies from provider {}", provider.name());

        let state = server::build_state(&config, backend, ResponseRelay::new(provider))?;
        init_metrics_exporter();

        let bind = bind.unwrap_or_else(|| config.server.bind.clone());
        server::serve(state, &bind).await
    }
}

// Chat command handler
pub mod chat {
    //! Interactive chat mode handler.
    //!
    //! Resolves a conversation, then runs a readline loop that sends each line
    //! through a [`ChatSession`] and prints the reply as it streams in.

    use super::*;
    use super::history::resolve_id;
    use crate::chat::{ChatSession, TurnOutcome};
    use crate::providers::create_provider;
    use crate::relay::ResponseRelay;
    use crate::storage::Role;
    use crate::store::ConversationStore;
    use colored::Colorize;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;
    use std::io::Write;

    /// Start interactive chat mode
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    /// * `provider_name` - Optional override for the configured provider
    /// * `new` - Start a fresh conversation
    /// * `conversation` - Continue this conversation (full id or unique prefix)
    ///   instead of the active one
    pub async fn run_chat(
        config: Config,
        provider_name: Option<String>,
        new: bool,
        conversation: Option<String>,
    ) -> Result<()> {
        let provider = create_provider(&config.provider, provider_name.as_deref())?;
        let store = ConversationStore::new(open_backend(&config)?, Arc::new(local_identity(&config)));

        let conversation_id = if new {
            None
        } else if let Some(id) = conversation {
            Some(resolve_id(&store, &id).await?)
        } else {
            store.get_or_create_active_conversation(None).await
        };

        let session = ChatSession::new(store, ResponseRelay::new(provider.clone()));
        let mut conversation_id = conversation_id;

        print_welcome_banner(provider.name(), conversation_id.as_deref());
        if let Some(id) = &conversation_id {
            print_transcript(&session, id).await;
        }

        let mut rl = DefaultEditor::new()?;
        loop {
            match rl.readline(&format!("{} ", ">>".green().bold())) {
                Ok(line) => {
                    match line_action(&line) {
                        LineAction::Skip => continue,
                        LineAction::Exit => break,
                        LineAction::Send => {}
                    }
                    rl.add_history_entry(line.as_str())?;

                    let outcome = session
                        .send(conversation_id.as_deref(), &line, |chunk| {
                            print!("{}", chunk.fragment);
                            let _ = std::io::stdout().flush();
                        })
                        .await?;

                    match outcome {
                        TurnOutcome::Completed {
                            conversation_id: id,
                            tokens_per_second,
                            message_id,
                            ..
                        } => {
                            println!();
                            if let Some(tps) = tokens_per_second {
                                println!("{}", format!("{} t/s", tps).dimmed());
                            }
                            if message_id.is_none() {
                                println!("{}", "Reply was not saved to history.".yellow());
                            }
                            conversation_id = Some(id);
                        }
                        TurnOutcome::Failed {
                            conversation_id: id,
                            fallback,
                            error,
                            ..
                        } => {
                            println!();
                            println!("{}", fallback.red());
                            tracing::debug!("Reply error: {}", error);
                            conversation_id = Some(id);
                        }
                        TurnOutcome::Empty => {}
                    }
                    println!();
                }
                Err(ReadlineError::Interrupted) => {
                    println!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    break;
                }
                Err(err) => {
                    eprintln!("Error: {:?}", err);
                    break;
                }
            }
        }

        if let Some(id) = &conversation_id {
            println!("Conversation saved as {}", id.cyan());
        }
        Ok(())
    }

    /// What the prompt loop does with one line of input
    #[derive(Debug, PartialEq, Eq)]
    enum LineAction {
        Skip,
        Exit,
        /// Send the line as typed, surrounding whitespace included
        Send,
    }

    fn line_action(line: &str) -> LineAction {
        match line.trim() {
            "" => LineAction::Skip,
            "exit" | "quit" => LineAction::Exit,
            _ => LineAction::Send,
        }
    }

    fn print_welcome_banner(provider: &str, conversation_id: Option<&str>) {
        println!("{}", "Parley".bold());
        println!("Provider: {}", provider.cyan());
        match conversation_id {
            Some(id) => println!("Conversation: {}", id.cyan()),
            None => println!("Conversation: {}", "new".cyan()),
        }
        println!("Type {} or press Ctrl-D to leave.\n", "exit".bold());
    }

    async fn print_transcript(session: &ChatSession, conversation_id: &str) {
        for message in session.store().load_messages(conversation_id).await {
            match message.role {
                Role::User => println!("{} {}", ">>".green().bold(), message.content),
                Role::Assistant => println!("{}\n", message.content),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_line_action() {
            assert_eq!(line_action(""), LineAction::Skip);
            assert_eq!(line_action("   "), LineAction::Skip);
            assert_eq!(line_action(" exit "), LineAction::Exit);
            assert_eq!(line_action("quit"), LineAction::Exit);
            assert_eq!(line_action("  indented question  "), LineAction::Send);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityProvider;

    async fn user_id(identity: StaticIdentity) -> Option<String> {
        identity.current_identity().await.unwrap().map(|i| i.user_id)
    }

    #[tokio::test]
    async fn test_local_identity_defaults_to_local() {
        let config = Config::default();
        assert_eq!(user_id(local_identity(&config)).await.as_deref(), Some("local"));
    }

    #[tokio::test]
    async fn test_local_identity_uses_configured_user() {
        let mut config = Config::default();
        config.auth.local_user = Some("alice".to_string());
        assert_eq!(user_id(local_identity(&config)).await.as_deref(), Some("alice"));
    }

    #[test]
    fn test_open_backend_uses_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.db_path = Some(dir.path().join("chat.db"));
        open_backend(&config).unwrap();
        assert!(dir.path().join("chat.db").exists());
    }
}
