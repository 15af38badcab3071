//! Command-line interface definition for Parley
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for serving the web surface, chatting from the
//! terminal, and managing stored conversations.

use clap::{Parser, Subcommand};

/// Parley - streaming LLM chat with persistent history
#[derive(Parser, Debug, Clone)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Parley
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP server (session gate, conversation API, reply stream)
    Serve {
        /// Override the bind address from config
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Start an interactive chat in the terminal
    Chat {
        /// Override the provider from config (gemini, ollama)
        #[arg(short, long)]
        provider: Option<String>,

        /// Start a new conversation instead of resuming the active one
        #[arg(short, long)]
        new: bool,

        /// Continue a specific conversation by ID
        #[arg(long, conflicts_with = "new")]
        conversation: Option<String>,
    },

    /// Manage stored conversations
    History {
        /// History subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },
}

/// Conversation history subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// List conversations, most recently updated first
    List,

    /// Print the messages of a conversation
    Show {
        /// Conversation ID (or a unique prefix)
        id: String,
    },

    /// Rename a conversation
    Rename {
        /// Conversation ID (or a unique prefix)
        id: String,

        /// New title
        title: String,
    },

    /// Delete a conversation and its messages
    Delete {
        /// Conversation ID (or a unique prefix)
        id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            command: Commands::History {
                command: HistoryCommand::List,
            },
        }
    }
}
