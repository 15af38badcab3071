use crate::cli::HistoryCommand;
use crate::commands::{local_identity, open_backend};
use crate::config::Config;
use crate::error::{ParleyError, Result};
use crate::storage::Role;
use crate::store::{Conversation, ConversationStore};
use colored::Colorize;
use prettytable::{format, Table};
use std::sync::Arc;

const TITLE_WIDTH: usize = 40;

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn display_title(title: &str) -> String {
    if title.chars().count() > TITLE_WIDTH {
        let cut: String = title.chars().take(TITLE_WIDTH - 3).collect();
        format!("{}...", cut)
    } else {
        title.to_string()
    }
}

fn conversation_table(conversations: &[Conversation]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Messages".bold(),
        "Last Updated".bold()
    ]);

    for conversation in conversations {
        let updated = conversation.updated_at.format("%Y-%m-%d %H:%M").to_string();
        table.add_row(prettytable::row![
            short_id(&conversation.id).cyan(),
            display_title(&conversation.title),
            conversation.message_count,
            updated
        ]);
    }

    table
}

/// Resolve a full id or a unique id prefix as shown by `history list`
pub(crate) async fn resolve_id(store: &ConversationStore, id: &str) -> Result<String> {
    if store.get_conversation(id).await.is_some() {
        return Ok(id.to_string());
    }

    let matches: Vec<String> = store
        .list_conversations()
        .await
        .into_iter()
        .map(|c| c.id)
        .filter(|candidate| candidate.starts_with(id))
        .collect();

    match matches.as_slice() {
        [only] => Ok(only.clone()),
        [] => Err(ParleyError::NotFound(format!("conversation {}", id)).into()),
        _ => Err(ParleyError::Config(format!(
            "Conversation id prefix {} is ambiguous ({} matches)",
            id,
            matches.len()
        ))
        .into()),
    }
}

/// Handle history commands
pub async fn handle_history(config: &Config, command: HistoryCommand) -> Result<()> {
    let store = ConversationStore::new(open_backend(config)?, Arc::new(local_identity(config)));

    match command {
        HistoryCommand::List => {
            let conversations = store.list_conversations().await;

            if conversations.is_empty() {
                println!("{}", "No conversation history found.".yellow());
                return Ok(());
            }

            println!("\nConversation History:");
            conversation_table(&conversations).printstd();
            println!();
            println!(
                "Use {} to continue a conversation.",
                "parley chat --conversation <ID>".cyan()
            );
            println!();
        }
        HistoryCommand::Show { id } => {
            let id = resolve_id(&store, &id).await?;
            let conversation = store
                .get_conversation(&id)
                .await
                .ok_or_else(|| ParleyError::NotFound(format!("conversation {}", id)))?;

            println!("{}", conversation.title.bold());
            println!(
                "{}",
                format!(
                    "{} | {} messages | updated {}",
                    conversation.id,
                    conversation.message_count,
                    conversation.updated_at.format("%Y-%m-%d %H:%M")
                )
                .dimmed()
            );
            println!();

            for message in store.load_messages(&id).await {
                let label = match message.role {
                    Role::User => "you".green().bold(),
                    Role::Assistant => "assistant".cyan().bold(),
                };
                println!("{}: {}", label, message.content);
                println!();
            }
        }
        HistoryCommand::Rename { id, title } => {
            let id = resolve_id(&store, &id).await?;
            if store.rename_conversation(&id, &title).await {
                println!("{}", format!("Renamed conversation {}", id).green());
            } else {
                println!("{}", format!("Could not rename conversation {}", id).red());
            }
        }
        HistoryCommand::Delete { id } => {
            let id = resolve_id(&store, &id).await?;
            if store.delete_conversation(&id).await {
                println!("{}", format!("Deleted conversation {}", id).green());
            } else {
                println!("{}", format!("Could not delete conversation {}", id).red());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use crate::identity::StaticIdentity;
    use crate::storage::MemoryBackend;

    fn store() -> ConversationStore {
        ConversationStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(StaticIdentity::user("local")),
        )
    }

    #[test]
    fn test_display_title_truncates_long_titles() {
        assert_eq!(display_title("short"), "short");
        let long = "t".repeat(45);
        assert_eq!(display_title(&long), format!("{}...", "t".repeat(37)));
    }

    #[test]
    fn test_short_id_handles_short_input() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("0123456789"), "01234567");
    }

    #[tokio::test]
    async fn test_resolve_id_accepts_unique_prefix() {
        let store = store();
        let id = store.create_conversation(Some("one")).await.unwrap();
        assert_eq!(resolve_id(&store, &id).await.unwrap(), id);
        assert_eq!(resolve_id(&store, &id[..8]).await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_resolve_id_unknown_is_not_found() {
        let store = store();
        store.create_conversation(Some("one")).await.unwrap();
        let err = resolve_id(&store, "zzzz").await.unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_resolve_id_empty_prefix_is_ambiguous() {
        let store = store();
        store.create_conversation(Some("one")).await.unwrap();
        store.create_conversation(Some("two")).await.unwrap();
        assert!(resolve_id(&store, "").await.is_err());
    }

    #[test]
    fn test_conversation_table_has_header_and_rows() {
        let now = chrono::Utc::now();
        let conversations = vec![Conversation {
            id: "0123456789abcdef".to_string(),
            user_id: "local".to_string(),
            title: "Trip ideas".to_string(),
            created_at: now,
            updated_at: now,
            message_count: 3,
        }];
        let table = conversation_table(&conversations);
        assert_eq!(table.len(), 2);
    }
}
