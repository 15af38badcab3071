//! Chat turn orchestration
//!
//! One turn: make sure a conversation exists, store the user's message, title
//! the conversation from its first message, relay the model's reply to the
//! caller chunk by chunk, and store the finished reply.

use crate::error::{ParleyError, Result};
use crate::relay::{estimate_tokens, ResponseRelay, StreamChunk};
use crate::storage::Role;
use crate::store::ConversationStore;

/// Text shown in place of a reply that failed mid-stream
pub const FALLBACK_REPLY: &str = "Sorry, an error occurred. Please try again.";

/// Characters of the first message used as the conversation title
pub const TITLE_CHARS: usize = 50;

/// First `TITLE_CHARS` characters of `input`, and whether it was cut short
fn title_prefix(input: &str) -> (String, bool) {
    let mut chars = input.chars();
    let prefix: String = chars.by_ref().take(TITLE_CHARS).collect();
    (prefix, chars.next().is_some())
}

/// Result of one chat turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply streamed to the end and was stored
    Completed {
        conversation_id: String,
        /// `None` when the reply could not be stored
        message_id: Option<String>,
        text: String,
        total_tokens: u64,
        tokens_per_second: Option<String>,
    },
    /// The reply failed; nothing was stored for the assistant
    Failed {
        conversation_id: String,
        /// Text received before the failure
        partial: String,
        fallback: &'static str,
        error: String,
    },
    /// Blank input; nothing was sent or stored
    Empty,
}

impl TurnOutcome {
    /// Conversation the turn belonged to
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            TurnOutcome::Completed {
                conversation_id, ..
            }
            | TurnOutcome::Failed {
                conversation_id, ..
            } => Some(conversation_id),
            TurnOutcome::Empty => None,
        }
    }
}

/// Couples a conversation store with a response relay
#[derive(Clone)]
pub struct ChatSession {
    store: ConversationStore,
    relay: ResponseRelay,
}

impl ChatSession {
    pub fn new(store: ConversationStore, relay: ResponseRelay) -> Self {
        Self { store, relay }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Run one turn, passing every chunk to `on_chunk` as it arrives
    ///
    /// With no `conversation_id` a new conversation is created.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the given conversation is not visible to the
    /// current identity, and `ProviderUnavailable` if a new conversation could
    /// not be created. Reply failures are reported as [`TurnOutcome::Failed`].
    pub async fn send<F>(
        &self,
        conversation_id: Option<&str>,
        input: &str,
        mut on_chunk: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&StreamChunk) + Send,
    {
        if input.trim().is_empty() {
            return Ok(TurnOutcome::Empty);
        }

        let (title, truncated) = title_prefix(input);

        let (conversation_id, prior_messages) = match conversation_id {
            Some(id) => {
                let conversation = self
                    .store
                    .get_conversation(id)
                    .await
                    .ok_or_else(|| ParleyError::NotFound(format!("conversation {}", id)))?;
                (conversation.id, conversation.message_count)
            }
            None => {
                let id = self
                    .store
                    .create_conversation(Some(&title))
                    .await
                    .ok_or_else(|| {
                        ParleyError::ProviderUnavailable("could not create conversation".to_string())
                    })?;
                (id, 0)
            }
        };

        if self
            .store
            .append_message(&conversation_id, Role::User, input, None)
            .await
            .is_none()
        {
            tracing::warn!(conversation_id = %conversation_id, "User message was not stored");
        }

        if prior_messages == 0 {
            let title = if truncated { format!("{}...", title) } else { title };
            self.store.rename_conversation(&conversation_id, &title).await;
        }

        let mut stream = self.relay.relay(input);
        while let Some(item) = stream.next_chunk().await {
            match item {
                Ok(chunk) => on_chunk(&chunk),
                Err(e) => {
                    tracing::error!(conversation_id = %conversation_id, "Reply failed: {:#}", e);
                    return Ok(TurnOutcome::Failed {
                        conversation_id,
                        partial: stream.into_text(),
                        fallback: FALLBACK_REPLY,
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        let tokens_per_second = stream.last_throughput().map(str::to_string);
        let total_tokens = stream.total_tokens();
        let text = stream.into_text();

        let message_id = self
            .store
            .append_message(
                &conversation_id,
                Role::Assistant,
                &text,
                Some(estimate_tokens(&text)),
            )
            .await;

        Ok(TurnOutcome::Completed {
            conversation_id,
            message_id,
            text,
            total_tokens,
            tokens_per_second,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use crate::identity::StaticIdentity;
    use crate::providers::fake::{FakeProvider, FakeStep};
    use crate::storage::MemoryBackend;
    use std::sync::Arc;

    fn session_with(provider: FakeProvider) -> (ChatSession, Arc<FakeProvider>) {
        let provider = Arc::new(provider);
        let store = ConversationStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(StaticIdentity::user("alice")),
        );
        (
            ChatSession::new(store, ResponseRelay::new(provider.clone())),
            provider,
        )
    }

    #[test]
    fn test_title_prefix() {
        assert_eq!(title_prefix("short"), ("short".to_string(), false));
        let long = "x".repeat(51);
        assert_eq!(title_prefix(&long), ("x".repeat(50), true));
        assert_eq!(title_prefix(&"y".repeat(50)), ("y".repeat(50), false));
    }

    #[tokio::test]
    async fn test_first_turn_creates_titles_and_stores_both_messages() {
        let (session, provider) = session_with(FakeProvider::new(["Hel", "lo!"]));
        let mut seen = Vec::new();
        let outcome = session
            .send(None, "Say hello", |chunk| seen.push(chunk.fragment.clone()))
            .await
            .unwrap();

        assert_eq!(seen, vec!["Hel", "lo!"]);
        assert_eq!(provider.prompts(), vec!["Say hello"]);

        let TurnOutcome::Completed {
            conversation_id,
            message_id,
            text,
            total_tokens,
            ..
        } = outcome
        else {
            panic!("expected completed turn");
        };
        assert_eq!(text, "Hello!");
        assert_eq!(total_tokens, 2);

        let conversation = session.store().get_conversation(&conversation_id).await.unwrap();
        assert_eq!(conversation.title, "Say hello");
        assert_eq!(conversation.message_count, 2);

        let messages = session.store().load_messages(&conversation_id).await;
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello!");
        assert_eq!(messages[1].tokens, Some(2));
        assert_eq!(Some(messages[1].id.clone()), message_id);
    }

    #[tokio::test]
    async fn test_long_first_message_title_is_truncated() {
        let (session, _) = session_with(FakeProvider::new(["ok"]));
        let input = "a".repeat(60);
        let outcome = session.send(None, &input, |_| {}).await.unwrap();
        let id = outcome.conversation_id().unwrap().to_string();
        let conversation = session.store().get_conversation(&id).await.unwrap();
        assert_eq!(conversation.title, format!("{}...", "a".repeat(50)));
    }

    #[tokio::test]
    async fn test_later_turn_keeps_title() {
        let (session, _) = session_with(FakeProvider::new(["ok"]));
        let first = session.send(None, "First question", |_| {}).await.unwrap();
        let id = first.conversation_id().unwrap().to_string();
        session.send(Some(&id), "Second question", |_| {}).await.unwrap();

        let conversation = session.store().get_conversation(&id).await.unwrap();
        assert_eq!(conversation.title, "First question");
        assert_eq!(conversation.message_count, 4);
    }

    #[tokio::test]
    async fn test_existing_empty_conversation_is_titled() {
        let (session, _) = session_with(FakeProvider::new(["ok"]));
        let id = session.store().create_conversation(None).await.unwrap();
        session.send(Some(&id), "Name me", |_| {}).await.unwrap();
        assert_eq!(
            session.store().get_conversation(&id).await.unwrap().title,
            "Name me"
        );
    }

    #[tokio::test]
    async fn test_failed_reply_stores_only_user_message() {
        let (session, _) = session_with(FakeProvider::with_script(vec![
            FakeStep::Fragment("par".to_string()),
            FakeStep::Fail("reset".to_string()),
        ]));
        let outcome = session.send(None, "question", |_| {}).await.unwrap();

        let TurnOutcome::Failed {
            conversation_id,
            partial,
            fallback,
            ..
        } = outcome
        else {
            panic!("expected failed turn");
        };
        assert_eq!(partial, "par");
        assert_eq!(fallback, FALLBACK_REPLY);

        let messages = session.store().load_messages(&conversation_id).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_not_found() {
        let (session, provider) = session_with(FakeProvider::new(["ok"]));
        let err = session.send(Some("missing"), "hi", |_| {}).await.unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::NotFound(_))));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_blank_input_does_nothing() {
        let (session, provider) = session_with(FakeProvider::new(["ok"]));
        let outcome = session.send(None, "   ", |_| {}).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Empty);
        assert_eq!(provider.calls(), 0);
        assert!(session.store().list_conversations().await.is_empty());
    }
}
