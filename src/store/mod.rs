//! Conversation store
//!
//! CRUD facade over a [`PersistenceBackend`], scoped to the identity reported
//! by an [`IdentityProvider`]. Every operation is fallible but non-raising:
//! a missing identity, a backend failure, or a conversation owned by someone
//! else is logged and turned into `None`, `false`, or an empty list.
//!
//! Updates are last-write-wins. Appending a message is two independent writes
//! (insert the message, then touch the parent's `updated_at`); if the second
//! write still fails after one retry the message stays stored with a stale
//! parent timestamp.

use crate::error::Result;
use crate::identity::{Identity, IdentityProvider};
use crate::storage::{ConversationPatch, ConversationRecord, MessageRecord, PersistenceBackend, Role};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Title given to conversations created without a usable hint
pub const DEFAULT_TITLE: &str = "New conversation";

/// Messages are returned exactly as stored
pub type Message = MessageRecord;

/// A conversation with its derived message count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

impl Conversation {
    fn from_record(record: ConversationRecord, message_count: usize) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            title: record.title,
            created_at: record.created_at,
            updated_at: record.updated_at,
            message_count,
        }
    }
}

fn title_or_default(hint: Option<&str>) -> String {
    hint.map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE)
        .to_string()
}

/// Owner-scoped conversation and message store
#[derive(Clone)]
pub struct ConversationStore {
    backend: Arc<dyn PersistenceBackend>,
    identity: Arc<dyn IdentityProvider>,
}

impl ConversationStore {
    /// Create a store over `backend`, scoped by `identity`
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::identity::StaticIdentity;
    /// use parley::storage::{MemoryBackend, Role};
    /// use parley::store::ConversationStore;
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let store = ConversationStore::new(
    ///     Arc::new(MemoryBackend::new()),
    ///     Arc::new(StaticIdentity::user("alice")),
    /// );
    /// let id = store.create_conversation(Some("Trip ideas")).await.unwrap();
    /// store.append_message(&id, Role::User, "Where to?", Some(3)).await.unwrap();
    /// assert_eq!(store.load_messages(&id).await.len(), 1);
    /// # }
    /// ```
    pub fn new(backend: Arc<dyn PersistenceBackend>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { backend, identity }
    }

    /// The same backend scoped to a different identity
    pub fn with_identity(&self, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            identity,
        }
    }

    async fn identity(&self, operation: &str) -> Option<Identity> {
        match self.identity.current_identity().await {
            Ok(Some(identity)) => Some(identity),
            Ok(None) => {
                tracing::warn!(operation, "No authenticated identity");
                None
            }
            Err(e) => {
                tracing::warn!(operation, "Identity lookup failed: {:#}", e);
                None
            }
        }
    }

    /// Log a backend failure and drop the error
    fn soft<T>(&self, operation: &str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(operation, "Conversation store operation failed: {:#}", e);
                None
            }
        }
    }

    /// Resolve a conversation the current identity owns
    async fn owned(&self, operation: &str, id: &str) -> Option<ConversationRecord> {
        let identity = self.identity(operation).await?;
        let record = self.soft(operation, self.backend.find_conversation(id))??;
        if record.user_id != identity.user_id {
            tracing::warn!(operation, conversation_id = id, "Conversation not owned by caller");
            return None;
        }
        Some(record)
    }

    /// The most recently created conversation, or a new one
    ///
    /// Selection is by creation time, not by last activity.
    pub async fn get_or_create_active_conversation(&self, title_hint: Option<&str>) -> Option<String> {
        let identity = self.identity("get_or_create_active_conversation").await?;

        let latest = self.soft(
            "get_or_create_active_conversation",
            self.backend.latest_conversation_by_created(&identity.user_id),
        )?;
        if let Some(record) = latest {
            tracing::debug!(conversation_id = %record.id, "Reusing latest conversation");
            return Some(record.id);
        }

        self.insert_conversation(&identity, title_hint)
    }

    /// Create a new conversation
    pub async fn create_conversation(&self, title_hint: Option<&str>) -> Option<String> {
        let identity = self.identity("create_conversation").await?;
        self.insert_conversation(&identity, title_hint)
    }

    fn insert_conversation(&self, identity: &Identity, title_hint: Option<&str>) -> Option<String> {
        let now = Utc::now();
        let record = ConversationRecord {
            id: Uuid::new_v4().to_string(),
            user_id: identity.user_id.clone(),
            title: title_or_default(title_hint),
            created_at: now,
            updated_at: now,
        };
        self.soft("create_conversation", self.backend.insert_conversation(&record))?;
        tracing::info!(conversation_id = %record.id, "Created conversation");
        Some(record.id)
    }

    /// Append a message and touch the parent conversation
    ///
    /// Returns the new message id. The message stays stored even when the
    /// parent timestamp cannot be updated.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        token_estimate: Option<u64>,
    ) -> Option<String> {
        self.owned("append_message", conversation_id).await?;

        let record = MessageRecord {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            tokens: token_estimate,
            created_at: Utc::now(),
        };
        self.soft("append_message", self.backend.insert_message(&record))?;

        if !self.touch(conversation_id) && !self.touch(conversation_id) {
            tracing::warn!(
                conversation_id,
                message_id = %record.id,
                "Message stored but conversation timestamp not updated"
            );
        }

        Some(record.id)
    }

    /// Set the conversation's updated timestamp to now
    ///
    /// Safe to repeat.
    pub async fn touch_conversation(&self, conversation_id: &str) -> bool {
        if self.owned("touch_conversation", conversation_id).await.is_none() {
            return false;
        }
        self.touch(conversation_id)
    }

    fn touch(&self, conversation_id: &str) -> bool {
        let patch = ConversationPatch {
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        self.soft(
            "touch_conversation",
            self.backend.update_conversation(conversation_id, &patch),
        )
        .unwrap_or(false)
    }

    /// Change the title; the updated timestamp moves with it
    pub async fn rename_conversation(&self, conversation_id: &str, new_title: &str) -> bool {
        let title = new_title.trim();
        if title.is_empty() {
            tracing::warn!(conversation_id, "Refusing to set an empty title");
            return false;
        }
        if self.owned("rename_conversation", conversation_id).await.is_none() {
            return false;
        }

        let patch = ConversationPatch {
            title: Some(title.to_string()),
            updated_at: Some(Utc::now()),
        };
        self.soft(
            "rename_conversation",
            self.backend.update_conversation(conversation_id, &patch),
        )
        .unwrap_or(false)
    }

    /// Conversations of the current identity, most recently updated first
    ///
    /// Counts are fetched one conversation at a time; a failed count is
    /// reported as zero.
    pub async fn list_conversations(&self) -> Vec<Conversation> {
        let Some(identity) = self.identity("list_conversations").await else {
            return Vec::new();
        };

        let records = self
            .soft(
                "list_conversations",
                self.backend.conversations_by_updated(&identity.user_id),
            )
            .unwrap_or_default();

        records
            .into_iter()
            .map(|record| {
                let count = self
                    .soft("list_conversations", self.backend.count_messages(&record.id))
                    .unwrap_or(0);
                Conversation::from_record(record, count)
            })
            .collect()
    }

    /// Look up one conversation with its message count
    pub async fn get_conversation(&self, conversation_id: &str) -> Option<Conversation> {
        let record = self.owned("get_conversation", conversation_id).await?;
        let count = self.soft("get_conversation", self.backend.count_messages(conversation_id))?;
        Some(Conversation::from_record(record, count))
    }

    /// Messages of a conversation, oldest first
    pub async fn load_messages(&self, conversation_id: &str) -> Vec<Message> {
        if self.owned("load_messages", conversation_id).await.is_none() {
            return Vec::new();
        }
        self.soft("load_messages", self.backend.messages_by_created(conversation_id))
            .unwrap_or_default()
    }

    /// Delete the messages, then the conversation
    ///
    /// If the messages cannot be deleted the conversation is left in place.
    pub async fn delete_conversation(&self, conversation_id: &str) -> bool {
        if self.owned("delete_conversation", conversation_id).await.is_none() {
            return false;
        }

        let Some(removed) = self.soft(
            "delete_conversation",
            self.backend.delete_messages(conversation_id),
        ) else {
            return false;
        };

        let deleted = self
            .soft(
                "delete_conversation",
                self.backend.delete_conversation(conversation_id),
            )
            .unwrap_or(false);
        if deleted {
            tracing::info!(conversation_id, messages = removed, "Deleted conversation");
        }
        deleted
    }
}
