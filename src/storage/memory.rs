//! In-memory persistence backend
//!
//! Keeps rows in insertion order behind a `RwLock`. Any table operation can be
//! switched to fail on demand, which is how the store's partial-failure paths
//! are exercised in tests.

use crate::error::{ParleyError, Result};
use crate::storage::{ConversationPatch, ConversationRecord, MessageRecord, PersistenceBackend};
use std::collections::HashSet;
use std::sync::{Mutex, RwLock};

/// Table operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    InsertConversation,
    LatestConversation,
    ListConversations,
    FindConversation,
    UpdateConversation,
    DeleteConversation,
    InsertMessage,
    ListMessages,
    CountMessages,
    DeleteMessages,
}

#[derive(Debug, Default)]
struct Tables {
    conversations: Vec<ConversationRecord>,
    messages: Vec<MessageRecord>,
}

/// Volatile backend for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
    failing: Mutex<HashSet<BackendOp>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` fail until [`MemoryBackend::recover`] is called
    pub fn fail(&self, op: BackendOp) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(op);
        }
    }

    /// Let `op` succeed again
    pub fn recover(&self, op: BackendOp) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(&op);
        }
    }

    /// Number of stored conversation rows, across all owners
    pub fn conversation_rows(&self) -> usize {
        self.tables.read().map(|t| t.conversations.len()).unwrap_or(0)
    }

    /// Number of stored message rows, across all conversations
    pub fn message_rows(&self) -> usize {
        self.tables.read().map(|t| t.messages.len()).unwrap_or(0)
    }

    fn check(&self, op: BackendOp) -> Result<()> {
        let failing = self
            .failing
            .lock()
            .map(|failing| failing.contains(&op))
            .unwrap_or(false);
        if failing {
            return Err(ParleyError::ProviderUnavailable(format!("injected failure: {:?}", op)).into());
        }
        Ok(())
    }

    fn read<T>(&self, op: BackendOp, f: impl FnOnce(&Tables) -> T) -> Result<T> {
        self.check(op)?;
        let tables = self
            .tables
            .read()
            .map_err(|_| ParleyError::Storage("memory backend lock poisoned".to_string()))?;
        Ok(f(&tables))
    }

    fn write<T>(&self, op: BackendOp, f: impl FnOnce(&mut Tables) -> T) -> Result<T> {
        self.check(op)?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| ParleyError::Storage("memory backend lock poisoned".to_string()))?;
        Ok(f(&mut tables))
    }
}

impl PersistenceBackend for MemoryBackend {
    fn insert_conversation(&self, record: &ConversationRecord) -> Result<()> {
        self.write(BackendOp::InsertConversation, |t| {
            t.conversations.push(record.clone())
        })
    }

    fn latest_conversation_by_created(&self, user_id: &str) -> Result<Option<ConversationRecord>> {
        self.read(BackendOp::LatestConversation, |t| {
            // max_by_key keeps the last maximum, so ties go to the later insert
            t.conversations
                .iter()
                .filter(|c| c.user_id == user_id)
                .max_by_key(|c| c.created_at)
                .cloned()
        })
    }

    fn conversations_by_updated(&self, user_id: &str) -> Result<Vec<ConversationRecord>> {
        self.read(BackendOp::ListConversations, |t| {
            let mut owned: Vec<ConversationRecord> = t
                .conversations
                .iter()
                .rev()
                .filter(|c| c.user_id == user_id)
                .cloned()
                .collect();
            owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            owned
        })
    }

    fn find_conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        self.read(BackendOp::FindConversation, |t| {
            t.conversations.iter().find(|c| c.id == id).cloned()
        })
    }

    fn update_conversation(&self, id: &str, patch: &ConversationPatch) -> Result<bool> {
        self.write(BackendOp::UpdateConversation, |t| {
            match t.conversations.iter_mut().find(|c| c.id == id) {
                Some(record) => {
                    if let Some(title) = &patch.title {
                        record.title = title.clone();
                    }
                    if let Some(updated_at) = patch.updated_at {
                        record.updated_at = updated_at;
                    }
                    true
                }
                None => false,
            }
        })
    }

    fn delete_conversation(&self, id: &str) -> Result<bool> {
        self.write(BackendOp::DeleteConversation, |t| {
            let before = t.conversations.len();
            t.conversations.retain(|c| c.id != id);
            t.conversations.len() != before
        })
    }

    fn insert_message(&self, record: &MessageRecord) -> Result<()> {
        self.write(BackendOp::InsertMessage, |t| t.messages.push(record.clone()))
    }

    fn messages_by_created(&self, conversation_id: &str) -> Result<Vec<MessageRecord>> {
        self.read(BackendOp::ListMessages, |t| {
            let mut messages: Vec<MessageRecord> = t
                .messages
                .iter()
                .filter(|m| m.conversation_id == conversation_id)
                .cloned()
                .collect();
            // stable sort keeps insertion order for equal timestamps
            messages.sort_by_key(|m| m.created_at);
            messages
        })
    }

    fn count_messages(&self, conversation_id: &str) -> Result<usize> {
        self.read(BackendOp::CountMessages, |t| {
            t.messages
                .iter()
                .filter(|m| m.conversation_id == conversation_id)
                .count()
        })
    }

    fn delete_messages(&self, conversation_id: &str) -> Result<usize> {
        self.write(BackendOp::DeleteMessages, |t| {
            let before = t.messages.len();
            t.messages.retain(|m| m.conversation_id != conversation_id);
            before - t.messages.len()
        })
    }
}
