use crate::error::ParleyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sent by the person chatting
    User,
    /// Generated by the model
    Assistant,
}

impl Role {
    /// Lowercase wire and storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ParleyError::Storage(format!("Unknown message role: {}", other))),
        }
    }
}

/// A conversation row as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Unique identifier
    pub id: String,
    /// Owner identifier
    pub user_id: String,
    /// Display title, never empty
    pub title: String,
    /// Creation instant, immutable
    pub created_at: DateTime<Utc>,
    /// Last message append or rename
    pub updated_at: DateTime<Utc>,
}

/// A message row as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique identifier
    pub id: String,
    /// Parent conversation
    pub conversation_id: String,
    /// Author
    pub role: Role,
    /// Text content, immutable once stored
    pub content: String,
    /// Estimated token count
    pub tokens: Option<u64>,
    /// Creation instant
    pub created_at: DateTime<Utc>,
}

/// Partial update of a conversation row; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationPatch {
    /// New title
    pub title: Option<String>,
    /// New updated timestamp
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConversationPatch {
    /// Whether the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.updated_at.is_none()
    }
}
