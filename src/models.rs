//! Core data models used throughout docgrok.
//!
//! These types represent the documents and chunks held by the index, and
//! the role-tagged messages exchanged with the chat provider.

use serde::{Deserialize, Serialize};

/// A document tracked by the index, keyed by its path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub path: String,
}

impl Document {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// A text segment of a document paired with its embedding vector.
///
/// `document` is the owning document's path. An empty key marks a chunk
/// that has been detached by an update and is waiting for GC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl Chunk {
    /// Whether this chunk no longer belongs to any document.
    pub fn is_detached(&self) -> bool {
        self.document.is_empty()
    }

    pub(crate) fn detach(&mut self) {
        self.document.clear();
    }
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Token accounting reported by the chat provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A generated chat reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub model: String,
    pub message: ChatMessage,
    pub usage: Usage,
}

impl ChatResponse {
    pub fn content(&self) -> &str {
        &self.message.content
    }
}
