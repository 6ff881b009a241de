//! Conversation store collaborator
//!
//! The pipeline only ever appends a finished answer; everything else about
//! persistence belongs to the host application.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::StoreError;

/// Sink for completed answers
pub trait ConversationStore: Send + Sync {
    /// Persist the answer text for one message of a conversation
    fn append_answer(
        &self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), StoreError>;
}

/// One persisted answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAnswer {
    pub message_id: String,
    pub text: String,
}

/// Process-local store, used by the CLI and in tests
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    conversations: Mutex<HashMap<String, Vec<StoredAnswer>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers stored for a conversation, in append order
    pub fn answers(&self, conversation_id: &str) -> Vec<StoredAnswer> {
        self.conversations
            .lock()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of appends across all conversations
    pub fn len(&self) -> usize {
        self.conversations.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConversationStore for MemoryConversationStore {
    fn append_answer(
        &self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), StoreError> {
        self.conversations
            .lock()
            .entry(conversation_id.to_string())
            .or_default()
            .push(StoredAnswer {
                message_id: message_id.to_string(),
                text: text.to_string(),
            });
        Ok(())
    }
}
