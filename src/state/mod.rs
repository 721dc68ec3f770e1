//! Conversation persistence layer
//!
//! Stores finished turns and user feedback. Currently uses in-memory;
//! can be replaced with a database-backed store.

use crate::error::AgentError;
use crate::models::{ChatMessage, ChatResponse};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One finalized user/assistant exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTurn {
    pub conversation_id: Uuid,
    pub user_message: String,
    pub response: ChatResponse,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackRating {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub conversation_id: Uuid,
    pub rating: FeedbackRating,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Trait for conversation persistence
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append_turn(&self, turn: StoredTurn) -> Result<()>;
    async fn load_turns(&self, conversation_id: Uuid) -> Result<Vec<StoredTurn>>;
    /// Fails for a conversation with no stored turns
    async fn record_feedback(&self, feedback: Feedback) -> Result<()>;
}

/// Rebuild caller-side history from stored turns
pub fn history_from_turns(turns: &[StoredTurn]) -> Vec<ChatMessage> {
    turns
        .iter()
        .flat_map(|turn| {
            [
                ChatMessage::user(turn.user_message.clone()),
                ChatMessage::assistant(turn.response.message.clone()),
            ]
        })
        .collect()
}

/// In-memory conversation store for development
pub struct InMemoryConversationStore {
    turns: Arc<RwLock<HashMap<Uuid, Vec<StoredTurn>>>>,
    feedback: Arc<RwLock<HashMap<Uuid, Vec<Feedback>>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            turns: Arc::new(RwLock::new(HashMap::new())),
            feedback: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn load_feedback(&self, conversation_id: Uuid) -> Vec<Feedback> {
        self.feedback
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append_turn(&self, turn: StoredTurn) -> Result<()> {
        let mut turns = self.turns.write().await;
        turns.entry(turn.conversation_id).or_default().push(turn);
        Ok(())
    }

    async fn load_turns(&self, conversation_id: Uuid) -> Result<Vec<StoredTurn>> {
        let turns = self.turns.read().await;
        Ok(turns.get(&conversation_id).cloned().unwrap_or_default())
    }

    async fn record_feedback(&self, feedback: Feedback) -> Result<()> {
        {
            let turns = self.turns.read().await;
            if !turns.contains_key(&feedback.conversation_id) {
                return Err(AgentError::ValidationError(format!(
                    "Unknown conversation {}",
                    feedback.conversation_id
                )));
            }
        }

        let mut feedback_map = self.feedback.write().await;
        feedback_map
            .entry(feedback.conversation_id)
            .or_default()
            .push(feedback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenUsage;

    fn turn(conversation_id: Uuid, question: &str, answer: &str) -> StoredTurn {
        StoredTurn {
            conversation_id,
            user_message: question.to_string(),
            response: ChatResponse {
                message: answer.to_string(),
                confidence: 0.9,
                disclaimer: String::new(),
                disclaimers: vec![],
                tool_calls: vec![],
                usage: TokenUsage::default(),
                duration_ms: 12,
            },
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_load() {
        let store = InMemoryConversationStore::new();
        let id = Uuid::new_v4();

        store.append_turn(turn(id, "q1", "a1")).await.unwrap();
        store.append_turn(turn(id, "q2", "a2")).await.unwrap();
        store.append_turn(turn(Uuid::new_v4(), "other", "x")).await.unwrap();

        let turns = store.load_turns(id).await.unwrap();
        assert_eq!(turns.len(), 2);

        let history = history_from_turns(&turns);
        assert_eq!(history.len(), 4);
        assert_eq!(history[2].content, "q2");
        assert_eq!(history[3].content, "a2");

        assert!(store.load_turns(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_feedback_requires_conversation() {
        let store = InMemoryConversationStore::new();
        let id = Uuid::new_v4();
        let feedback = Feedback {
            conversation_id: id,
            rating: FeedbackRating::Down,
            comment: Some("numbers looked off".to_string()),
            created_at: Utc::now(),
        };

        assert!(matches!(
            store.record_feedback(feedback.clone()).await,
            Err(AgentError::ValidationError(_))
        ));

        store.append_turn(turn(id, "q", "a")).await.unwrap();
        store.record_feedback(feedback).await.unwrap();
        assert_eq!(store.load_feedback(id).await.len(), 1);
    }
}
