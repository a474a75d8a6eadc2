use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::HistoryStore;
use crate::error::HistoryError;
use crate::models::chat::{ ChatMessage, Conversation, Role };

/// Volatile store. Lost on restart.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    conversations: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn add_messages(&self, conversation_id: &str, messages: &[(Role, &str)]) -> Result<(), HistoryError> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(conversation_id.to_string())
            .or_default()
            .extend(messages.iter().map(|(role, content)| ChatMessage::now(*role, *content)));
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, HistoryError> {
        let conversations = self.conversations.read().await;
        Ok(Conversation {
            id: conversation_id.to_string(),
            messages: conversations.get(conversation_id).cloned().unwrap_or_default(),
        })
    }

    async fn recent(&self, conversation_id: &str, limit: usize) -> Result<Vec<ChatMessage>, HistoryError> {
        let conversations = self.conversations.read().await;
        let messages = match conversations.get(conversation_id) {
            Some(m) => m,
            None => {
                return Ok(Vec::new());
            }
        };
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn clear(&self, conversation_id: &str) -> Result<(), HistoryError> {
        self.conversations.write().await.remove(conversation_id);
        Ok(())
    }

    async fn conversation_ids(&self) -> Result<Vec<String>, HistoryError> {
        let mut ids: Vec<String> = self.conversations.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn satisfies_store_contract() {
        crate::history::assert_store_contract(&InMemoryHistoryStore::new(), "c1", "c2").await;
    }

    #[tokio::test]
    async fn concurrent_turns_stay_paired() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(
                tokio::spawn(async move {
                    let q = format!("q{}", i);
                    let a = format!("a{}", i);
                    store.add_messages("shared", &[(Role::User, &q), (Role::Assistant, &a)]).await.unwrap();
                })
            );
        }
        for h in handles {
            h.await.unwrap();
        }

        let messages = store.get_conversation("shared").await.unwrap().messages;
        assert_eq!(messages.len(), 40);
        for pair in messages.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
        }
    }

    #[tokio::test]
    async fn preserves_insertion_order() {
        let store = InMemoryHistoryStore::new();
        store.add_message("c1", Role::User, "one").await.unwrap();
        store.add_message("c1", Role::Assistant, "two").await.unwrap();
        store.add_message("c1", Role::User, "three").await.unwrap();

        let conv = store.get_conversation("c1").await.unwrap();
        let contents: Vec<_> = conv.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["one", "two", "three"]);

        let recent = store.recent("c1", 2).await.unwrap();
        assert_eq!(recent[0].content, "two");
        assert_eq!(recent[1].content, "three");
        assert_eq!(store.recent("c1", 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unknown_conversation_is_empty_and_clear_is_noop() {
        let store = InMemoryHistoryStore::new();
        assert!(store.get_conversation("nope").await.unwrap().messages.is_empty());
        assert!(store.recent("nope", 5).await.unwrap().is_empty());
        store.clear("nope").await.unwrap();
        assert!(store.conversation_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_only_touches_one_conversation() {
        let store = InMemoryHistoryStore::new();
        store.add_message("a", Role::User, "x").await.unwrap();
        store.add_message("b", Role::User, "y").await.unwrap();
        store.clear("a").await.unwrap();

        assert!(store.get_conversation("a").await.unwrap().messages.is_empty());
        assert_eq!(store.get_conversation("b").await.unwrap().messages.len(), 1);
        assert_eq!(store.conversation_ids().await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_appends_are_all_kept() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(
                tokio::spawn(async move {
                    store.add_message("shared", Role::User, &format!("m{}", i)).await.unwrap();
                })
            );
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get_conversation("shared").await.unwrap().messages.len(), 20);
    }
}
