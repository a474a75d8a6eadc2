pub mod memory;
pub mod redis;

use async_trait::async_trait;
use log::info;
use std::sync::Arc;

use crate::cli::Args;
use crate::error::{ ConfigurationError, HistoryError };
use crate::models::chat::{ ChatMessage, Conversation, Role };

/// Per-conversation message log. Unknown ids read as empty and clear as a no-op.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends all `messages` in one write; concurrent writers never land between them.
    async fn add_messages(&self, conversation_id: &str, messages: &[(Role, &str)]) -> Result<(), HistoryError>;

    async fn add_message(&self, conversation_id: &str, role: Role, content: &str) -> Result<(), HistoryError> {
        self.add_messages(conversation_id, &[(role, content)]).await
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, HistoryError>;

    /// The last `limit` messages, oldest first.
    async fn recent(&self, conversation_id: &str, limit: usize) -> Result<Vec<ChatMessage>, HistoryError>;

    async fn clear(&self, conversation_id: &str) -> Result<(), HistoryError>;

    async fn conversation_ids(&self) -> Result<Vec<String>, HistoryError>;
}

pub fn create_history_store(args: &Args) -> Result<Arc<dyn HistoryStore>, ConfigurationError> {
    match args.history_type.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(memory::InMemoryHistoryStore::new())),
        "redis" => {
            let store = redis::RedisHistoryStore::new(
                &args.history_host,
                &args.history_redis_prefix,
                args.history_redis_scan_count
            )?;
            Ok(Arc::new(store))
        }
        other =>
            Err(
                ConfigurationError::invalid(
                    "HISTORY_TYPE",
                    format!("unsupported history store type '{}' (expected memory or redis)", other)
                )
            ),
    }
}

pub fn initialize_history_store(args: &Args) -> Result<Arc<dyn HistoryStore>, ConfigurationError> {
    if args.history_type.eq_ignore_ascii_case("memory") {
        info!("Chat history will be kept in process memory");
    } else {
        info!("Chat history will be stored in: {} at {}", args.history_type, args.history_host);
    }
    create_history_store(args)
}

pub fn format_history_for_prompt(messages: &[ChatMessage]) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let mut result = String::from("Previous conversation:\n");
    for msg in messages {
        let role_display = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        };

        result.push_str(&format!("{}: {}\n", role_display, msg.content));
    }

    result
}

/// Ordering and clear semantics every store must share, run against each implementation.
#[cfg(test)]
pub(crate) async fn assert_store_contract(store: &dyn HistoryStore, conversation_id: &str, other_id: &str) {
    assert!(store.get_conversation(conversation_id).await.unwrap().messages.is_empty());
    assert!(store.recent(conversation_id, 5).await.unwrap().is_empty());
    store.clear(conversation_id).await.unwrap();

    store.add_message(conversation_id, Role::User, "one").await.unwrap();
    store.add_messages(conversation_id, &[(Role::Assistant, "two"), (Role::User, "three")]).await.unwrap();
    store.add_messages(conversation_id, &[]).await.unwrap();
    store.add_message(other_id, Role::User, "elsewhere").await.unwrap();

    let conv = store.get_conversation(conversation_id).await.unwrap();
    assert_eq!(conv.id, conversation_id);
    let seen: Vec<(Role, &str)> = conv.messages
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(seen, vec![(Role::User, "one"), (Role::Assistant, "two"), (Role::User, "three")]);

    let recent = store.recent(conversation_id, 2).await.unwrap();
    assert_eq!(recent.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), vec!["two", "three"]);
    assert_eq!(store.recent(conversation_id, 10).await.unwrap().len(), 3);

    let ids = store.conversation_ids().await.unwrap();
    assert!(ids.iter().any(|id| id == conversation_id));
    assert!(ids.iter().any(|id| id == other_id));

    store.clear(conversation_id).await.unwrap();
    store.clear(conversation_id).await.unwrap();
    assert!(store.get_conversation(conversation_id).await.unwrap().messages.is_empty());
    assert_eq!(store.get_conversation(other_id).await.unwrap().messages.len(), 1);
    assert!(!store.conversation_ids().await.unwrap().iter().any(|id| id == conversation_id));

    store.clear(other_id).await.unwrap();
}
