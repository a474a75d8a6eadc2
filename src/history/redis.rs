use async_trait::async_trait;
use log::{ debug, error };
use redis::{ AsyncCommands, Client };

use crate::error::{ ConfigurationError, HistoryError };
use crate::history::HistoryStore;
use crate::models::chat::{ ChatMessage, Conversation, Role };

/// One Redis list per conversation under `{prefix}{conversation_id}`, oldest entry first.
pub struct RedisHistoryStore {
    client: Client,
    key_prefix: String,
    scan_count: usize,
}

impl RedisHistoryStore {
    pub fn new(url: &str, key_prefix: &str, scan_count: usize) -> Result<Self, ConfigurationError> {
        let client = Client::open(url).map_err(|e| ConfigurationError::invalid("HISTORY_HOST", e))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.to_string(),
            scan_count: scan_count.max(1),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    pub fn key_for(&self, conversation_id: &str) -> String {
        format!("{}{}", self.key_prefix, conversation_id)
    }

    fn conversation_id_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.key_prefix.as_str())
    }
}

pub(crate) fn encode_message(message: &ChatMessage) -> Result<String, HistoryError> {
    Ok(serde_json::to_string(message)?)
}

/// Entries that fail to parse are logged and skipped rather than failing the whole read.
pub(crate) fn decode_entries(key: &str, entries: &[String]) -> Vec<ChatMessage> {
    entries
        .iter()
        .filter_map(|entry| {
            match serde_json::from_str::<ChatMessage>(entry) {
                Ok(msg) => Some(msg),
                Err(e) => {
                    error!("Error parsing history entry under {}: {}", key, e);
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    /// A single multi-value `RPUSH`, so the batch lands contiguously or not at all.
    async fn add_messages(&self, conversation_id: &str, messages: &[(Role, &str)]) -> Result<(), HistoryError> {
        if messages.is_empty() {
            return Ok(());
        }
        let entries = messages
            .iter()
            .map(|(role, content)| encode_message(&ChatMessage::now(*role, *content)))
            .collect::<Result<Vec<String>, HistoryError>>()?;

        let mut conn = self.get_connection().await?;
        let key = self.key_for(conversation_id);
        let _: i64 = conn.rpush(&key, &entries).await?;
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, HistoryError> {
        let mut conn = self.get_connection().await?;
        let key = self.key_for(conversation_id);
        let json_entries: Vec<String> = conn.lrange(&key, 0, -1).await?;

        Ok(Conversation {
            id: conversation_id.to_string(),
            messages: decode_entries(&key, &json_entries),
        })
    }

    async fn recent(&self, conversation_id: &str, limit: usize) -> Result<Vec<ChatMessage>, HistoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.get_connection().await?;
        let key = self.key_for(conversation_id);
        let start = -(limit.min(isize::MAX as usize) as isize);
        let json_entries: Vec<String> = conn.lrange(&key, start, -1).await?;
        Ok(decode_entries(&key, &json_entries))
    }

    async fn clear(&self, conversation_id: &str) -> Result<(), HistoryError> {
        let mut conn = self.get_connection().await?;
        let removed: i64 = conn.del(self.key_for(conversation_id)).await?;
        debug!("Cleared conversation {} ({} key removed)", conversation_id, removed);
        Ok(())
    }

    async fn conversation_ids(&self) -> Result<Vec<String>, HistoryError> {
        let mut conn = self.get_connection().await?;
        let pattern = format!("{}*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut ids = Vec::new();

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(&mut conn).await?;

            ids.extend(keys.iter().filter_map(|k| self.conversation_id_of(k).map(str::to_string)));
            if next == 0 {
                break;
            }
            cursor = next;
        }

        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
