use futures::StreamExt;
use log::{ debug, info, warn };
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ ExpertType, ReplyStream };
use crate::error::{ BrainError, ExpertError, ExpertFailure };
use crate::history::HistoryStore;
use crate::llm::chat::TextStream;
use crate::models::chat::{ ChatMessage, Conversation, Role };

/// An expert's view of the memory store: windowed reads and whole-turn writes.
#[derive(Clone)]
pub struct ConversationMemory {
    expert: ExpertType,
    store: Arc<dyn HistoryStore>,
    window: usize,
}

impl ConversationMemory {
    pub fn new(expert: ExpertType, store: Arc<dyn HistoryStore>, window: usize) -> Self {
        Self { expert, store, window }
    }

    fn fail(&self, failure: impl Into<ExpertFailure>, conversation_id: &str) -> ExpertError {
        failure.into().during(self.expert, conversation_id)
    }

    pub async fn load(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, ExpertError> {
        if self.window == 0 {
            return Ok(Vec::new());
        }
        self.store.recent(conversation_id, self.window).await.map_err(|e| self.fail(e, conversation_id))
    }

    /// User message then assistant reply, written together: either both are stored or neither.
    pub async fn record_turn(&self, conversation_id: &str, user: &str, assistant: &str) -> Result<(), ExpertError> {
        self.store
            .add_messages(conversation_id, &[(Role::User, user), (Role::Assistant, assistant)]).await
            .map_err(|e| self.fail(e, conversation_id))?;
        debug!("Stored turn for conversation {}", conversation_id);
        Ok(())
    }

    pub async fn clear(&self, conversation_id: &str) -> Result<(), ExpertError> {
        self.store.clear(conversation_id).await.map_err(|e| self.fail(e, conversation_id))?;
        info!("Cleared history for conversation {}", conversation_id);
        Ok(())
    }

    pub async fn conversation(&self, conversation_id: &str) -> Result<Conversation, ExpertError> {
        self.store.get_conversation(conversation_id).await.map_err(|e| self.fail(e, conversation_id))
    }

    pub async fn conversation_ids(&self) -> Result<Vec<String>, ExpertError> {
        self.store.conversation_ids().await.map_err(|e| self.fail(e, ""))
    }

    /// Forwards `fragments` and stores the turn once the last one has been delivered.
    ///
    /// Nothing is stored if a fragment fails or the receiver goes away; in both
    /// cases the provider stream is dropped with the producer task.
    pub fn persist_after_stream(&self, conversation_id: &str, user_message: &str, fragments: TextStream) -> ReplyStream {
        let (tx, rx) = mpsc::channel::<Result<String, ExpertError>>(32);
        let memory = self.clone();
        let conversation_id = conversation_id.to_string();
        let user_message = user_message.to_string();

        tokio::spawn(async move {
            let mut fragments = fragments;
            let mut full = String::new();

            while let Some(item) = fragments.next().await {
                match item {
                    Ok(fragment) => {
                        full.push_str(&fragment);
                        if tx.send(Ok(fragment)).await.is_err() {
                            info!("Stream for conversation {} dropped by the client, turn not stored", conversation_id);
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Stream for conversation {} failed: {}", conversation_id, e);
                        let failure = ExpertFailure::Brain(BrainError::Provider(e));
                        let _ = tx.send(Err(memory.fail(failure, &conversation_id))).await;
                        return;
                    }
                }
            }
            drop(fragments);

            if tx.is_closed() {
                info!("Stream for conversation {} dropped by the client, turn not stored", conversation_id);
                return;
            }
            if let Err(e) = memory.record_turn(&conversation_id, &user_message, &full).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}
