use async_trait::async_trait;
use log::info;
use serde_json::json;
use std::sync::Arc;

use super::{ ConversationMemory, Expert, ExpertInfo, ExpertReply, ExpertType, ReplyStream };
use crate::brain::{ Brain, ThinkContext };
use crate::error::{ ExpertError, ExpertFailure };
use crate::models::chat::Conversation;

/// General question answering: system prompt plus recent history, tools at the brain's discretion.
pub struct QnaExpert {
    brain: Arc<dyn Brain>,
    memory: ConversationMemory,
    system_prompt: String,
}

impl QnaExpert {
    pub fn new(brain: Arc<dyn Brain>, memory: ConversationMemory, system_prompt: impl Into<String>) -> Self {
        let tools = brain.info().tools;
        if tools.is_empty() {
            info!("QNA expert initialized without tools");
        } else {
            info!("QNA expert initialized with tools: {}", tools.join(", "));
        }
        Self { brain, memory, system_prompt: system_prompt.into() }
    }

    async fn context(&self, conversation_id: &str) -> Result<ThinkContext, ExpertError> {
        let history = self.memory.load(conversation_id).await?;
        Ok(ThinkContext::new(self.system_prompt.clone(), history))
    }
}

#[async_trait]
impl Expert for QnaExpert {
    fn expert_type(&self) -> ExpertType {
        ExpertType::Qna
    }

    async fn process(&self, message: &str, conversation_id: &str) -> Result<ExpertReply, ExpertError> {
        let context = self.context(conversation_id).await?;
        let response = self.brain
            .think(message, &context).await
            .map_err(|e| ExpertFailure::from(e).during(ExpertType::Qna, conversation_id))?;

        self.memory.record_turn(conversation_id, message, &response.content).await?;
        Ok(ExpertReply {
            content: response.content,
            conversation_id: conversation_id.to_string(),
            metadata: json!({ "tool_invocations": response.tool_invocations }),
        })
    }

    async fn stream(&self, message: &str, conversation_id: &str) -> Result<ReplyStream, ExpertError> {
        let context = self.context(conversation_id).await?;
        let fragments = self.brain
            .think_stream(message, &context).await
            .map_err(|e| ExpertFailure::from(e).during(ExpertType::Qna, conversation_id))?;
        Ok(self.memory.persist_after_stream(conversation_id, message, fragments))
    }

    async fn clear_history(&self, conversation_id: &str) -> Result<(), ExpertError> {
        self.brain.reset();
        self.memory.clear(conversation_id).await
    }

    async fn history(&self, conversation_id: &str) -> Result<Conversation, ExpertError> {
        self.memory.conversation(conversation_id).await
    }

    async fn conversation_ids(&self) -> Result<Vec<String>, ExpertError> {
        self.memory.conversation_ids().await
    }

    fn info(&self) -> ExpertInfo {
        let mut capabilities = vec!["question_answering".to_string(), "conversation_memory".to_string()];
        capabilities.extend(self.brain.info().tools.into_iter().map(|t| format!("tool:{}", t)));
        ExpertInfo {
            name: "QnA Expert".into(),
            description: "Answers general questions using the conversation history and available tools.".into(),
            capabilities,
        }
    }
}
