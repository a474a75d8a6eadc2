use async_trait::async_trait;

use super::{ Brain, BrainInfo, BrainResponse, BrainType, ThinkContext };
use crate::error::BrainError;
use crate::llm::chat::TextStream;
use crate::llm::LlmClient;

/// Single LLM call per turn, no tools.
pub struct LlmBrain {
    llm: LlmClient,
}

impl LlmBrain {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Brain for LlmBrain {
    async fn think(&self, query: &str, context: &ThinkContext) -> Result<BrainResponse, BrainError> {
        let messages = context.to_messages(query);
        let completion = self.llm.chat(&messages, &self.llm.default_options()).await?;
        Ok(BrainResponse {
            content: completion.content,
            tool_invocations: Vec::new(),
        })
    }

    async fn think_stream(&self, query: &str, context: &ThinkContext) -> Result<TextStream, BrainError> {
        let messages = context.to_messages(query);
        Ok(self.llm.chat_stream(&messages, &self.llm.default_options()).await?)
    }

    fn info(&self) -> BrainInfo {
        BrainInfo {
            brain_type: BrainType::Llm,
            model: self.llm.model_info(),
            tools: Vec::new(),
        }
    }
}
