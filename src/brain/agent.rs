use async_trait::async_trait;
use log::{ info, warn };

use super::{ Brain, BrainInfo, BrainResponse, BrainType, ThinkContext, ToolInvocation };
use crate::error::BrainError;
use crate::llm::chat::{ full_response_as_stream, TextStream };
use crate::llm::{ LlmClient, PromptMessage };
use crate::tools::ToolRegistry;

/// Tool-using brain: lets the model request tools until it answers in plain text.
pub struct AgentBrain {
    llm: LlmClient,
    tools: ToolRegistry,
    max_tool_rounds: usize,
}

impl AgentBrain {
    pub fn new(llm: LlmClient, tools: ToolRegistry, max_tool_rounds: usize) -> Self {
        Self {
            llm,
            tools,
            max_tool_rounds,
        }
    }
}

#[async_trait]
impl Brain for AgentBrain {
    /// Tool calls live only in the returned response; nothing is shared between calls.
    async fn think(&self, query: &str, context: &ThinkContext) -> Result<BrainResponse, BrainError> {
        let mut messages = context.to_messages(query);
        let options = self.llm.default_options().with_tools(self.tools.schemas());
        let mut invocations: Vec<ToolInvocation> = Vec::new();

        for round in 0..self.max_tool_rounds {
            let completion = self.llm.chat(&messages, &options).await?;
            if completion.tool_calls.is_empty() {
                return Ok(BrainResponse {
                    content: completion.content,
                    tool_invocations: invocations,
                });
            }

            info!("Round {}: model requested {} tool call(s)", round + 1, completion.tool_calls.len());
            let calls = completion.tool_calls.clone();
            messages.push(PromptMessage::assistant_tool_calls(completion.content, completion.tool_calls));

            for call in calls {
                let (output, success) = match self.tools.invoke(&call.name, call.arguments.clone()).await {
                    Ok(out) => (out, true),
                    Err(e) => (format!("Error: {}", e), false),
                };
                messages.push(PromptMessage::tool_result(call.id.clone(), output.clone()));
                invocations.push(ToolInvocation {
                    name: call.name,
                    arguments: call.arguments,
                    output,
                    success,
                });
            }
        }

        if !self.tools.is_empty() {
            warn!("Tool round limit ({}) reached, asking for a final answer without tools", self.max_tool_rounds);
        }
        let completion = self.llm.chat(&messages, &options.without_tools()).await?;
        Ok(BrainResponse {
            content: completion.content,
            tool_invocations: invocations,
        })
    }

    /// Without tools the provider streams natively. With tools the loop has to settle
    /// first, so the final answer arrives as one fragment.
    async fn think_stream(&self, query: &str, context: &ThinkContext) -> Result<TextStream, BrainError> {
        if self.tools.is_empty() {
            let messages = context.to_messages(query);
            return Ok(self.llm.chat_stream(&messages, &self.llm.default_options()).await?);
        }
        let response = self.think(query, context).await?;
        Ok(full_response_as_stream(move || async move { Ok(response.content) }))
    }

    fn info(&self) -> BrainInfo {
        BrainInfo {
            brain_type: BrainType::Agent,
            model: self.llm.model_info(),
            tools: self.tools.names().to_vec(),
        }
    }
}
