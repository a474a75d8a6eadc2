pub mod agent;
pub mod llm;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{ BrainError, ConfigurationError };
use crate::llm::chat::TextStream;
use crate::llm::{ LlmClient, ModelInfo, PromptMessage };
use crate::models::chat::ChatMessage;
use crate::tools::ToolRegistry;
use self::agent::AgentBrain;
use self::llm::LlmBrain;

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 4;

/// Everything a brain needs for one call besides the query itself.
#[derive(Debug, Clone, Default)]
pub struct ThinkContext {
    pub system_prompt: String,
    pub history: Vec<ChatMessage>,
}

impl ThinkContext {
    pub fn new(system_prompt: impl Into<String>, history: Vec<ChatMessage>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            history,
        }
    }

    /// System prompt, the history in order, then the query.
    pub fn to_messages(&self, query: &str) -> Vec<PromptMessage> {
        let system = self.system_prompt.trim();

        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if !system.is_empty() {
            messages.push(PromptMessage::system(system));
        }
        messages.extend(self.history.iter().map(PromptMessage::from));
        messages.push(PromptMessage::user(query));
        messages
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
    pub output: String,
    pub success: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BrainResponse {
    pub content: String,
    pub tool_invocations: Vec<ToolInvocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrainType {
    Agent,
    Llm,
}

impl FromStr for BrainType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "agent" | "tool" | "tools" => Ok(BrainType::Agent),
            "llm" | "plain" => Ok(BrainType::Llm),
            other => Err(ConfigurationError::invalid("BRAIN_TYPE", format!("unknown brain type '{}'", other))),
        }
    }
}

impl fmt::Display for BrainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrainType::Agent => f.write_str("agent"),
            BrainType::Llm => f.write_str("llm"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BrainInfo {
    pub brain_type: BrainType,
    pub model: ModelInfo,
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct BrainSettings {
    pub max_tool_rounds: usize,
}

impl Default for BrainSettings {
    fn default() -> Self {
        Self { max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS }
    }
}

/// Reasoning unit behind an expert. Holds no conversation state between calls.
#[async_trait]
pub trait Brain: Send + Sync {
    async fn think(&self, query: &str, context: &ThinkContext) -> Result<BrainResponse, BrainError>;

    async fn think_stream(&self, query: &str, context: &ThinkContext) -> Result<TextStream, BrainError>;

    /// Drops scratch state from the last call. Persisted history is untouched.
    /// The built-in brains keep everything per call, so there is nothing to drop.
    fn reset(&self) {}

    fn info(&self) -> BrainInfo;
}

pub fn create_brain(
    brain_type: BrainType,
    llm: LlmClient,
    tools: ToolRegistry,
    settings: BrainSettings
) -> Arc<dyn Brain> {
    match brain_type {
        BrainType::Agent => Arc::new(AgentBrain::new(llm, tools, settings.max_tool_rounds)),
        BrainType::Llm => Arc::new(LlmBrain::new(llm)),
    }
}
