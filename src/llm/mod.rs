pub mod chat;
pub mod embedding;

use serde::{ Deserialize, Serialize };
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{ ConfigurationError, ProviderError, ProviderErrorKind };
use crate::models::chat::{ ChatMessage, Role };
use crate::tools::ToolSchema;
use self::chat::{ ChatClient, TextStream };
use self::embedding::EmbeddingClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    OpenAI,
    AzureOpenAI,
    Ollama,
    Gemini,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseLlmTypeError {
    message: String,
}

impl fmt::Display for ParseLlmTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseLlmTypeError {}

impl FromStr for LlmType {
    type Err = ParseLlmTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "openai" => Ok(LlmType::OpenAI),
            "azureopenai" | "azure" => Ok(LlmType::AzureOpenAI),
            "ollama" | "llama" => Ok(LlmType::Ollama),
            "gemini" | "google" => Ok(LlmType::Gemini),
            // Vertex AI needs service-account auth and regional endpoints, not a Gemini API key.
            "vertex" | "vertexai" =>
                Err(ParseLlmTypeError {
                    message: format!("Unsupported LLM type: '{}' (use gemini with an API key)", s),
                }),
            _ =>
                Err(ParseLlmTypeError {
                    message: format!("Invalid LLM type: '{}'", s),
                }),
        }
    }
}

impl fmt::Display for LlmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LlmType::OpenAI => "openai",
            LlmType::AzureOpenAI => "azureopenai",
            LlmType::Ollama => "ollama",
            LlmType::Gemini => "gemini",
        };
        f.write_str(name)
    }
}

/// Provider selection plus provider-specific parameters. Built once at startup.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub llm_type: LlmType,
    pub api_key: Option<String>,
    pub completion_model: Option<String>,
    pub embedding_model: Option<String>,
    pub base_url: Option<String>,
    /// Azure deployment name.
    pub deployment: Option<String>,
    /// Azure `api-version` query parameter.
    pub api_version: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            llm_type: LlmType::Ollama,
            api_key: None,
            completion_model: None,
            embedding_model: None,
            base_url: None,
            deployment: None,
            api_version: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl LlmConfig {
    pub fn require_api_key(&self, setting: &str) -> Result<String, ConfigurationError> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigurationError::missing(setting))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
    Tool,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptRole::System => "system",
            PromptRole::User => "user",
            PromptRole::Assistant => "assistant",
            PromptRole::Tool => "tool",
        }
    }
}

impl From<Role> for PromptRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => PromptRole::User,
            Role::Assistant => PromptRole::Assistant,
            Role::System => PromptRole::System,
        }
    }
}

/// A tool request emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One entry of the provider-facing message sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(PromptRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(PromptRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(PromptRole::Assistant, content)
    }

    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(PromptRole::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(PromptRole::Tool, content)
        }
    }
}

impl From<&ChatMessage> for PromptMessage {
    fn from(message: &ChatMessage) -> Self {
        PromptMessage::new(message.role.into(), message.content.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolSchema>,
}

impl ChatOptions {
    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn without_tools(&self) -> Self {
        Self {
            tools: Vec::new(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub provider: LlmType,
    pub model: String,
    pub base_url: Option<String>,
    pub supports_tools: bool,
    pub supports_streaming: bool,
}

/// Uniform handle over the configured chat and embedding providers.
#[derive(Clone)]
pub struct LlmClient {
    chat: Arc<dyn ChatClient>,
    embedding: Option<Arc<dyn EmbeddingClient>>,
    defaults: ChatOptions,
}

impl LlmClient {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        embedding: Option<Arc<dyn EmbeddingClient>>,
        defaults: ChatOptions
    ) -> Self {
        Self { chat, embedding, defaults }
    }

    pub fn from_configs(
        chat_config: &LlmConfig,
        embedding_config: Option<&LlmConfig>
    ) -> Result<Self, ConfigurationError> {
        let chat = chat::new_client(chat_config)?;
        let embedding = match embedding_config {
            Some(config) => Some(embedding::new_client(config)?),
            None => None,
        };
        let defaults = ChatOptions {
            temperature: chat_config.temperature,
            max_tokens: chat_config.max_tokens,
            tools: Vec::new(),
        };
        Ok(Self::new(chat, embedding, defaults))
    }

    /// Options carrying the configured temperature and token limit.
    pub fn default_options(&self) -> ChatOptions {
        self.defaults.clone()
    }

    pub async fn chat(
        &self,
        messages: &[PromptMessage],
        options: &ChatOptions
    ) -> Result<ChatCompletion, ProviderError> {
        self.chat.chat(messages, options).await
    }

    pub async fn complete(&self, prompt: &str, options: &ChatOptions) -> Result<String, ProviderError> {
        self.chat.complete(prompt, options).await
    }

    pub async fn chat_stream(
        &self,
        messages: &[PromptMessage],
        options: &ChatOptions
    ) -> Result<TextStream, ProviderError> {
        self.chat.chat_stream(messages, options).await
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(self.embedder()?.embed(text).await?.embedding)
    }

    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.embedder()?.embed_many(texts).await
    }

    pub fn model_info(&self) -> ModelInfo {
        self.chat.model_info()
    }

    fn embedder(&self) -> Result<&Arc<dyn EmbeddingClient>, ProviderError> {
        self.embedding.as_ref().ok_or_else(|| {
            ProviderError::new(
                self.chat.model_info().provider.to_string(),
                ProviderErrorKind::Unsupported,
                "no embedding provider configured"
            )
        })
    }
}
