use async_trait::async_trait;
use log::info;
use rllm::builder::{ LLMBackend, LLMBuilder };
use rllm::chat::{ ChatMessage, ChatRole, MessageType };
use rllm::LLMProvider;

use super::ChatClient;
use crate::error::{ ConfigurationError, ProviderError };
use crate::llm::{ ChatCompletion, ChatOptions, LlmConfig, LlmType, ModelInfo, PromptMessage, PromptRole };

/// Gemini through `rllm`. No tool calling, no native streaming.
pub struct GeminiChatClient {
    llm: Box<dyn LLMProvider + Send + Sync>,
    model: String,
    base_url: Option<String>,
}

impl GeminiChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>
    ) -> Result<Self, ConfigurationError> {
        let chat_model = model.unwrap_or_else(|| "gemini-1.5-flash-latest".to_string());

        let mut builder = LLMBuilder::new()
            .backend(LLMBackend::Google)
            .api_key(api_key)
            .model(&chat_model)
            .stream(false);

        if let Some(url) = &base_url {
            builder = builder.base_url(url);
        }
        if let Some(tokens) = max_tokens {
            builder = builder.max_tokens(tokens);
        }
        if let Some(temp) = temperature {
            builder = builder.temperature(temp);
        }

        let llm = builder.build().map_err(|e| ConfigurationError::invalid("CHAT_LLM_TYPE", e))?;

        Ok(Self {
            llm,
            model: chat_model,
            base_url,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ConfigurationError> {
        let api_key = config.require_api_key("CHAT_API_KEY")?;
        Self::new(
            api_key,
            config.completion_model.clone(),
            config.base_url.clone(),
            config.max_tokens,
            config.temperature
        )
    }
}

/// Folds system text into the first user turn and renders tool traffic as plain text.
fn to_rllm_messages(messages: &[PromptMessage]) -> Vec<ChatMessage> {
    let mut system = Vec::new();
    let mut out: Vec<ChatMessage> = Vec::new();

    for message in messages {
        match message.role {
            PromptRole::System => system.push(message.content.clone()),
            PromptRole::User | PromptRole::Tool => {
                let mut content = if message.role == PromptRole::Tool {
                    format!("Tool result:\n{}", message.content)
                } else {
                    message.content.clone()
                };
                if !system.is_empty() {
                    content = format!("{}\n\n{}", system.join("\n\n"), content);
                    system.clear();
                }
                out.push(ChatMessage {
                    role: ChatRole::User,
                    content,
                    message_type: MessageType::Text,
                });
            }
            PromptRole::Assistant => {
                out.push(ChatMessage {
                    role: ChatRole::Assistant,
                    content: message.content.clone(),
                    message_type: MessageType::Text,
                });
            }
        }
    }

    if !system.is_empty() {
        out.push(ChatMessage {
            role: ChatRole::User,
            content: system.join("\n\n"),
            message_type: MessageType::Text,
        });
    }
    out
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn chat(
        &self,
        messages: &[PromptMessage],
        options: &ChatOptions
    ) -> Result<ChatCompletion, ProviderError> {
        if !options.tools.is_empty() {
            info!("gemini client ignores {} tool schema(s)", options.tools.len());
        }
        let msgs = to_rllm_messages(messages);
        info!("gemini chat → model={} base_url={:?}", self.model, self.base_url);

        let resp = self.llm.chat(&msgs).await.map_err(|e| ProviderError::upstream("gemini", e.to_string()))?;
        let text = resp
            .text()
            .map(|s| s.to_string())
            .unwrap_or_else(|| resp.to_string());
        Ok(ChatCompletion::text(text))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: LlmType::Gemini,
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            supports_tools: false,
            supports_streaming: false,
        }
    }
}
