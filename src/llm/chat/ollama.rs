use async_trait::async_trait;
use log::{ debug, info };
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use serde_json::Value;

use super::{ http_stream_generate, ChatClient, StreamLine, TextStream };
use crate::error::{ ConfigurationError, ProviderError };
use crate::llm::{ ChatCompletion, ChatOptions, LlmConfig, LlmType, ModelInfo, PromptMessage, ToolCall };

#[derive(Debug)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    completion_model: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Serialize, Deserialize, Debug)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Serialize, Deserialize, Debug)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    options: OllamaOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

fn parse_ndjson_line(line: &str) -> StreamLine {
    let line = line.trim();
    if line.is_empty() {
        return StreamLine::Skip;
    }
    match serde_json::from_str::<StreamResponse>(line) {
        Ok(resp) => {
            if let Some(error) = resp.error {
                return StreamLine::Failed(error);
            }
            let text = resp.message.map(|m| m.content).unwrap_or_default();
            if !text.is_empty() {
                StreamLine::Fragment(text)
            } else if resp.done {
                StreamLine::Done
            } else {
                StreamLine::Skip
            }
        }
        Err(e) => {
            debug!("JSON parse error: {} for line: {}", e, line);
            StreamLine::Skip
        }
    }
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, completion_model: Option<String>) -> Self {
        let model = completion_model.unwrap_or_else(|| "llama3.1".to_string());
        let url = base_url.unwrap_or_else(|| "http://localhost:11434".into());

        Self {
            http: HttpClient::new(),
            base_url: url.trim_end_matches('/').to_string(),
            completion_model: model,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ConfigurationError> {
        if config.llm_type != LlmType::Ollama {
            return Err(ConfigurationError::invalid("CHAT_LLM_TYPE", "expected ollama"));
        }

        Ok(Self::new(config.base_url.clone(), config.completion_model.clone()))
    }

    fn request(&self, messages: &[PromptMessage], options: &ChatOptions, stream: bool) -> ChatRequest {
        let messages = messages
            .iter()
            .map(|m| OllamaMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
                tool_calls: m.tool_calls
                    .iter()
                    .map(|call| OllamaToolCall {
                        function: OllamaFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    })
                    .collect(),
            })
            .collect();

        let tools = options.tools
            .iter()
            .map(|schema| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": schema.name,
                        "description": schema.description,
                        "parameters": schema.parameters,
                    }
                })
            })
            .collect();

        ChatRequest {
            model: self.completion_model.clone(),
            messages,
            stream,
            tools,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        }
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn chat(
        &self,
        messages: &[PromptMessage],
        options: &ChatOptions
    ) -> Result<ChatCompletion, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let req = self.request(messages, options, false);
        info!("ollama chat → model={} tools={}", self.completion_model, options.tools.len());

        let resp = self.http
            .post(&url)
            .json(&req)
            .send().await
            .map_err(|e| ProviderError::from_reqwest("ollama", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status("ollama", status.as_u16(), body));
        }

        let data = resp.json::<ChatResponse>().await.map_err(|e| ProviderError::from_reqwest("ollama", e))?;

        // Ollama does not assign call ids; synthesize stable ones per response.
        let tool_calls = data.message.tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, call)| ToolCall {
                id: format!("call_{}", i),
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        Ok(ChatCompletion {
            content: data.message.content,
            tool_calls,
        })
    }

    async fn chat_stream(
        &self,
        messages: &[PromptMessage],
        options: &ChatOptions
    ) -> Result<TextStream, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let req = self.request(messages, &options.without_tools(), true);
        Ok(http_stream_generate("ollama", self.http.post(&url).json(&req), parse_ndjson_line))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: LlmType::Ollama,
            model: self.completion_model.clone(),
            base_url: Some(self.base_url.clone()),
            supports_tools: true,
            supports_streaming: true,
        }
    }
}
