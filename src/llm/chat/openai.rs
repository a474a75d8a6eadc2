use async_trait::async_trait;
use log::{ debug, info };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };
use serde_json::Value;

use super::{ http_stream_generate, ChatClient, StreamLine, TextStream };
use crate::error::{ ConfigurationError, ProviderError };
use crate::llm::{
    ChatCompletion,
    ChatOptions,
    LlmConfig,
    LlmType,
    ModelInfo,
    PromptMessage,
    ToolCall,
};
use crate::tools::ToolSchema;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";

/// Chat client for the OpenAI chat-completions wire format, public or Azure hosted.
pub struct OpenAIChatClient {
    http: HttpClient,
    provider: LlmType,
    model: String,
    base_url: String,
    endpoint: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct OpenAIMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Serialize, Deserialize, Debug)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Serialize)]
struct OpenAITool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: OpenAIFunctionDef<'a>,
}

#[derive(Serialize)]
struct OpenAIFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAITool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
}

fn to_wire_message(message: &PromptMessage) -> OpenAIMessage {
    let tool_calls = if message.tool_calls.is_empty() {
        None
    } else {
        Some(
            message.tool_calls
                .iter()
                .map(|call| OpenAIToolCall {
                    id: call.id.clone(),
                    call_type: function_type(),
                    function: OpenAIFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect()
        )
    };

    OpenAIMessage {
        role: message.role.as_str().to_string(),
        content: Some(message.content.clone()),
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn to_wire_tool(schema: &ToolSchema) -> OpenAITool<'_> {
    OpenAITool {
        tool_type: "function",
        function: OpenAIFunctionDef {
            name: &schema.name,
            description: &schema.description,
            parameters: &schema.parameters,
        },
    }
}

/// Tool arguments arrive as a JSON-encoded string; anything unparsable is kept verbatim.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_sse_line(line: &str) -> StreamLine {
    let line = line.trim();
    let data = match line.strip_prefix("data:") {
        Some(d) => d.trim(),
        None => {
            return StreamLine::Skip;
        }
    };
    if data == "[DONE]" {
        return StreamLine::Done;
    }
    match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(chunk) => {
            let mut text = String::new();
            let mut finished = false;
            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    text.push_str(&content);
                }
                if choice.finish_reason.is_some() {
                    finished = true;
                }
            }
            if !text.is_empty() {
                StreamLine::Fragment(text)
            } else if finished {
                StreamLine::Done
            } else {
                StreamLine::Skip
            }
        }
        Err(e) => {
            if let Ok(err) = serde_json::from_str::<Value>(data) {
                if let Some(message) = err.pointer("/error/message").and_then(Value::as_str) {
                    return StreamLine::Failed(message.to_string());
                }
            }
            debug!("Skipping unparsable SSE data ({}): {}", e, data);
            StreamLine::Skip
        }
    }
}

impl OpenAIChatClient {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Result<Self, ConfigurationError> {
        let model = model.unwrap_or_else(|| "gpt-4o".to_string());
        let base_url = base_url.unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
        let trimmed = base_url.trim_end_matches('/');
        let endpoint = if trimmed.ends_with("/chat/completions") {
            trimmed.to_string()
        } else {
            format!("{}/chat/completions", trimmed)
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
                ConfigurationError::invalid("CHAT_API_KEY", e)
            )?
        );

        Ok(Self {
            http: build_http(headers)?,
            provider: LlmType::OpenAI,
            model,
            base_url,
            endpoint,
        })
    }

    pub fn azure(
        api_key: String,
        endpoint: String,
        deployment: String,
        api_version: Option<String>
    ) -> Result<Self, ConfigurationError> {
        let api_version = api_version.unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.trim_end_matches('/'),
            deployment,
            api_version
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "api-key",
            HeaderValue::from_str(&api_key).map_err(|e| ConfigurationError::invalid("CHAT_API_KEY", e))?
        );

        Ok(Self {
            http: build_http(headers)?,
            provider: LlmType::AzureOpenAI,
            model: deployment,
            base_url: endpoint,
            endpoint: url,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ConfigurationError> {
        let api_key = config.require_api_key("CHAT_API_KEY")?;
        match config.llm_type {
            LlmType::AzureOpenAI => {
                let endpoint = config.base_url
                    .clone()
                    .ok_or_else(|| ConfigurationError::missing("CHAT_BASE_URL"))?;
                let deployment = config.deployment
                    .clone()
                    .or_else(|| config.completion_model.clone())
                    .ok_or_else(|| ConfigurationError::missing("CHAT_DEPLOYMENT"))?;
                Self::azure(api_key, endpoint, deployment, config.api_version.clone())
            }
            _ => Self::new(api_key, config.completion_model.clone(), config.base_url.clone()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn provider_name(&self) -> &'static str {
        match self.provider {
            LlmType::AzureOpenAI => "azureopenai",
            _ => "openai",
        }
    }

    fn request<'a>(
        &'a self,
        messages: &[PromptMessage],
        options: &'a ChatOptions,
        stream: bool
    ) -> OpenAIChatRequest<'a> {
        OpenAIChatRequest {
            // Azure routes by deployment, the model field is ignored there.
            model: match self.provider {
                LlmType::AzureOpenAI => None,
                _ => Some(&self.model),
            },
            messages: messages.iter().map(to_wire_message).collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            tools: options.tools.iter().map(to_wire_tool).collect(),
            stream: if stream { Some(true) } else { None },
        }
    }
}

fn build_http(headers: HeaderMap) -> Result<HttpClient, ConfigurationError> {
    HttpClient::builder()
        .default_headers(headers)
        .build()
        .map_err(|e| ConfigurationError::invalid("http client", e))
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn chat(
        &self,
        messages: &[PromptMessage],
        options: &ChatOptions
    ) -> Result<ChatCompletion, ProviderError> {
        let provider = self.provider_name();
        let req = self.request(messages, options, false);
        info!(
            "{} chat → model={} messages={} tools={}",
            provider,
            self.model,
            messages.len(),
            options.tools.len()
        );

        let resp = self.http
            .post(&self.endpoint)
            .json(&req)
            .send().await
            .map_err(|e| ProviderError::from_reqwest(provider, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(provider, status.as_u16(), body));
        }

        let data = resp.json::<OpenAIResponse>().await.map_err(|e| ProviderError::from_reqwest(provider, e))?;

        let message = data.choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::decode(provider, "response contained no choices"))?
            .message;

        let tool_calls = message.tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: parse_arguments(&call.function.arguments),
            })
            .collect();

        Ok(ChatCompletion {
            content: message.content.unwrap_or_default(),
            tool_calls,
        })
    }

    async fn chat_stream(
        &self,
        messages: &[PromptMessage],
        options: &ChatOptions
    ) -> Result<TextStream, ProviderError> {
        let no_tools = options.without_tools();
        let req = self.request(messages, &no_tools, true);
        let request = self.http.post(&self.endpoint).json(&req);
        Ok(http_stream_generate(self.provider_name(), request, parse_sse_line))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: self.provider,
            model: self.model.clone(),
            base_url: Some(self.base_url.clone()),
            supports_tools: true,
            supports_streaming: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::PromptRole;
    use serde_json::json;

    #[test]
    fn azure_endpoint_uses_deployment_and_version() {
        let client = OpenAIChatClient::azure(
            "k".into(),
            "https://acme.openai.azure.com/".into(),
            "gpt4o-prod".into(),
            Some("2024-02-15-preview".into())
        ).unwrap();
        assert_eq!(
            client.endpoint(),
            "https://acme.openai.azure.com/openai/deployments/gpt4o-prod/chat/completions?api-version=2024-02-15-preview"
        );
        assert_eq!(client.model_info().provider, LlmType::AzureOpenAI);
    }

    #[test]
    fn azure_requires_endpoint() {
        let config = LlmConfig {
            llm_type: LlmType::AzureOpenAI,
            api_key: Some("k".into()),
            deployment: Some("d".into()),
            ..Default::default()
        };
        let err = OpenAIChatClient::from_config(&config).err().unwrap();
        assert!(matches!(err, ConfigurationError::Missing(ref k) if k == "CHAT_BASE_URL"));
    }

    #[test]
    fn openai_endpoint_appends_route_once() {
        let a = OpenAIChatClient::new("k".into(), None, None).unwrap();
        assert_eq!(a.endpoint(), "https://api.openai.com/v1/chat/completions");
        let b = OpenAIChatClient::new(
            "k".into(),
            None,
            Some("http://proxy/v1/chat/completions".into())
        ).unwrap();
        assert_eq!(b.endpoint(), "http://proxy/v1/chat/completions");
    }

    #[test]
    fn tool_messages_serialize_with_call_ids() {
        let call = ToolCall { id: "call_1".into(), name: "web_search".into(), arguments: json!({"query": "rust"}) };
        let assistant = to_wire_message(&PromptMessage::assistant_tool_calls("", vec![call]));
        let value = serde_json::to_value(&assistant).unwrap();
        assert_eq!(value["tool_calls"][0]["function"]["name"], "web_search");
        assert_eq!(value["tool_calls"][0]["function"]["arguments"], "{\"query\":\"rust\"}");

        let result = PromptMessage::tool_result("call_1", "[]");
        assert_eq!(result.role, PromptRole::Tool);
        let value = serde_json::to_value(to_wire_message(&result)).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
    }

    #[test]
    fn unparsable_arguments_are_kept_as_string() {
        assert_eq!(parse_arguments("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_arguments("not json"), json!("not json"));
        assert_eq!(parse_arguments(""), json!({}));
    }

    #[test]
    fn sse_lines_parse_into_fragments() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        assert_eq!(parse_sse_line(line), StreamLine::Fragment("Hel".into()));
        assert_eq!(parse_sse_line("data: [DONE]"), StreamLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), StreamLine::Skip);
        let stop = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_sse_line(stop), StreamLine::Done);
        let err = r#"data: {"error":{"message":"content filtered"}}"#;
        assert_eq!(parse_sse_line(err), StreamLine::Failed("content filtered".into()));
    }
}
