//! In-crate fakes for the provider, embedding, search and tool boundaries.

use async_trait::async_trait;
use futures::stream;
use serde_json::{ json, Value };
use std::collections::VecDeque;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };

use crate::error::{ ProviderError, ToolError };
use crate::llm::chat::{ ChatClient, TextStream };
use crate::llm::embedding::{ EmbeddingClient, EmbeddingResponse };
use crate::llm::{ ChatCompletion, ChatOptions, LlmClient, LlmType, ModelInfo, PromptMessage };
use crate::tools::web_search::{ SearchHit, WebSearch };
use crate::tools::{ Tool, ToolSchema };

/// Replays scripted completions in order and records every request it sees.
pub struct ScriptedChatClient {
    script: Mutex<VecDeque<Result<ChatCompletion, ProviderError>>>,
    requests: Mutex<Vec<Vec<PromptMessage>>>,
    tool_counts: Mutex<Vec<usize>>,
    fail_stream_after: Option<usize>,
}

impl ScriptedChatClient {
    pub fn new(script: Vec<Result<ChatCompletion, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            tool_counts: Mutex::new(Vec::new()),
            fail_stream_after: None,
        }
    }

    pub fn replying(answers: &[&str]) -> Self {
        Self::new(
            answers
                .iter()
                .map(|a| Ok(ChatCompletion::text(*a)))
                .collect()
        )
    }

    /// Streams yield `n` fragments and then an upstream error.
    pub fn failing_stream_after(mut self, n: usize) -> Self {
        self.fail_stream_after = Some(n);
        self
    }

    pub fn requests(&self) -> Vec<Vec<PromptMessage>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn tool_counts(&self) -> Vec<usize> {
        self.tool_counts.lock().unwrap().clone()
    }

    fn next(&self, messages: &[PromptMessage], options: &ChatOptions) -> Result<ChatCompletion, ProviderError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.tool_counts.lock().unwrap().push(options.tools.len());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::upstream("scripted", "script exhausted")))
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn chat(&self, messages: &[PromptMessage], options: &ChatOptions) -> Result<ChatCompletion, ProviderError> {
        self.next(messages, options)
    }

    async fn chat_stream(&self, messages: &[PromptMessage], options: &ChatOptions) -> Result<TextStream, ProviderError> {
        let completion = self.next(messages, options)?;
        let mut fragments: Vec<Result<String, ProviderError>> = completion.content
            .split_inclusive(' ')
            .map(|s| Ok(s.to_string()))
            .collect();
        if let Some(n) = self.fail_stream_after {
            fragments.truncate(n);
            fragments.push(Err(ProviderError::upstream("scripted", "stream broke")));
        }
        Ok(Box::pin(stream::iter(fragments)))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: LlmType::Ollama,
            model: "scripted".into(),
            base_url: None,
            supports_tools: true,
            supports_streaming: true,
        }
    }
}

pub const FAKE_DIM: usize = 32;

/// Deterministic bag-of-words embedding: texts sharing words score high under cosine.
pub struct FakeEmbedder {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self { calls: AtomicUsize::new(0), fail: false }
    }

    pub fn failing() -> Self {
        Self { calls: AtomicUsize::new(0), fail: true }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; FAKE_DIM];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let word = word.to_lowercase();
            let bucket = word.bytes().fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize)) % FAKE_DIM;
            v[bucket] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingClient for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::from_status("fake-embed", 503, "unavailable"));
        }
        Ok(EmbeddingResponse { embedding: Self::vector(text) })
    }
}

pub fn scripted_llm(client: Arc<ScriptedChatClient>) -> LlmClient {
    LlmClient::new(client, Some(Arc::new(FakeEmbedder::new())), ChatOptions::default())
}

pub struct FakeSearch {
    hits_per_query: usize,
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn with_hits(hits_per_query: usize) -> Self {
        Self { hits_per_query, fail: false, queries: Mutex::new(Vec::new()) }
    }

    pub fn failing() -> Self {
        Self { hits_per_query: 0, fail: true, queries: Mutex::new(Vec::new()) }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebSearch for FakeSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ProviderError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(ProviderError::from_status("tavily", 500, "search down"));
        }
        let slug = query.replace(' ', "-");
        Ok(
            (1..=self.hits_per_query.min(max_results))
                .map(|i| SearchHit {
                    title: format!("Result {} for {}", i, query),
                    url: format!("https://example.com/{}/{}", slug, i),
                    snippet: format!("Snippet {} about {}", i, query),
                })
                .collect()
        )
    }
}

/// Tool with a `{query: string}` schema that returns a fixed output and counts executions.
pub struct RecordingTool {
    schema: ToolSchema,
    output: String,
    calls: AtomicUsize,
}

impl RecordingTool {
    pub fn new(name: &str, output: &str) -> Self {
        Self {
            schema: ToolSchema::new(
                name,
                "Test tool",
                json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                })
            ),
            output: output.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, _arguments: Value) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}
