pub mod gemini;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use futures::{ stream, Future, Stream, StreamExt };
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ ChatCompletion, ChatOptions, LlmConfig, LlmType, ModelInfo, PromptMessage };
use crate::error::{ ConfigurationError, ProviderError };
use self::gemini::GeminiChatClient;
use self::ollama::OllamaClient;
use self::openai::OpenAIChatClient;

/// Finite stream of generated text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[PromptMessage],
        options: &ChatOptions
    ) -> Result<ChatCompletion, ProviderError>;

    async fn complete(&self, prompt: &str, options: &ChatOptions) -> Result<String, ProviderError> {
        let messages = [PromptMessage::user(prompt)];
        Ok(self.chat(&messages, &options.without_tools()).await?.content)
    }

    /// Clients without native streaming yield the whole answer as one fragment.
    async fn chat_stream(
        &self,
        messages: &[PromptMessage],
        options: &ChatOptions
    ) -> Result<TextStream, ProviderError> {
        let completion = self.chat(messages, &options.without_tools()).await?;
        Ok(Box::pin(stream::iter(vec![Ok(completion.content)])))
    }

    fn model_info(&self) -> ModelInfo;
}

pub fn create_streaming_response<F, Fut>(response_fn: F) -> TextStream
    where
        F: FnOnce(mpsc::Sender<Result<String, ProviderError>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

pub fn full_response_as_stream<F, Fut>(response_fn: F) -> TextStream
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<String, ProviderError>> + Send + 'static
{
    create_streaming_response(move |tx| async move {
        let _ = tx.send(response_fn().await).await;
    })
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, ConfigurationError> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Ollama => Arc::new(OllamaClient::from_config(config)?),
        LlmType::OpenAI | LlmType::AzureOpenAI => Arc::new(OpenAIChatClient::from_config(config)?),
        LlmType::Gemini => Arc::new(GeminiChatClient::from_config(config)?),
    };
    Ok(client)
}

/// What a provider-specific line parser made of one line of a streamed body.
#[derive(Debug, PartialEq)]
pub enum StreamLine {
    Fragment(String),
    Skip,
    Done,
    Failed(String),
}

/// Splits complete lines off the front of `buf`, leaving any partial tail in place.
pub fn drain_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line).trim_end_matches(['\r', '\n']).to_string();
        lines.push(text);
    }
    lines
}

/// Sends `request` and forwards every fragment recognised by `line_parser`.
///
/// The producer stops as soon as the receiver is dropped, even while the provider
/// is silent, which drops the response body and releases the connection.
pub fn http_stream_generate(
    provider: &'static str,
    request: reqwest::RequestBuilder,
    line_parser: fn(&str) -> StreamLine
) -> TextStream {
    create_streaming_response(move |tx| async move {
        let sent = tokio::select! {
            _ = tx.closed() => {
                return;
            }
            sent = request.send() => sent,
        };
        let resp = match sent {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(Err(ProviderError::from_reqwest(provider, e))).await;
                return;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let _ = tx.send(Err(ProviderError::from_status(provider, status.as_u16(), body))).await;
            return;
        }

        forward_lines(provider, resp.bytes_stream(), &tx, line_parser, |e| ProviderError::from_reqwest(provider, e)).await;
    })
}

/// Splits a byte stream into lines and forwards parsed fragments until the body ends,
/// the parser reports the end, or the receiver goes away.
async fn forward_lines<S, B, E>(
    provider: &'static str,
    bytes: S,
    tx: &mpsc::Sender<Result<String, ProviderError>>,
    line_parser: fn(&str) -> StreamLine,
    on_error: impl Fn(E) -> ProviderError
)
    where S: Stream<Item = Result<B, E>>, B: AsRef<[u8]>
{
    tokio::pin!(bytes);
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                return;
            }
            chunk = bytes.next() => chunk,
        };
        let data = match chunk {
            Some(Ok(data)) => data,
            Some(Err(e)) => {
                let _ = tx.send(Err(on_error(e))).await;
                return;
            }
            None => {
                break;
            }
        };

        buf.extend_from_slice(data.as_ref());
        for line in drain_lines(&mut buf) {
            match line_parser(&line) {
                StreamLine::Fragment(tok) => {
                    if tx.send(Ok(tok)).await.is_err() {
                        return;
                    }
                }
                StreamLine::Skip => {}
                StreamLine::Done => {
                    return;
                }
                StreamLine::Failed(message) => {
                    let _ = tx.send(Err(ProviderError::upstream(provider, message))).await;
                    return;
                }
            }
        }
    }

    let tail = String::from_utf8_lossy(&buf).trim().to_string();
    if !tail.is_empty() {
        if let StreamLine::Fragment(tok) = line_parser(&tail) {
            let _ = tx.send(Ok(tok)).await;
        }
    }
}
