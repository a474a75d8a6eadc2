pub mod azure;
pub mod gemini;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use rllm::LLMProvider;
use std::sync::Arc;

use super::{ LlmConfig, LlmType };
use crate::error::{ ConfigurationError, ProviderError };
use self::azure::AzureEmbeddingClient;
use self::gemini::GoogleEmbeddingClient as GeminiEmbeddingClient;
use self::ollama::OllamaEmbeddingClient;
use self::openai::OpenAIEmbeddingClient;

#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, ProviderError>;

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?.embedding);
        }
        Ok(out)
    }
}

/// Shared batch call for the `rllm`-backed clients.
pub(crate) async fn rllm_embed(
    provider: &'static str,
    llm: &(dyn LLMProvider + Send + Sync),
    texts: Vec<String>
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let expected = texts.len();
    let embeddings = llm.embed(texts).await.map_err(|e| ProviderError::upstream(provider, e.to_string()))?;
    if embeddings.len() != expected {
        return Err(
            ProviderError::decode(
                provider,
                format!("expected {} embeddings, got {}", expected, embeddings.len())
            )
        );
    }
    Ok(embeddings)
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn EmbeddingClient>, ConfigurationError> {
    let client: Arc<dyn EmbeddingClient> = match config.llm_type {
        LlmType::Ollama => Arc::new(OllamaEmbeddingClient::from_config(config)?),
        LlmType::OpenAI => Arc::new(OpenAIEmbeddingClient::from_config(config)?),
        LlmType::AzureOpenAI => Arc::new(AzureEmbeddingClient::from_config(config)?),
        LlmType::Gemini => Arc::new(GeminiEmbeddingClient::from_config(config)?),
    };
    Ok(client)
}
