use async_trait::async_trait;
use rllm::{ builder::{ LLMBackend, LLMBuilder }, LLMProvider };

use super::super::LlmConfig;
use super::{ rllm_embed, EmbeddingClient, EmbeddingResponse };
use crate::error::{ ConfigurationError, ProviderError };

pub struct OllamaEmbeddingClient {
    llm: Box<dyn LLMProvider + Send + Sync>,
}

impl OllamaEmbeddingClient {
    pub fn new(base_url: Option<String>, model: Option<String>) -> Result<Self, ConfigurationError> {
        let url = base_url.unwrap_or_else(|| "http://localhost:11434".to_string());
        let embed_model = model.unwrap_or_else(|| "nomic-embed-text".to_string());

        let llm = LLMBuilder::new()
            .backend(LLMBackend::Ollama)
            .base_url(url)
            .model(embed_model)
            .stream(false)
            .build()
            .map_err(|e| ConfigurationError::invalid("EMBEDDING_LLM_TYPE", e))?;

        Ok(Self { llm })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ConfigurationError> {
        Self::new(config.base_url.clone(), config.embedding_model.clone())
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, ProviderError> {
        let mut embeddings = rllm_embed("ollama", self.llm.as_ref(), vec![text.to_string()]).await?;
        let embedding = embeddings
            .pop()
            .ok_or_else(|| ProviderError::decode("ollama", "embedding generation returned no results"))?;

        Ok(EmbeddingResponse { embedding })
    }
}
