use async_trait::async_trait;
use rllm::{ builder::{ LLMBackend, LLMBuilder }, LLMProvider };

use super::super::LlmConfig;
use super::{ rllm_embed, EmbeddingClient, EmbeddingResponse };
use crate::error::{ ConfigurationError, ProviderError };

pub struct GoogleEmbeddingClient {
    llm: Box<dyn LLMProvider + Send + Sync>,
}

impl GoogleEmbeddingClient {
    pub fn new(api_key: String, model: Option<String>) -> Result<Self, ConfigurationError> {
        let embed_model = model.unwrap_or_else(|| "text-embedding-004".to_string());

        let llm = LLMBuilder::new()
            .backend(LLMBackend::Google)
            .api_key(api_key)
            .model(embed_model)
            .stream(false)
            .build()
            .map_err(|e| ConfigurationError::invalid("EMBEDDING_LLM_TYPE", e))?;

        Ok(Self { llm })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ConfigurationError> {
        let api_key = config.require_api_key("EMBEDDING_API_KEY")?;
        Self::new(api_key, config.embedding_model.clone())
    }
}

#[async_trait]
impl EmbeddingClient for GoogleEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, ProviderError> {
        let mut embeddings = rllm_embed("gemini", self.llm.as_ref(), vec![text.to_string()]).await?;
        let embedding = embeddings
            .pop()
            .ok_or_else(|| ProviderError::decode("gemini", "embedding generation returned no results"))?;

        Ok(EmbeddingResponse { embedding })
    }
}
