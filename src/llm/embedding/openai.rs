use async_trait::async_trait;
use rllm::{ builder::{ LLMBackend, LLMBuilder }, LLMProvider };

use super::super::LlmConfig;
use super::{ rllm_embed, EmbeddingClient, EmbeddingResponse };
use crate::error::{ ConfigurationError, ProviderError };

pub struct OpenAIEmbeddingClient {
    llm: Box<dyn LLMProvider + Send + Sync>,
}

impl OpenAIEmbeddingClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        dimensions: Option<u32>
    ) -> Result<Self, ConfigurationError> {
        let model_name = model.unwrap_or_else(|| "text-embedding-3-small".to_string());

        let mut builder = LLMBuilder::new()
            .backend(LLMBackend::OpenAI)
            .api_key(api_key)
            .model(&model_name);

        if let Some(url) = base_url {
            builder = builder.base_url(url);
        }
        if let Some(dims) = dimensions {
            builder = builder.embedding_dimensions(dims);
        }

        let llm = builder.build().map_err(|e| ConfigurationError::invalid("EMBEDDING_LLM_TYPE", e))?;

        Ok(Self { llm })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ConfigurationError> {
        let api_key = config.require_api_key("EMBEDDING_API_KEY")?;
        Self::new(api_key, config.embedding_model.clone(), config.base_url.clone(), None)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, ProviderError> {
        let mut embeddings = rllm_embed("openai", self.llm.as_ref(), vec![text.to_string()]).await?;
        let embedding = embeddings
            .pop()
            .ok_or_else(|| ProviderError::decode("openai", "embedding generation returned no results"))?;

        Ok(EmbeddingResponse { embedding })
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        rllm_embed("openai", self.llm.as_ref(), texts.to_vec()).await
    }
}
