use async_trait::async_trait;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };

use super::super::LlmConfig;
use super::{ EmbeddingClient, EmbeddingResponse };
use crate::error::{ ConfigurationError, ProviderError };

const DEFAULT_API_VERSION: &str = "2024-06-01";

/// Azure OpenAI embeddings over the deployment endpoint.
pub struct AzureEmbeddingClient {
    http: HttpClient,
    endpoint: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingBody {
    data: Vec<EmbeddingData>,
}

impl AzureEmbeddingClient {
    pub fn new(
        api_key: String,
        endpoint: String,
        deployment: String,
        api_version: Option<String>
    ) -> Result<Self, ConfigurationError> {
        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            endpoint.trim_end_matches('/'),
            deployment,
            api_version.as_deref().unwrap_or(DEFAULT_API_VERSION)
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "api-key",
            HeaderValue::from_str(&api_key).map_err(|e| ConfigurationError::invalid("EMBEDDING_API_KEY", e))?
        );
        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigurationError::invalid("http client", e))?;

        Ok(Self { http, endpoint: url })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ConfigurationError> {
        let api_key = config.require_api_key("EMBEDDING_API_KEY")?;
        let endpoint = config.base_url
            .clone()
            .ok_or_else(|| ConfigurationError::missing("EMBEDDING_BASE_URL"))?;
        let deployment = config.deployment
            .clone()
            .or_else(|| config.embedding_model.clone())
            .ok_or_else(|| ConfigurationError::missing("EMBEDDING_DEPLOYMENT"))?;
        Self::new(api_key, endpoint, deployment, config.api_version.clone())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EmbeddingClient for AzureEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, ProviderError> {
        let embedding = self
            .embed_many(&[text.to_string()]).await?
            .pop()
            .ok_or_else(|| ProviderError::decode("azureopenai", "embedding generation returned no results"))?;
        Ok(EmbeddingResponse { embedding })
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self.http
            .post(&self.endpoint)
            .json(&(EmbeddingRequest { input: texts }))
            .send().await
            .map_err(|e| ProviderError::from_reqwest("azureopenai", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status("azureopenai", status.as_u16(), body));
        }

        let mut body = resp
            .json::<EmbeddingBody>().await
            .map_err(|e| ProviderError::from_reqwest("azureopenai", e))?;
        body.data.sort_by_key(|d| d.index);
        Ok(
            body.data
                .into_iter()
                .map(|d| d.embedding)
                .collect()
        )
    }
}
