use async_trait::async_trait;
use log::info;
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use serde_json::{ json, Value };
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::{ Tool, ToolSchema };
use crate::error::{ ConfigurationError, ProviderError, ToolError };

pub const WEB_SEARCH_TOOL: &str = "web_search";
const MAX_RESULTS_CAP: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Remote web-search boundary.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBackend {
    Tavily,
    SerpApi,
}

impl FromStr for SearchBackend {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tavily" => Ok(SearchBackend::Tavily),
            "serpapi" | "serp" => Ok(SearchBackend::SerpApi),
            other => Err(ConfigurationError::invalid("SEARCH_TYPE", format!("unsupported search backend '{}'", other))),
        }
    }
}

impl fmt::Display for SearchBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchBackend::Tavily => f.write_str("tavily"),
            SearchBackend::SerpApi => f.write_str("serpapi"),
        }
    }
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct SerpResponse {
    #[serde(default)]
    organic_results: Vec<SerpResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct SerpResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

fn parse_tavily(body: Value) -> Result<Vec<SearchHit>, ProviderError> {
    let resp: TavilyResponse = serde_json::from_value(body)
        .map_err(|e| ProviderError::decode("tavily", e.to_string()))?;
    Ok(
        resp.results
            .into_iter()
            .map(|r| SearchHit { title: r.title, url: r.url, snippet: r.content })
            .collect()
    )
}

fn parse_serp(body: Value) -> Result<Vec<SearchHit>, ProviderError> {
    let resp: SerpResponse = serde_json::from_value(body)
        .map_err(|e| ProviderError::decode("serpapi", e.to_string()))?;
    if let Some(error) = resp.error {
        // SerpAPI reports "no results" as an error string.
        if error.to_lowercase().contains("hasn't returned any results") {
            return Ok(Vec::new());
        }
        return Err(ProviderError::upstream("serpapi", error));
    }
    Ok(
        resp.organic_results
            .into_iter()
            .map(|r| SearchHit { title: r.title, url: r.link, snippet: r.snippet })
            .collect()
    )
}

pub struct HttpWebSearch {
    http: HttpClient,
    backend: SearchBackend,
    api_key: String,
    base_url: String,
}

impl HttpWebSearch {
    pub fn new(backend: SearchBackend, api_key: String, base_url: Option<String>) -> Result<Self, ConfigurationError> {
        if api_key.trim().is_empty() {
            return Err(ConfigurationError::missing("SEARCH_API_KEY"));
        }
        let base_url = base_url.unwrap_or_else(|| {
            let default = match backend {
                SearchBackend::Tavily => "https://api.tavily.com/search",
                SearchBackend::SerpApi => "https://serpapi.com/search.json",
            };
            default.to_string()
        });
        Ok(Self {
            http: HttpClient::new(),
            backend,
            api_key,
            base_url,
        })
    }

    fn provider(&self) -> &'static str {
        match self.backend {
            SearchBackend::Tavily => "tavily",
            SearchBackend::SerpApi => "serpapi",
        }
    }
}

#[async_trait]
impl WebSearch for HttpWebSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ProviderError> {
        let provider = self.provider();
        info!("{} search: {}", provider, query);

        let request = match self.backend {
            SearchBackend::Tavily =>
                self.http.post(&self.base_url).json(
                    &json!({
                        "api_key": self.api_key,
                        "query": query,
                        "max_results": max_results,
                    })
                ),
            SearchBackend::SerpApi => {
                let num = max_results.to_string();
                self.http.get(&self.base_url).query(
                    &[
                        ("engine", "google"),
                        ("gl", "us"),
                        ("hl", "en"),
                        ("q", query),
                        ("num", num.as_str()),
                        ("api_key", self.api_key.as_str()),
                    ]
                )
            }
        };

        let resp = request.send().await.map_err(|e| ProviderError::from_reqwest(provider, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(provider, status.as_u16(), body));
        }
        let body = resp.json::<Value>().await.map_err(|e| ProviderError::from_reqwest(provider, e))?;

        let mut hits = match self.backend {
            SearchBackend::Tavily => parse_tavily(body)?,
            SearchBackend::SerpApi => parse_serp(body)?,
        };
        hits.truncate(max_results);
        Ok(hits)
    }
}

/// Exposes a [`WebSearch`] backend to brains as the `web_search` tool.
pub struct WebSearchTool {
    search: Arc<dyn WebSearch>,
    schema: ToolSchema,
    default_max_results: usize,
}

impl WebSearchTool {
    pub fn new(search: Arc<dyn WebSearch>, default_max_results: usize) -> Self {
        let schema = ToolSchema::new(
            WEB_SEARCH_TOOL,
            "Search the web. Useful for current events, dates or factual information.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The search query"},
                    "max_results": {"type": "integer", "description": "Number of results to return"}
                },
                "required": ["query"],
                "additionalProperties": false
            })
        );
        Self {
            search,
            schema,
            default_max_results: default_max_results.clamp(1, MAX_RESULTS_CAP),
        }
    }

    pub fn backend(&self) -> Arc<dyn WebSearch> {
        self.search.clone()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, arguments: Value) -> Result<String, ToolError> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::invalid_arguments(WEB_SEARCH_TOOL, "query must be a non-empty string"))?;
        let max_results = arguments
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| (n as usize).clamp(1, MAX_RESULTS_CAP))
            .unwrap_or(self.default_max_results);

        let hits = self.search
            .search(query, max_results).await
            .map_err(|e| ToolError::execution_failed(WEB_SEARCH_TOOL, e.to_string()))?;
        serde_json::to_string(&hits).map_err(|e| ToolError::execution_failed(WEB_SEARCH_TOOL, e.to_string()))
    }
}
