pub mod repl;

use clap::{ Parser, Subcommand };
use log::info;

use crate::error::ConfigurationError;
use crate::llm::{ LlmConfig, LlmType };

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the REST API server (default).
    Serve,
    /// Chat with the active expert from the terminal.
    Chat {
        /// Conversation to continue; a new id is generated when omitted.
        #[arg(long)]
        conversation_id: Option<String>,

        /// Print whole answers instead of streaming fragments.
        #[arg(long, default_value = "false")]
        no_stream: bool,
    },
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    // --- History Store Args ---
    /// History chat store type (redis, memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "redis")]
    pub history_type: String,

    /// History chat store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379")]
    pub history_host: String,

    /// Prefix for Redis history keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "history:")]
    pub history_redis_prefix: String,

    /// Batch size for Redis SCAN command when listing history.
    #[arg(long, env = "HISTORY_REDIS_SCAN_COUNT", default_value = "100")]
    pub history_redis_scan_count: usize,

    /// Number of recent messages passed to the experts as context.
    #[arg(long, env = "HISTORY_WINDOW", default_value = "6")]
    pub history_window: usize,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (ollama, openai, azureopenai, gemini)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "ollama")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API (e.g., http://localhost:11434 for Ollama, the resource endpoint for Azure)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., gpt-4o, llama3.1, gemini-1.5-flash)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    /// Azure OpenAI deployment for chat. Falls back to CHAT_MODEL.
    #[arg(long, env = "CHAT_DEPLOYMENT")]
    pub chat_deployment: Option<String>,

    /// Azure OpenAI api-version for chat.
    #[arg(long, env = "CHAT_API_VERSION")]
    pub chat_api_version: Option<String>,

    /// Sampling temperature.
    #[arg(long, env = "CHAT_TEMPERATURE")]
    pub chat_temperature: Option<f32>,

    /// Maximum tokens per completion.
    #[arg(long, env = "CHAT_MAX_TOKENS")]
    pub chat_max_tokens: Option<u32>,

    // --- Embedding LLM Provider Args ---
    /// Type of LLM provider for text embedding (ollama, openai, azureopenai, gemini)
    #[arg(long, env = "EMBEDDING_LLM_TYPE", default_value = "ollama")]
    pub embedding_llm_type: String,

    /// Base URL for the Embedding LLM provider API (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "EMBEDDING_BASE_URL")] // No default, let adapters handle defaults if None
    pub embedding_base_url: Option<String>,

    /// API Key for the Embedding LLM provider
    #[arg(long, env = "EMBEDDING_API_KEY", default_value = "")]
    pub embedding_api_key: String,

    /// Model name for text embedding (e.g., text-embedding-3-small, nomic-embed-text)
    #[arg(long, env = "EMBEDDING_MODEL")] // No default, rely on adapter defaults if None
    pub embedding_model: Option<String>,

    /// Azure OpenAI deployment for embeddings. Falls back to EMBEDDING_MODEL.
    #[arg(long, env = "EMBEDDING_DEPLOYMENT")]
    pub embedding_deployment: Option<String>,

    /// Azure OpenAI api-version for embeddings.
    #[arg(long, env = "EMBEDDING_API_VERSION")]
    pub embedding_api_version: Option<String>,

    // --- Vector Store Args ---
    /// Vector index type (memory, qdrant)
    #[arg(short = 't', long, env = "VECTOR_TYPE", default_value = "memory")]
    pub vector_type: String,

    /// Vector database URL/host endpoint (e.g., http://localhost:6334)
    #[arg(long, env = "VECTOR_HOST", default_value = "http://localhost:6334")]
    pub host: String,

    /// API key for the vector database (Qdrant)
    #[arg(short = 'k', env = "VECTOR_SECRET", long, default_value = "")]
    pub secret: String,

    /// Collection name for the vector index
    #[arg(long, env = "VECTOR_INDEX_NAME", default_value = "documents")]
    pub indexes: String,

    /// Vector dimension size; 0 lets the in-memory index accept any size
    #[arg(long, env = "VECTOR_DIMENSION", default_value = "768")]
    pub dimension: usize,

    // --- Expert / Brain Args ---
    /// Comma separated experts to register (QNA, RAG, DEEPRESEARCH)
    #[arg(long, env = "EXPERTS", default_value = "QNA,RAG")]
    pub experts: String,

    /// Expert active at startup.
    #[arg(long, env = "DEFAULT_EXPERT", default_value = "QNA")]
    pub default_expert: String,

    /// Brain used by the QnA and RAG experts (agent, llm)
    #[arg(long, env = "BRAIN_TYPE", default_value = "agent")]
    pub brain_type: String,

    /// Maximum tool-call rounds per answer.
    #[arg(long, env = "MAX_TOOL_ROUNDS", default_value = "4")]
    pub max_tool_rounds: usize,

    /// Maximum search rounds per deep research answer.
    #[arg(long, env = "MAX_RESEARCH_LOOPS", default_value = "2")]
    pub max_research_loops: usize,

    /// Maximum search queries generated per research round.
    #[arg(long, env = "RESEARCH_INITIAL_QUERIES", default_value = "3")]
    pub research_initial_queries: usize,

    /// Default number of results to retrieve in RAG queries.
    #[arg(long, env = "RAG_DEFAULT_LIMIT", default_value = "5")]
    pub rag_default_limit: usize,

    /// Maximum characters per indexed chunk.
    #[arg(long, env = "RAG_CHUNK_SIZE", default_value = "1000")]
    pub rag_chunk_size: usize,

    // --- Web Search Args ---
    /// Web search backend (tavily, serpapi)
    #[arg(long, env = "SEARCH_TYPE", default_value = "tavily")]
    pub search_type: String,

    /// API key for the web search backend. Web search is disabled when empty.
    #[arg(long, env = "SEARCH_API_KEY", default_value = "")]
    pub search_api_key: String,

    /// Override for the search backend URL.
    #[arg(long, env = "SEARCH_BASE_URL")]
    pub search_base_url: Option<String>,

    /// Results requested per search query.
    #[arg(long, env = "SEARCH_MAX_RESULTS", default_value = "5")]
    pub search_max_results: usize,

    // --- General App Args ---
    /// Path to the prompt configuration file. Built-in prompts are used when it does not exist.
    #[arg(long, env = "PROMPTS_PATH", default_value = "json/prompts.json")]
    pub prompts_path: String,

    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional API Key required for clients to call the API. Sent as `x-api-key` or a Bearer token.
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,

    /// Requests per second allowed across all clients.
    #[arg(long, env = "RATE_LIMIT_PER_SECOND", default_value = "20")]
    pub rate_limit_per_second: u32,

    /// Burst size for the rate limiter.
    #[arg(long, env = "RATE_LIMIT_BURST", default_value = "40")]
    pub rate_limit_burst: u32,

    /// Optional path to the TLS certificate file (PEM format) for enabling HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

fn non_empty(value: &str) -> Option<String> {
    Some(value.trim().to_string()).filter(|v| !v.is_empty())
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    pub fn chat_llm_config(&self) -> Result<LlmConfig, ConfigurationError> {
        let llm_type: LlmType = self.chat_llm_type
            .parse()
            .map_err(|e| ConfigurationError::invalid("CHAT_LLM_TYPE", e))?;
        Ok(LlmConfig {
            llm_type,
            api_key: non_empty(&self.chat_api_key),
            completion_model: self.chat_model.clone(),
            embedding_model: None,
            base_url: self.chat_base_url.clone(),
            deployment: self.chat_deployment.clone(),
            api_version: self.chat_api_version.clone(),
            temperature: self.chat_temperature,
            max_tokens: self.chat_max_tokens,
        })
    }

    pub fn embedding_llm_config(&self) -> Result<LlmConfig, ConfigurationError> {
        let llm_type: LlmType = self.embedding_llm_type
            .parse()
            .map_err(|e| ConfigurationError::invalid("EMBEDDING_LLM_TYPE", e))?;
        Ok(LlmConfig {
            llm_type,
            api_key: non_empty(&self.embedding_api_key),
            completion_model: None,
            embedding_model: self.embedding_model.clone(),
            base_url: self.embedding_base_url.clone(),
            deployment: self.embedding_deployment.clone(),
            api_version: self.embedding_api_version.clone(),
            temperature: None,
            max_tokens: None,
        })
    }

    /// Logs the effective configuration. Secrets are reported as set/unset only.
    pub fn log_configuration(&self) {
        let set = |v: bool| if v { "set" } else { "not set" };
        info!("--- Core Configuration ---");
        info!("Server Address: {}", self.server_addr);
        info!("Experts: {} (default {})", self.experts, self.default_expert);
        info!("Brain Type: {} (max tool rounds {})", self.brain_type, self.max_tool_rounds);
        info!("Chat LLM Type: {}", self.chat_llm_type);
        info!("Chat Model: {}", self.chat_model.as_deref().unwrap_or("(adapter default)"));
        info!("Chat API Key: {}", set(!self.chat_api_key.is_empty()));
        info!("Embedding LLM Type: {}", self.embedding_llm_type);
        info!("History Store Type: {}", self.history_type);
        info!("History Store Host: {}", self.history_host);
        info!("History Window: {}", self.history_window);
        info!("Vector Store Type: {}", self.vector_type);
        info!("Vector Store Host: {}", self.host);
        info!("Search Backend: {} (API key {})", self.search_type, set(!self.search_api_key.is_empty()));
        info!("Prompts Path: {}", self.prompts_path);
        info!("Server API Key: {}", set(self.server_api_key.is_some()));
        info!("TLS Enabled: {}", self.enable_tls);
        info!("-------------------------");
    }
}
