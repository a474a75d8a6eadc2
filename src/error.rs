//! Error taxonomy shared by every layer of the service.

use std::fmt;

use thiserror::Error;

use crate::experts::ExpertType;

/// Missing or invalid settings. Raised while building components, never retried.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing required setting '{0}'")]
    Missing(String),

    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigurationError {
    pub fn missing(key: impl Into<String>) -> Self {
        ConfigurationError::Missing(key.into())
    }

    pub fn invalid(key: impl Into<String>, reason: impl fmt::Display) -> Self {
        ConfigurationError::Invalid {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Auth,
    Quota,
    Timeout,
    MalformedInput,
    Upstream,
    Transport,
    Decode,
    Unsupported,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProviderErrorKind::Auth => "auth",
            ProviderErrorKind::Quota => "quota",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::MalformedInput => "malformed input",
            ProviderErrorKind::Upstream => "upstream",
            ProviderErrorKind::Transport => "transport",
            ProviderErrorKind::Decode => "decode",
            ProviderErrorKind::Unsupported => "unsupported",
        };
        f.write_str(label)
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

fn tool_verb(kind: &ToolErrorKind) -> &'static str {
    match kind {
        ToolErrorKind::InvalidArguments => "rejected its arguments",
        ToolErrorKind::ExecutionFailed => "failed",
    }
}

fn join_types(types: &[ExpertType]) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A failed call to a remote LLM, embedding or search endpoint.
#[derive(Debug, Clone, Error)]
#[error("{provider} {kind} error{}: {message}", status_suffix(.status))]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Classifies a non-success HTTP status returned by a provider.
    pub fn from_status(provider: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            429 => ProviderErrorKind::Quota,
            408 | 504 => ProviderErrorKind::Timeout,
            400 | 404 | 413 | 422 => ProviderErrorKind::MalformedInput,
            _ => ProviderErrorKind::Upstream,
        };
        Self {
            provider: provider.into(),
            kind,
            status: Some(status),
            message: body.into(),
        }
    }

    pub fn from_reqwest(provider: impl Into<String>, err: reqwest::Error) -> Self {
        let provider = provider.into();
        if let Some(status) = err.status() {
            return Self::from_status(provider, status.as_u16(), err.to_string());
        }
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else if err.is_decode() {
            ProviderErrorKind::Decode
        } else {
            ProviderErrorKind::Transport
        };
        Self::new(provider, kind, err.to_string())
    }

    pub fn upstream(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Upstream, message)
    }

    pub fn decode(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Decode, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    InvalidArguments,
    ExecutionFailed,
}

/// Failure of a single tool invocation. Never fatal to a brain's reasoning.
#[derive(Debug, Clone, Error)]
#[error("tool '{tool}' {}: {message}", tool_verb(.kind))]
pub struct ToolError {
    pub tool: String,
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            kind: ToolErrorKind::InvalidArguments,
            message: message.into(),
        }
    }

    pub fn execution_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            kind: ToolErrorKind::ExecutionFailed,
            message: message.into(),
        }
    }
}

/// Unrecoverable failure inside one `think()` call.
#[derive(Debug, Error)]
pub enum BrainError {
    #[error("LLM call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("could not interpret model output: {0}")]
    MalformedOutput(String),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history backend error: {0}")]
    Backend(String),

    #[error("history serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for HistoryError {
    fn from(err: redis::RedisError) -> Self {
        HistoryError::Backend(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] ProviderError),

    #[error("vector index error: {0}")]
    Index(String),

    #[error("document is empty")]
    EmptyDocument,
}

/// Which boundary an expert failure originated from.
#[derive(Debug, Error)]
pub enum ExpertFailure {
    #[error("brain: {0}")]
    Brain(#[from] BrainError),

    #[error("memory store: {0}")]
    History(#[from] HistoryError),

    #[error("retrieval: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("turn aborted: {0}")]
    Aborted(String),
}

impl ExpertFailure {
    pub fn boundary(&self) -> &'static str {
        match self {
            ExpertFailure::Brain(BrainError::Provider(_)) => "provider",
            ExpertFailure::Brain(_) => "brain",
            ExpertFailure::History(_) => "memory",
            ExpertFailure::Retrieval(_) => "retrieval",
            ExpertFailure::Aborted(_) => "runtime",
        }
    }

    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            ExpertFailure::Brain(BrainError::Provider(e)) => Some(e),
            ExpertFailure::Retrieval(RetrievalError::Embedding(e)) => Some(e),
            _ => None,
        }
    }

    /// Attaches the expert and conversation the failure happened in.
    pub fn during(self, expert: ExpertType, conversation_id: &str) -> ExpertError {
        ExpertError {
            expert,
            conversation_id: conversation_id.to_string(),
            failure: self,
        }
    }
}

#[derive(Debug, Error)]
#[error("{expert} expert failed for conversation '{conversation_id}' at the {} boundary: {failure}", .failure.boundary())]
pub struct ExpertError {
    pub expert: ExpertType,
    pub conversation_id: String,
    #[source]
    pub failure: ExpertFailure,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown expert type '{requested}', available: {}", join_types(.available))]
    UnknownExpertType {
        requested: String,
        available: Vec<ExpertType>,
    },

    #[error("{0} expert is not registered")]
    ExpertNotRegistered(ExpertType),

    #[error(transparent)]
    Expert(#[from] ExpertError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(ProviderError::from_status("openai", 401, "").kind, ProviderErrorKind::Auth);
        assert_eq!(ProviderError::from_status("openai", 429, "").kind, ProviderErrorKind::Quota);
        assert_eq!(ProviderError::from_status("openai", 504, "").kind, ProviderErrorKind::Timeout);
        assert_eq!(
            ProviderError::from_status("openai", 422, "").kind,
            ProviderErrorKind::MalformedInput
        );
        assert_eq!(ProviderError::from_status("openai", 500, "").kind, ProviderErrorKind::Upstream);
    }

    #[test]
    fn provider_error_display_includes_status() {
        let e = ProviderError::from_status("azureopenai", 429, "slow down");
        let text = e.to_string();
        assert!(text.contains("HTTP 429"));
        assert!(text.contains("slow down"));
    }

    #[test]
    fn expert_error_names_boundary_and_conversation() {
        let failure = ExpertFailure::Brain(BrainError::Provider(ProviderError::upstream("ollama", "boom")));
        let err = failure.during(ExpertType::Qna, "c1");
        let text = err.to_string();
        assert!(text.contains("QNA"));
        assert!(text.contains("'c1'"));
        assert!(text.contains("provider boundary"));
    }

    #[test]
    fn unknown_expert_lists_available_types() {
        let err = EngineError::UnknownExpertType {
            requested: "BOGUS".into(),
            available: vec![ExpertType::Qna, ExpertType::Rag],
        };
        assert!(err.to_string().contains("QNA, RAG"));
    }
}
