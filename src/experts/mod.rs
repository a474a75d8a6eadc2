pub mod deep_research;
pub mod qna;
pub mod rag;
pub mod turn;

use async_trait::async_trait;
use futures::Stream;
use log::error;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{ ExpertError, ExpertFailure };
use crate::models::chat::Conversation;

pub use self::deep_research::DeepResearchExpert;
pub use self::qna::QnaExpert;
pub use self::rag::RagExpert;
pub use self::turn::ConversationMemory;

pub const DEFAULT_HISTORY_WINDOW: usize = 6;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExpertType {
    Qna = 0,
    Rag = 1,
    DeepResearch = 2,
}

impl ExpertType {
    pub const ALL: [ExpertType; 3] = [ExpertType::Qna, ExpertType::Rag, ExpertType::DeepResearch];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpertType::Qna => "QNA",
            ExpertType::Rag => "RAG",
            ExpertType::DeepResearch => "DEEPRESEARCH",
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| *t as u8 == value)
    }
}

impl fmt::Display for ExpertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .collect::<String>()
            .to_uppercase();
        match normalized.as_str() {
            "QNA" => Ok(ExpertType::Qna),
            "RAG" => Ok(ExpertType::Rag),
            "DEEPRESEARCH" => Ok(ExpertType::DeepResearch),
            _ => Err(format!("Invalid expert type: '{}'", s)),
        }
    }
}

impl Serialize for ExpertType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Parses a comma separated list such as `QNA,RAG`, skipping duplicates.
pub fn parse_expert_list(list: &str) -> Result<Vec<ExpertType>, String> {
    let mut types = Vec::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let t: ExpertType = item.parse()?;
        if !types.contains(&t) {
            types.push(t);
        }
    }
    Ok(types)
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpertInfo {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpertReply {
    pub content: String,
    pub conversation_id: String,
    /// Tool invocations, passage sources or research sources, depending on the expert.
    pub metadata: Value,
}

pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String, ExpertError>> + Send>>;

/// A reasoning strategy bound to a memory store.
#[async_trait]
pub trait Expert: Send + Sync {
    fn expert_type(&self) -> ExpertType;

    async fn process(&self, message: &str, conversation_id: &str) -> Result<ExpertReply, ExpertError>;

    /// The turn is persisted once, after the last fragment. A dropped or failed
    /// stream persists nothing.
    async fn stream(&self, message: &str, conversation_id: &str) -> Result<ReplyStream, ExpertError>;

    async fn clear_history(&self, conversation_id: &str) -> Result<(), ExpertError>;

    async fn history(&self, conversation_id: &str) -> Result<Conversation, ExpertError>;

    async fn conversation_ids(&self) -> Result<Vec<String>, ExpertError>;

    fn info(&self) -> ExpertInfo;
}

/// Runs one `process` turn on its own task, so the turn completes and is
/// persisted even if the caller stops waiting.
pub async fn aprocess(
    expert: Arc<dyn Expert>,
    message: &str,
    conversation_id: &str
) -> Result<ExpertReply, ExpertError> {
    let expert_type = expert.expert_type();
    let (message, id) = (message.to_string(), conversation_id.to_string());
    let handle = tokio::spawn(async move { expert.process(&message, &id).await });

    match handle.await {
        Ok(result) => result,
        Err(e) => {
            error!("{} turn for conversation {} did not complete: {}", expert_type, conversation_id, e);
            Err(ExpertFailure::Aborted(e.to_string()).during(expert_type, conversation_id))
        }
    }
}
