use std::collections::BTreeMap;

use serde::{ Deserialize, Serialize };
use serde_json::Value;

use crate::experts::ExpertInfo;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub input: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub output: String,
    pub conversation_id: String,
    #[serde(default)]
    pub additional_kwargs: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ExpertSwitchRequest {
    pub expert_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExpertSwitchResponse {
    pub success: bool,
    pub message: String,
    pub previous_expert: String,
    pub current_expert: String,
}

#[derive(Debug, Serialize)]
pub struct ExpertInfoResponse {
    pub current_expert: String,
    pub expert_info: ExpertInfo,
    pub available_experts: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AvailableExpertsResponse {
    pub available_experts: Vec<String>,
    pub expert_details: BTreeMap<String, ExpertInfo>,
    pub total_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub text: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub document_id: String,
    pub chunks: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
}
