use axum::{
    extract::{ rejection::JsonRejection, Path, Request, State },
    http::{ header, StatusCode },
    middleware::{ self, Next },
    response::{ sse::{ Event, KeepAlive, Sse }, IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use chrono::Utc;
use futures::{ Stream, StreamExt };
use governor::{ DefaultDirectRateLimiter, Quota, RateLimiter };
use log::{ error, info, warn };
use serde_json::{ json, Value };
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{ Any, CorsLayer };
use uuid::Uuid;

use crate::engine::ChatEngine;
use crate::error::{ EngineError, ProviderError, ProviderErrorKind, RetrievalError };
use crate::models::api::{
    AvailableExpertsResponse,
    ChatRequest,
    ChatResponse,
    ConversationListResponse,
    ErrorResponse,
    ExpertInfoResponse,
    ExpertSwitchRequest,
    ExpertSwitchResponse,
    IngestRequest,
    IngestResponse,
    StatusResponse,
};
use crate::rag::Document;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    pub api_key: Option<String>,
    pub limiter: Arc<DefaultDirectRateLimiter>,
}

impl AppState {
    pub fn new(engine: Arc<ChatEngine>, api_key: Option<String>, per_second: u32, burst: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(per_second);
        Self {
            engine,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst))),
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse { status: "error".into(), error: self.message };
        (self.status, Json(body)).into_response()
    }
}

fn provider_status(e: &ProviderError) -> StatusCode {
    if e.kind == ProviderErrorKind::Quota {
        StatusCode::TOO_MANY_REQUESTS
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::UnknownExpertType { .. } | EngineError::ExpertNotRegistered(_) => StatusCode::BAD_REQUEST,
            EngineError::Expert(inner) =>
                match inner.failure.provider_error() {
                    Some(p) => provider_status(p),
                    None => StatusCode::INTERNAL_SERVER_ERROR,
                }
            EngineError::Retrieval(RetrievalError::EmptyDocument) => StatusCode::BAD_REQUEST,
            EngineError::Retrieval(RetrievalError::Embedding(p)) => provider_status(p),
            EngineError::Retrieval(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", e);
        } else {
            warn!("Request rejected: {}", e);
        }
        ApiError::new(status, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let api = Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/clear/{conversation_id}", post(clear_handler))
        .route("/conversations", get(list_conversations_handler))
        .route("/conversations/{conversation_id}", get(conversation_handler))
        .route("/experts/current", get(current_expert_handler))
        .route("/experts/available", get(available_experts_handler))
        .route("/experts/switch", post(switch_expert_handler))
        .route("/documents", post(ingest_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health_handler))
        .route("/health/detailed", get(detailed_health_handler))
        .nest("/api/v1", api)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(cors)
        .with_state(state)
}

async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.limiter.check().is_err() {
        warn!("Global request rate limit exceeded for {}", request.uri().path());
        return ApiError::new(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
    }
    next.run(request).await
}

fn provided_api_key(request: &Request) -> Option<&str> {
    let headers = request.headers();
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .map(str::trim)
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(required) = &state.api_key {
        if provided_api_key(&request) != Some(required.as_str()) {
            warn!("Bad or missing API key for {}", request.uri().path());
            return ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    }
    next.run(request).await
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn detailed_health_handler(State(state): State<AppState>) -> Json<Value> {
    let engine = &state.engine;
    Json(
        json!({
            "status": "healthy",
            "timestamp": Utc::now().to_rfc3339(),
            "current_expert": engine.current_expert(),
            "available_experts": engine.available_experts(),
            "model": engine.model_info(),
        })
    )
}

fn chat_input(payload: Result<Json<ChatRequest>, JsonRejection>) -> Result<(String, String), ApiError> {
    let Json(req) = payload?;
    if req.input.trim().is_empty() {
        return Err(ApiError::bad_request("input must not be empty"));
    }
    let conversation_id = req.conversation_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    Ok((req.input, conversation_id))
}

async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>
) -> Result<Json<ChatResponse>, ApiError> {
    let (input, conversation_id) = chat_input(payload)?;
    let reply = state.engine.dispatch(&input, &conversation_id).await?;
    Ok(
        Json(ChatResponse {
            output: reply.content,
            conversation_id: reply.conversation_id,
            additional_kwargs: reply.metadata,
        })
    )
}

/// `message` events carry fragments; a final `done` event carries the conversation id.
/// A failure ends the stream with an `error` event instead.
async fn chat_stream_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (input, conversation_id) = chat_input(payload)?;
    let mut fragments = state.engine.dispatch_stream(&input, &conversation_id).await?;
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(32);

    tokio::spawn(async move {
        while let Some(item) = fragments.next().await {
            let event = match item {
                Ok(fragment) => Event::default().event("message").data(fragment),
                Err(e) => {
                    error!("Stream failed for conversation {}: {}", conversation_id, e);
                    let body = json!({ "status": "error", "error": e.to_string() });
                    let _ = tx.send(Ok(Event::default().event("error").data(body.to_string()))).await;
                    return;
                }
            };
            if tx.send(Ok(event)).await.is_err() {
                info!("Client left stream for conversation {}", conversation_id);
                return;
            }
        }
        let done = json!({ "conversation_id": conversation_id });
        let _ = tx.send(Ok(Event::default().event("done").data(done.to_string()))).await;
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

async fn clear_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>
) -> Result<Json<StatusResponse>, ApiError> {
    state.engine.clear_history(&conversation_id).await?;
    Ok(
        Json(StatusResponse {
            status: "success".into(),
            message: format!("Conversation {} cleared", conversation_id),
        })
    )
}

async fn list_conversations_handler(State(state): State<AppState>) -> Result<Json<ConversationListResponse>, ApiError> {
    let conversations = state.engine.conversation_ids().await?;
    Ok(Json(ConversationListResponse { conversations }))
}

async fn conversation_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.history(&conversation_id).await?))
}

fn expert_names(state: &AppState) -> Vec<String> {
    state.engine
        .available_experts()
        .iter()
        .map(|t| t.to_string())
        .collect()
}

async fn current_expert_handler(State(state): State<AppState>) -> Result<Json<ExpertInfoResponse>, ApiError> {
    let current = state.engine.current_expert();
    let expert_info = state.engine.expert_info(current).ok_or(EngineError::ExpertNotRegistered(current))?;
    Ok(
        Json(ExpertInfoResponse {
            current_expert: current.to_string(),
            expert_info,
            available_experts: expert_names(&state),
        })
    )
}

async fn available_experts_handler(State(state): State<AppState>) -> Json<AvailableExpertsResponse> {
    let expert_details: BTreeMap<String, _> = state.engine
        .available_experts()
        .into_iter()
        .filter_map(|t| state.engine.expert_info(t).map(|info| (t.to_string(), info)))
        .collect();
    let available_experts = expert_names(&state);
    Json(AvailableExpertsResponse {
        total_count: available_experts.len(),
        available_experts,
        expert_details,
    })
}

async fn switch_expert_handler(
    State(state): State<AppState>,
    payload: Result<Json<ExpertSwitchRequest>, JsonRejection>
) -> Result<Json<ExpertSwitchResponse>, ApiError> {
    let Json(req) = payload?;
    let outcome = state.engine.switch_expert(&req.expert_type)?;
    Ok(
        Json(ExpertSwitchResponse {
            success: true,
            message: format!("Switched from {} to {}", outcome.previous, outcome.current),
            previous_expert: outcome.previous.to_string(),
            current_expert: outcome.current.to_string(),
        })
    )
}

async fn ingest_handler(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>
) -> Result<Json<IngestResponse>, ApiError> {
    let Json(req) = payload?;
    let outcome = state.engine.ingest(Document {
        id: req.id,
        text: req.text,
        source: req.source,
        metadata: req.metadata,
    }).await?;
    Ok(Json(IngestResponse { document_id: outcome.document_id, chunks: outcome.chunks }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::llm::LlmBrain;
    use crate::config::prompt::PromptConfig;
    use crate::error::ProviderError;
    use crate::experts::{ ConversationMemory, Expert, ExpertType, QnaExpert, RagExpert };
    use crate::history::memory::InMemoryHistoryStore;
    use crate::llm::ChatCompletion;
    use crate::rag::memory::InMemoryVectorIndex;
    use crate::rag::Retriever;
    use crate::testing::{ scripted_llm, ScriptedChatClient };
    use axum::body::{ to_bytes, Body };
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    fn engine(client: ScriptedChatClient) -> Arc<ChatEngine> {
        let llm = scripted_llm(Arc::new(client));
        let store = Arc::new(InMemoryHistoryStore::new());
        let brain = Arc::new(LlmBrain::new(llm.clone()));
        let retriever = Arc::new(Retriever::new(llm, Arc::new(InMemoryVectorIndex::new(0)), 3, 500));
        let qna: Arc<dyn Expert> = Arc::new(
            QnaExpert::new(brain.clone(), ConversationMemory::new(ExpertType::Qna, store.clone(), 6), "sys")
        );
        let rag: Arc<dyn Expert> = Arc::new(
            RagExpert::new(
                brain,
                ConversationMemory::new(ExpertType::Rag, store, 6),
                retriever.clone(),
                Arc::new(PromptConfig::default())
            )
        );
        Arc::new(ChatEngine::new(vec![qna, rag], ExpertType::Qna, Some(retriever)).unwrap())
    }

    fn app(answers: &[&str]) -> Router {
        router(AppState::new(engine(ScriptedChatClient::replying(answers)), None, 1000, 1000))
    }

    fn post_json(uri: &str, body: Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_open() {
        let response = app(&[]).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn chat_generates_conversation_id_and_stores_turn() {
        let app = app(&["Hello!"]);
        let response = app.clone().oneshot(post_json("/api/v1/chat", json!({"input": "hi"}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["output"], "Hello!");
        let id = body["conversation_id"].as_str().unwrap().to_string();
        assert!(Uuid::parse_str(&id).is_ok());

        let response = app.oneshot(get(&format!("/api/v1/conversations/{}", id))).await.unwrap();
        let conv = json_body(response).await;
        assert_eq!(conv["messages"].as_array().unwrap().len(), 2);
        assert_eq!(conv["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn empty_or_malformed_input_is_bad_request() {
        let response = app(&[]).oneshot(post_json("/api/v1/chat", json!({"input": "  "}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["status"], "error");

        let response = app(&[]).oneshot(post_json("/api/v1/chat", json!({"text": "no input"}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn provider_quota_maps_to_429() {
        let client = ScriptedChatClient::new(vec![Err(ProviderError::from_status("openai", 429, "quota"))]);
        let app = router(AppState::new(engine(client), None, 1000, 1000));
        let response = app.oneshot(post_json("/api/v1/chat", json!({"input": "hi"}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn other_provider_errors_map_to_503() {
        let client = ScriptedChatClient::new(vec![Err(ProviderError::from_status("ollama", 500, "boom"))]);
        let app = router(AppState::new(engine(client), None, 1000, 1000));
        let response = app.oneshot(post_json("/api/v1/chat", json!({"input": "hi"}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn switch_and_report_experts() {
        let app = app(&[]);
        let response = app
            .clone()
            .oneshot(post_json("/api/v1/experts/switch", json!({"expert_type": "rag"}))).await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["previous_expert"], "QNA");
        assert_eq!(body["current_expert"], "RAG");

        let body = json_body(app.clone().oneshot(get("/api/v1/experts/current")).await.unwrap()).await;
        assert_eq!(body["current_expert"], "RAG");
        assert_eq!(body["expert_info"]["name"], "RAG Expert");

        let body = json_body(app.oneshot(get("/api/v1/experts/available")).await.unwrap()).await;
        assert_eq!(body["total_count"], 2);
        assert!(body["expert_details"]["QNA"].is_object());
    }

    #[tokio::test]
    async fn unknown_expert_is_400_and_keeps_current() {
        let app = app(&[]);
        let response = app
            .clone()
            .oneshot(post_json("/api/v1/experts/switch", json!({"expert_type": "oracle"}))).await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].as_str().unwrap().contains("QNA, RAG"));

        let body = json_body(app.oneshot(get("/api/v1/experts/current")).await.unwrap()).await;
        assert_eq!(body["current_expert"], "QNA");
    }

    #[tokio::test]
    async fn clear_empties_conversation() {
        let app = app(&["a"]);
        app.clone().oneshot(post_json("/api/v1/chat", json!({"input": "q", "conversation_id": "c9"}))).await.unwrap();

        let response = app.clone().oneshot(post_json("/api/v1/clear/c9", json!({}))).await.unwrap();
        assert_eq!(json_body(response).await["status"], "success");

        let body = json_body(app.clone().oneshot(get("/api/v1/conversations/c9")).await.unwrap()).await;
        assert!(body["messages"].as_array().unwrap().is_empty());
        let body = json_body(app.oneshot(get("/api/v1/conversations")).await.unwrap()).await;
        assert_eq!(body["conversations"], json!([]));
    }

    #[tokio::test]
    async fn stream_emits_messages_then_done() {
        let app = app(&["one two"]);
        let response = app
            .oneshot(post_json("/api/v1/chat/stream", json!({"input": "count", "conversation_id": "s1"}))).await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: message\ndata: one \n"));
        assert!(text.contains("event: message\ndata: two\n"));
        let done = text.find("event: done").unwrap();
        assert!(done > text.rfind("event: message").unwrap());
        assert!(text[done..].contains("\"conversation_id\":\"s1\""));
    }

    #[tokio::test]
    async fn documents_are_ingested() {
        let app = app(&[]);
        let response = app
            .clone()
            .oneshot(post_json("/api/v1/documents", json!({"text": "Para one.\n\nPara two.", "id": "doc-7"}))).await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["document_id"], "doc-7");
        assert_eq!(body["chunks"], 1);

        let response = app.oneshot(post_json("/api/v1/documents", json!({"text": ""}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn api_key_guards_api_routes_only() {
        let state = AppState::new(engine(ScriptedChatClient::new(vec![Ok(ChatCompletion::text("ok"))])), Some("s3cret".into()), 1000, 1000);
        let app = router(state);

        let response = app.clone().oneshot(get("/api/v1/conversations")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut request = get("/api/v1/conversations");
        request.headers_mut().insert("x-api-key", "s3cret".parse().unwrap());
        assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);

        let mut request = post_json("/api/v1/chat", json!({"input": "hi"}));
        request.headers_mut().insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);

        assert_eq!(app.oneshot(get("/health")).await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rate_limit_rejects_excess_requests() {
        let app = router(AppState::new(engine(ScriptedChatClient::replying(&[])), None, 1, 1));
        assert_eq!(app.clone().oneshot(get("/health")).await.unwrap().status(), StatusCode::OK);
        assert_eq!(app.oneshot(get("/health")).await.unwrap().status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
