use log::{ info, warn };
use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{ AtomicU8, Ordering };
use std::sync::Arc;

use crate::brain::{ create_brain, BrainSettings, BrainType };
use crate::cli::Args;
use crate::config::prompt::{ load_prompts, QNA_SYSTEM };
use crate::error::{ ConfigurationError, EngineError };
use crate::experts::deep_research::ResearchSettings;
use crate::experts::{
    aprocess,
    parse_expert_list,
    ConversationMemory,
    DeepResearchExpert,
    Expert,
    ExpertInfo,
    ExpertReply,
    ExpertType,
    QnaExpert,
    RagExpert,
    ReplyStream,
};
use crate::history::initialize_history_store;
use crate::llm::{ LlmClient, ModelInfo };
use crate::models::chat::Conversation;
use crate::rag::{ create_vector_index, Document, IngestOutcome, Retriever };
use crate::tools::datetime::CurrentDateTimeTool;
use crate::tools::web_search::{ HttpWebSearch, SearchBackend, WebSearchTool };
use crate::tools::{ Tool, ToolRegistry };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub previous: ExpertType,
    pub current: ExpertType,
}

/// Routes each message to the active expert.
///
/// The active expert is a single atomic; a dispatch uses whichever expert is
/// active when it starts, so a concurrent switch may or may not affect it.
pub struct ChatEngine {
    experts: HashMap<ExpertType, Arc<dyn Expert>>,
    active: AtomicU8,
    retriever: Option<Arc<Retriever>>,
    model: Option<ModelInfo>,
}

impl ChatEngine {
    pub fn new(
        experts: Vec<Arc<dyn Expert>>,
        default_expert: ExpertType,
        retriever: Option<Arc<Retriever>>
    ) -> Result<Self, EngineError> {
        let experts: HashMap<ExpertType, Arc<dyn Expert>> = experts
            .into_iter()
            .map(|e| (e.expert_type(), e))
            .collect();
        if !experts.contains_key(&default_expert) {
            return Err(EngineError::ExpertNotRegistered(default_expert));
        }
        Ok(Self {
            experts,
            active: AtomicU8::new(default_expert as u8),
            retriever,
            model: None,
        })
    }

    pub fn with_model_info(mut self, model: ModelInfo) -> Self {
        self.model = Some(model);
        self
    }

    /// Builds providers, stores, tools and every configured expert.
    pub async fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let expert_types = parse_expert_list(&args.experts).map_err(|e| ConfigurationError::invalid("EXPERTS", e))?;
        if expert_types.is_empty() {
            return Err(ConfigurationError::invalid("EXPERTS", "at least one expert is required").into());
        }
        let default_expert: ExpertType = args.default_expert
            .parse()
            .map_err(|e: String| ConfigurationError::invalid("DEFAULT_EXPERT", e))?;

        let chat_config = args.chat_llm_config()?;
        let embedding_config = args.embedding_llm_config()?;
        let needs_embeddings = expert_types.contains(&ExpertType::Rag);
        let llm = LlmClient::from_configs(&chat_config, needs_embeddings.then_some(&embedding_config))?;
        let model = llm.model_info();
        info!("Chat model: {} ({})", model.model, model.provider);

        let store = initialize_history_store(args)?;
        let prompts = load_prompts(&args.prompts_path)?;

        let web_search: Option<Arc<dyn Tool>> = if args.search_api_key.trim().is_empty() {
            info!("SEARCH_API_KEY not set, web search disabled");
            None
        } else {
            let backend: SearchBackend = args.search_type.parse()?;
            let search = HttpWebSearch::new(backend, args.search_api_key.clone(), args.search_base_url.clone())?;
            Some(Arc::new(WebSearchTool::new(Arc::new(search), args.search_max_results)))
        };

        let mut tools: Vec<Arc<dyn Tool>> = vec![Arc::new(CurrentDateTimeTool::new())];
        if let Some(search) = &web_search {
            tools.push(search.clone());
        }
        let registry = ToolRegistry::new(tools)?;

        let brain_type: BrainType = args.brain_type.parse()?;
        let settings = BrainSettings { max_tool_rounds: args.max_tool_rounds };
        let brain = create_brain(brain_type, llm.clone(), registry, settings);
        info!("Brain: {} with tools [{}]", brain_type, brain.info().tools.join(", "));

        let memory = |t: ExpertType| ConversationMemory::new(t, store.clone(), args.history_window);
        let mut experts: Vec<Arc<dyn Expert>> = Vec::new();
        let mut retriever = None;

        for expert_type in &expert_types {
            match expert_type {
                ExpertType::Qna => {
                    let system_prompt = prompts.render_or_default(QNA_SYSTEM, &[]);
                    experts.push(Arc::new(QnaExpert::new(brain.clone(), memory(ExpertType::Qna), system_prompt)));
                }
                ExpertType::Rag => {
                    let index = create_vector_index(args)?;
                    let r = Arc::new(Retriever::new(llm.clone(), index, args.rag_default_limit, args.rag_chunk_size));
                    retriever = Some(r.clone());
                    experts.push(Arc::new(RagExpert::new(brain.clone(), memory(ExpertType::Rag), r, prompts.clone())));
                }
                ExpertType::DeepResearch => {
                    let search = web_search.clone().ok_or_else(|| ConfigurationError::missing("SEARCH_API_KEY"))?;
                    let planner = create_brain(BrainType::Llm, llm.clone(), ToolRegistry::empty(), settings);
                    let research = ResearchSettings {
                        max_loops: args.max_research_loops,
                        max_queries: args.research_initial_queries,
                        results_per_query: args.search_max_results,
                    };
                    experts.push(
                        Arc::new(
                            DeepResearchExpert::new(
                                planner,
                                memory(ExpertType::DeepResearch),
                                search,
                                prompts.clone(),
                                research
                            )
                        )
                    );
                }
            }
        }

        let engine = Self::new(experts, default_expert, retriever)?.with_model_info(model);
        info!(
            "Chat engine ready. Experts: [{}], active: {}",
            engine
                .available_experts()
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            engine.current_expert()
        );
        Ok(engine)
    }

    pub fn current_expert(&self) -> ExpertType {
        ExpertType::from_u8(self.active.load(Ordering::SeqCst)).unwrap_or(ExpertType::Qna)
    }

    pub fn available_experts(&self) -> Vec<ExpertType> {
        let mut types: Vec<ExpertType> = self.experts.keys().copied().collect();
        types.sort();
        types
    }

    pub fn model_info(&self) -> Option<&ModelInfo> {
        self.model.as_ref()
    }

    /// Unknown or unregistered targets leave the active expert unchanged.
    pub fn switch_expert(&self, target: &str) -> Result<SwitchOutcome, EngineError> {
        let unknown = || EngineError::UnknownExpertType {
            requested: target.to_string(),
            available: self.available_experts(),
        };
        let current: ExpertType = target.parse().map_err(|_| unknown())?;
        if !self.experts.contains_key(&current) {
            return Err(unknown());
        }

        let previous = ExpertType::from_u8(self.active.swap(current as u8, Ordering::SeqCst)).unwrap_or(current);
        info!("Switched expert: {} -> {}", previous, current);
        Ok(SwitchOutcome { previous, current })
    }

    fn active_expert(&self) -> Result<Arc<dyn Expert>, EngineError> {
        let expert_type = self.current_expert();
        self.experts.get(&expert_type).cloned().ok_or(EngineError::ExpertNotRegistered(expert_type))
    }

    pub async fn dispatch(&self, message: &str, conversation_id: &str) -> Result<ExpertReply, EngineError> {
        let expert = self.active_expert()?;
        info!("Dispatching to {} (conversation {})", expert.expert_type(), conversation_id);
        Ok(aprocess(expert, message, conversation_id).await?)
    }

    pub async fn dispatch_stream(&self, message: &str, conversation_id: &str) -> Result<ReplyStream, EngineError> {
        let expert = self.active_expert()?;
        info!("Streaming from {} (conversation {})", expert.expert_type(), conversation_id);
        Ok(expert.stream(message, conversation_id).await?)
    }

    pub async fn clear_history(&self, conversation_id: &str) -> Result<(), EngineError> {
        Ok(self.active_expert()?.clear_history(conversation_id).await?)
    }

    pub async fn history(&self, conversation_id: &str) -> Result<Conversation, EngineError> {
        Ok(self.active_expert()?.history(conversation_id).await?)
    }

    pub async fn conversation_ids(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.active_expert()?.conversation_ids().await?)
    }

    pub fn expert_info(&self, expert_type: ExpertType) -> Option<ExpertInfo> {
        self.experts.get(&expert_type).map(|e| e.info())
    }

    /// Indexes a document for the RAG expert.
    pub async fn ingest(&self, document: Document) -> Result<IngestOutcome, EngineError> {
        let retriever = self.retriever.as_ref().ok_or_else(|| {
            warn!("Document ingestion requested but RAG is not configured");
            EngineError::ExpertNotRegistered(ExpertType::Rag)
        })?;
        Ok(retriever.ingest(document).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::llm::LlmBrain;
    use crate::config::prompt::PromptConfig;
    use crate::history::memory::InMemoryHistoryStore;
    use crate::history::HistoryStore;
    use crate::rag::memory::InMemoryVectorIndex;
    use crate::testing::{ scripted_llm, ScriptedChatClient };
    use clap::Parser;

    struct Fixture {
        engine: Arc<ChatEngine>,
        store: Arc<InMemoryHistoryStore>,
    }

    fn fixture(answers: &[&str]) -> Fixture {
        let client = Arc::new(ScriptedChatClient::replying(answers));
        let llm = scripted_llm(client);
        let store = Arc::new(InMemoryHistoryStore::new());
        let brain = Arc::new(LlmBrain::new(llm.clone()));
        let retriever = Arc::new(Retriever::new(llm, Arc::new(InMemoryVectorIndex::new(0)), 3, 500));

        let qna: Arc<dyn Expert> = Arc::new(
            QnaExpert::new(brain.clone(), ConversationMemory::new(ExpertType::Qna, store.clone(), 6), "sys")
        );
        let rag: Arc<dyn Expert> = Arc::new(
            RagExpert::new(
                brain,
                ConversationMemory::new(ExpertType::Rag, store.clone(), 6),
                retriever.clone(),
                Arc::new(PromptConfig::default())
            )
        );
        let engine = ChatEngine::new(vec![qna, rag], ExpertType::Qna, Some(retriever)).unwrap();
        Fixture { engine: Arc::new(engine), store }
    }

    #[test]
    fn default_must_be_registered() {
        let err = ChatEngine::new(Vec::new(), ExpertType::Rag, None).err().unwrap();
        assert!(matches!(err, EngineError::ExpertNotRegistered(ExpertType::Rag)));
    }

    #[tokio::test]
    async fn switch_reports_previous_and_current() {
        let f = fixture(&[]);
        let outcome = f.engine.switch_expert("rag").unwrap();
        assert_eq!(outcome, SwitchOutcome { previous: ExpertType::Qna, current: ExpertType::Rag });
        assert_eq!(f.engine.current_expert(), ExpertType::Rag);

        // switching to the active expert is allowed
        let again = f.engine.switch_expert("RAG").unwrap();
        assert_eq!(again.previous, ExpertType::Rag);
    }

    #[tokio::test]
    async fn unknown_or_unregistered_switch_keeps_active_expert() {
        let f = fixture(&[]);
        for target in ["oracle", "deep_research"] {
            match f.engine.switch_expert(target) {
                Err(EngineError::UnknownExpertType { requested, available }) => {
                    assert_eq!(requested, target);
                    assert_eq!(available, vec![ExpertType::Qna, ExpertType::Rag]);
                }
                other => panic!("unexpected: {:?}", other.map(|o| o.current)),
            }
        }
        assert_eq!(f.engine.current_expert(), ExpertType::Qna);
    }

    #[tokio::test]
    async fn dispatch_routes_to_active_expert() {
        let f = fixture(&["from qna", "from rag"]);
        let reply = f.engine.dispatch("hello", "c").await.unwrap();
        assert_eq!(reply.content, "from qna");
        assert!(reply.metadata.get("tool_invocations").is_some());

        f.engine.switch_expert("rag").unwrap();
        let reply = f.engine.dispatch("hello again", "c").await.unwrap();
        assert_eq!(reply.content, "from rag");
        assert!(reply.metadata.get("sources").is_some());

        assert_eq!(f.store.get_conversation("c").await.unwrap().messages.len(), 4);
        assert_eq!(f.engine.conversation_ids().await.unwrap(), vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn clear_and_history_go_through_the_store() {
        let f = fixture(&["a"]);
        f.engine.dispatch("q", "c").await.unwrap();
        assert_eq!(f.engine.history("c").await.unwrap().messages.len(), 2);
        f.engine.clear_history("c").await.unwrap();
        assert!(f.engine.history("c").await.unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn ingest_requires_rag() {
        let f = fixture(&[]);
        let outcome = f.engine
            .ingest(Document { text: "Some text.".into(), ..Default::default() }).await
            .unwrap();
        assert_eq!(outcome.chunks, 1);

        let store = Arc::new(InMemoryHistoryStore::new());
        let llm = scripted_llm(Arc::new(ScriptedChatClient::replying(&[])));
        let qna: Arc<dyn Expert> = Arc::new(
            QnaExpert::new(Arc::new(LlmBrain::new(llm)), ConversationMemory::new(ExpertType::Qna, store, 6), "s")
        );
        let engine = ChatEngine::new(vec![qna], ExpertType::Qna, None).unwrap();
        let err = engine.ingest(Document { text: "x".into(), ..Default::default() }).await.unwrap_err();
        assert!(matches!(err, EngineError::ExpertNotRegistered(ExpertType::Rag)));
    }

    #[tokio::test]
    async fn expert_info_for_registered_types_only() {
        let f = fixture(&[]);
        assert_eq!(f.engine.expert_info(ExpertType::Rag).unwrap().name, "RAG Expert");
        assert!(f.engine.expert_info(ExpertType::DeepResearch).is_none());
    }

    #[tokio::test]
    async fn from_args_builds_memory_backed_engine() {
        let args = Args::parse_from([
            "expert-agent",
            "--history-type",
            "memory",
            "--vector-type",
            "memory",
            "--experts",
            "QNA,RAG",
            "--default-expert",
            "rag",
        ]);
        let engine = ChatEngine::from_args(&args).await.unwrap();
        assert_eq!(engine.available_experts(), vec![ExpertType::Qna, ExpertType::Rag]);
        assert_eq!(engine.current_expert(), ExpertType::Rag);
        assert!(engine.model_info().is_some());
    }

    #[tokio::test]
    async fn deep_research_without_search_key_is_a_config_error() {
        let args = Args::parse_from([
            "expert-agent",
            "--history-type",
            "memory",
            "--experts",
            "QNA,DEEPRESEARCH",
            "--search-api-key",
            "",
        ]);
        let err = ChatEngine::from_args(&args).await.err().unwrap();
        assert!(err.to_string().contains("SEARCH_API_KEY"));
    }
}
