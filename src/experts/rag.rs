use async_trait::async_trait;
use log::info;
use serde_json::json;
use std::sync::Arc;

use super::{ ConversationMemory, Expert, ExpertInfo, ExpertReply, ExpertType, ReplyStream };
use crate::brain::{ Brain, ThinkContext };
use crate::config::prompt::{ PromptConfig, RAG_SYSTEM };
use crate::error::{ ExpertError, ExpertFailure };
use crate::models::chat::Conversation;
use crate::rag::{ format_passages, Passage, Retriever };

/// Answers from indexed documents: the top passages for the query are placed in the system prompt.
pub struct RagExpert {
    brain: Arc<dyn Brain>,
    memory: ConversationMemory,
    retriever: Arc<Retriever>,
    prompts: Arc<PromptConfig>,
}

impl RagExpert {
    pub fn new(
        brain: Arc<dyn Brain>,
        memory: ConversationMemory,
        retriever: Arc<Retriever>,
        prompts: Arc<PromptConfig>
    ) -> Self {
        info!("RAG expert initialized (top {} passages per query)", retriever.default_limit());
        Self { brain, memory, retriever, prompts }
    }

    async fn prepare(&self, message: &str, conversation_id: &str) -> Result<(ThinkContext, Vec<Passage>), ExpertError> {
        let history = self.memory.load(conversation_id).await?;
        let passages = self.retriever
            .retrieve(message, None).await
            .map_err(|e| ExpertFailure::from(e).during(ExpertType::Rag, conversation_id))?;

        let system_prompt = self.prompts.render_or_default(RAG_SYSTEM, &[("context", format_passages(&passages).as_str())]);
        Ok((ThinkContext::new(system_prompt, history), passages))
    }
}

fn sources(passages: &[Passage]) -> serde_json::Value {
    json!(
        passages
            .iter()
            .map(|p| json!({ "id": p.id, "source": p.source, "score": p.score }))
            .collect::<Vec<_>>()
    )
}

#[async_trait]
impl Expert for RagExpert {
    fn expert_type(&self) -> ExpertType {
        ExpertType::Rag
    }

    async fn process(&self, message: &str, conversation_id: &str) -> Result<ExpertReply, ExpertError> {
        let (context, passages) = self.prepare(message, conversation_id).await?;
        let response = self.brain
            .think(message, &context).await
            .map_err(|e| ExpertFailure::from(e).during(ExpertType::Rag, conversation_id))?;

        self.memory.record_turn(conversation_id, message, &response.content).await?;
        Ok(ExpertReply {
            content: response.content,
            conversation_id: conversation_id.to_string(),
            metadata: json!({ "sources": sources(&passages) }),
        })
    }

    async fn stream(&self, message: &str, conversation_id: &str) -> Result<ReplyStream, ExpertError> {
        let (context, _) = self.prepare(message, conversation_id).await?;
        let fragments = self.brain
            .think_stream(message, &context).await
            .map_err(|e| ExpertFailure::from(e).during(ExpertType::Rag, conversation_id))?;
        Ok(self.memory.persist_after_stream(conversation_id, message, fragments))
    }

    async fn clear_history(&self, conversation_id: &str) -> Result<(), ExpertError> {
        self.brain.reset();
        self.memory.clear(conversation_id).await
    }

    async fn history(&self, conversation_id: &str) -> Result<Conversation, ExpertError> {
        self.memory.conversation(conversation_id).await
    }

    async fn conversation_ids(&self) -> Result<Vec<String>, ExpertError> {
        self.memory.conversation_ids().await
    }

    fn info(&self) -> ExpertInfo {
        ExpertInfo {
            name: "RAG Expert".into(),
            description: "Answers questions from indexed documents and cites the passages it used.".into(),
            capabilities: vec![
                "document_retrieval".into(),
                "source_attribution".into(),
                "document_ingestion".into(),
                "conversation_memory".into()
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::llm::LlmBrain;
    use crate::history::memory::InMemoryHistoryStore;
    use crate::history::HistoryStore;
    use crate::llm::{ ChatOptions, LlmClient, PromptRole };
    use crate::rag::memory::InMemoryVectorIndex;
    use crate::rag::Document;
    use crate::testing::{ scripted_llm, FakeEmbedder, ScriptedChatClient };

    async fn expert(client: Arc<ScriptedChatClient>, store: Arc<InMemoryHistoryStore>) -> RagExpert {
        let llm = scripted_llm(client);
        let retriever = Arc::new(Retriever::new(llm.clone(), Arc::new(InMemoryVectorIndex::new(0)), 2, 500));
        retriever
            .ingest(Document {
                id: Some("volcano".into()),
                text: "Volcanoes erupt when magma rises through the crust.".into(),
                source: Some("geology.txt".into()),
                ..Default::default()
            }).await
            .unwrap();
        retriever
            .ingest(Document {
                id: Some("bread".into()),
                text: "Bread dough rises because yeast produces gas.".into(),
                source: Some("baking.txt".into()),
                ..Default::default()
            }).await
            .unwrap();

        let brain = Arc::new(LlmBrain::new(llm));
        RagExpert::new(
            brain,
            ConversationMemory::new(ExpertType::Rag, store, 6),
            retriever,
            Arc::new(PromptConfig::default())
        )
    }

    #[tokio::test]
    async fn context_carries_passages_with_sources() {
        let client = Arc::new(ScriptedChatClient::replying(&["Magma rises [geology.txt]."]));
        let store = Arc::new(InMemoryHistoryStore::new());
        let rag = expert(client.clone(), store.clone()).await;

        let reply = rag.process("why do volcanoes erupt magma", "r1").await.unwrap();
        assert_eq!(reply.content, "Magma rises [geology.txt].");
        assert_eq!(reply.metadata["sources"][0]["source"], "geology.txt");

        let request = &client.requests()[0];
        assert_eq!(request[0].role, PromptRole::System);
        assert!(request[0].content.contains("Source: geology.txt"));
        assert!(request[0].content.contains("magma rises through the crust"));
        assert_eq!(store.get_conversation("r1").await.unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn retrieval_failure_is_reported_and_nothing_stored() {
        let client = Arc::new(ScriptedChatClient::replying(&["unused"]));
        let llm = LlmClient::new(client.clone(), Some(Arc::new(FakeEmbedder::failing())), ChatOptions::default());
        let retriever = Arc::new(Retriever::new(llm.clone(), Arc::new(InMemoryVectorIndex::new(0)), 2, 500));
        let store = Arc::new(InMemoryHistoryStore::new());
        let rag = RagExpert::new(
            Arc::new(LlmBrain::new(llm)),
            ConversationMemory::new(ExpertType::Rag, store.clone(), 6),
            retriever,
            Arc::new(PromptConfig::default())
        );

        let err = rag.process("anything", "r2").await.unwrap_err();
        assert_eq!(err.failure.boundary(), "retrieval");
        assert!(client.requests().is_empty());
        assert!(store.get_conversation("r2").await.unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn empty_index_still_answers() {
        let client = Arc::new(ScriptedChatClient::replying(&["I could not find it."]));
        let llm = scripted_llm(client.clone());
        let retriever = Arc::new(Retriever::new(llm.clone(), Arc::new(InMemoryVectorIndex::new(0)), 2, 500));
        let rag = RagExpert::new(
            Arc::new(LlmBrain::new(llm)),
            ConversationMemory::new(ExpertType::Rag, Arc::new(InMemoryHistoryStore::new()), 6),
            retriever,
            Arc::new(PromptConfig::default())
        );

        let reply = rag.process("q", "r3").await.unwrap();
        assert_eq!(reply.metadata["sources"], json!([]));
        assert!(client.requests()[0][0].content.contains("No relevant documents found."));
    }
}
