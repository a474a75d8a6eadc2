use log::{ debug, info };
use serde::Serialize;
use text_splitter::MarkdownSplitter;
use serde_json::{ Map, Value };
use std::sync::Arc;
use uuid::Uuid;

use super::VectorIndex;
use crate::error::RetrievalError;
use crate::llm::LlmClient;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Document {
    pub id: Option<String>,
    pub text: String,
    pub source: Option<String>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub document_id: String,
    pub chunks: usize,
}

/// Embeds queries and documents and talks to the vector index on their behalf.
pub struct Retriever {
    llm: LlmClient,
    index: Arc<dyn VectorIndex>,
    default_limit: usize,
    chunk_size: usize,
}

impl Retriever {
    pub fn new(llm: LlmClient, index: Arc<dyn VectorIndex>, default_limit: usize, chunk_size: usize) -> Self {
        Self {
            llm,
            index,
            default_limit: default_limit.max(1),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit
    }

    pub async fn retrieve(&self, query: &str, limit: Option<usize>) -> Result<Vec<Passage>, RetrievalError> {
        let k = limit.unwrap_or(self.default_limit);
        let vector = self.llm.embed(query).await?;
        let points = self.index.search(vector, k).await?;
        info!("Retrieved {} passage(s) for query", points.len());

        Ok(
            points
                .into_iter()
                .map(|p| Passage {
                    text: p.metadata
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    source: p.metadata
                        .get("source")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    id: p.id,
                    score: p.score,
                })
                .filter(|p| !p.text.is_empty())
                .collect()
        )
    }

    /// Chunks, embeds and indexes one document. Chunk ids are `{document_id}#{n}`.
    /// Re-ingesting an id replaces all of its earlier chunks, including any beyond the new count.
    /// Nothing is removed if embedding fails.
    pub async fn ingest(&self, document: Document) -> Result<IngestOutcome, RetrievalError> {
        let chunks = chunk_text(&document.text, self.chunk_size);
        if chunks.is_empty() {
            return Err(RetrievalError::EmptyDocument);
        }
        let document_id = document.id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let vectors = self.llm.embed_many(&chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(
                RetrievalError::Index(format!("got {} embeddings for {} chunks", vectors.len(), chunks.len()))
            );
        }

        self.index.delete_document(&document_id).await?;
        debug!("Cleared earlier chunks of document {}", document_id);

        for (n, (chunk, vector)) in chunks.iter().zip(vectors).enumerate() {
            let mut metadata = document.metadata.clone();
            metadata.insert("text".into(), Value::String(chunk.clone()));
            metadata.insert("document_id".into(), Value::String(document_id.clone()));
            metadata.insert("chunk".into(), Value::from(n));
            if let Some(source) = &document.source {
                metadata.insert("source".into(), Value::String(source.clone()));
            }
            self.index.upsert(&format!("{}#{}", document_id, n), vector, Value::Object(metadata)).await?;
        }

        info!("Indexed document {} as {} chunk(s)", document_id, chunks.len());
        Ok(IngestOutcome { document_id, chunks: chunks.len() })
    }
}

/// Markdown-aware chunks of at most `max_chars` characters, preferring headings and paragraphs as cut points.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    MarkdownSplitter::new(max_chars.max(1))
        .chunks(text)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn format_passages(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return "No relevant documents found.".to_string();
    }

    let mut text = String::from("Relevant documents:\n\n");
    for (i, passage) in passages.iter().enumerate() {
        let source = passage.source.as_deref().unwrap_or(&passage.id);
        text.push_str(&format!("[{}] Source: {} (Score: {:.4})\n{}\n\n", i + 1, source, passage.score, passage.text));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::llm::ChatOptions;
    use crate::rag::memory::InMemoryVectorIndex;
    use crate::testing::{ scripted_llm, FakeEmbedder, ScriptedChatClient };

    fn retriever(index: Arc<InMemoryVectorIndex>) -> Retriever {
        let llm = scripted_llm(Arc::new(ScriptedChatClient::replying(&[])));
        Retriever::new(llm, index, 2, 80)
    }

    #[test]
    fn chunks_respect_size_and_paragraphs() {
        let text = "First paragraph.\n\nSecond paragraph.\n\n\n\nThird.";
        let whole = chunk_text(text, 1000);
        assert_eq!(whole.len(), 1);
        assert!(whole[0].starts_with("First paragraph.") && whole[0].ends_with("Third."));
        assert_eq!(chunk_text(text, 20), vec!["First paragraph.", "Second paragraph.", "Third."]);

        let long = "word ".repeat(30);
        let pieces = chunk_text(&long, 24);
        assert!(pieces.iter().all(|p| p.chars().count() <= 24));
        assert_eq!(pieces.concat().matches("word").count(), 30);
        assert!(chunk_text("  \n\n ", 10).is_empty());
    }

    #[tokio::test]
    async fn ingest_then_retrieve_with_sources() {
        let index = Arc::new(InMemoryVectorIndex::new(0));
        let r = retriever(index.clone());

        let doc = Document {
            id: Some("tides".into()),
            text: "Tides are caused by the gravity of the moon.\n\nThe sun also pulls on the oceans.".into(),
            source: Some("ocean-facts.md".into()),
            ..Default::default()
        };
        let outcome = r.ingest(doc).await.unwrap();
        assert_eq!(outcome.document_id, "tides");
        assert_eq!(outcome.chunks, 1);

        let other = Document { text: "Rust ownership rules prevent data races.".into(), ..Default::default() };
        r.ingest(other).await.unwrap();
        assert_eq!(index.len().await, 2);

        let passages = r.retrieve("what causes tides moon gravity", None).await.unwrap();
        assert_eq!(passages[0].id, "tides#0");
        assert_eq!(passages[0].source.as_deref(), Some("ocean-facts.md"));

        let context = format_passages(&passages);
        assert!(context.contains("[1] Source: ocean-facts.md"));
    }

    #[test]
    fn markdown_sections_are_not_merged_across_headings() {
        let text = "# Setup\n\nInstall the tool first.\n\n# Usage\n\nRun it with a config file.";
        let chunks = chunk_text(text, 40);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].starts_with("# Setup"));
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));
        assert!(!chunks.iter().any(|c| c.contains("Setup") && c.contains("Usage")));
    }

    #[tokio::test]
    async fn reingest_replaces_every_old_chunk() {
        let index = Arc::new(InMemoryVectorIndex::new(0));
        let r = retriever(index.clone());

        let long = (1..=4)
            .map(|n| format!("Paragraph {} talks about a different topic at some length.", n))
            .collect::<Vec<_>>()
            .join("\n\n");
        let first = r.ingest(Document { id: Some("d".into()), text: long, ..Default::default() }).await.unwrap();
        assert!(first.chunks >= 3);
        assert_eq!(index.len().await, first.chunks);

        let second = r.ingest(Document { id: Some("d".into()), text: "Short.".into(), ..Default::default() }).await.unwrap();
        assert_eq!(second.chunks, 1);
        assert_eq!(index.len().await, 1);

        let passages = r.retrieve("topic", Some(10)).await.unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].id, "d#0");
        assert_eq!(passages[0].text, "Short.");
    }

    #[tokio::test]
    async fn reingest_with_failed_embedding_keeps_old_chunks() {
        let index = Arc::new(InMemoryVectorIndex::new(0));
        retriever(index.clone())
            .ingest(Document { id: Some("d".into()), text: "Kept.".into(), ..Default::default() }).await
            .unwrap();

        let llm = LlmClient::new(
            Arc::new(ScriptedChatClient::replying(&[])),
            Some(Arc::new(FakeEmbedder::failing())),
            ChatOptions::default()
        );
        let broken = Retriever::new(llm, index.clone(), 2, 80);
        assert!(broken.ingest(Document { id: Some("d".into()), text: "New.".into(), ..Default::default() }).await.is_err());
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn empty_document_is_rejected() {
        let r = retriever(Arc::new(InMemoryVectorIndex::new(0)));
        let err = r.ingest(Document { text: "   ".into(), ..Default::default() }).await.unwrap_err();
        assert!(matches!(err, RetrievalError::EmptyDocument));
    }

    #[tokio::test]
    async fn embedding_failure_surfaces_as_retrieval_error() {
        let llm = LlmClient::new(
            Arc::new(ScriptedChatClient::replying(&[])),
            Some(Arc::new(FakeEmbedder::failing())),
            ChatOptions::default()
        );
        let r = Retriever::new(llm, Arc::new(InMemoryVectorIndex::new(0)), 3, 100);
        let err = r.retrieve("q", None).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Embedding(ProviderError { status: Some(503), .. })));
    }

    #[test]
    fn no_passages_formats_placeholder() {
        assert_eq!(format_passages(&[]), "No relevant documents found.");
    }
}
