//! Permanent knowledge-base ingestion: layout parse, chunk, enrich, embed, store.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::chunking::{DocumentChunker, QuestionEnricher};
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::extract::DocumentFormat;
use crate::layout::{LayoutError, LayoutParser};
use crate::metrics::PipelineMetrics;
use crate::types::Chunk;
use crate::vector_store::{VectorStore, VectorStoreError, compute_chunk_hash};

const EMBED_BATCH_SIZE: usize = 64;

/// Errors emitted by ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Only PDFs go through the layout parser.
    #[error("Unsupported file type for {0}: only .pdf can be ingested")]
    UnsupportedInput(String),
    /// No layout parser is configured.
    #[error("No layout parser configured; set LAYOUT_PARSER_URL")]
    LayoutUnavailable,
    /// Layout parsing failed.
    #[error("Failed to parse document layout: {0}")]
    Layout(#[from] LayoutError),
    /// Embedding provider failed to produce vectors.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Vector store write or count failed.
    #[error("Vector store request failed: {0}")]
    VectorStore(#[from] VectorStoreError),
}

/// Summary of one ingested document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionOutcome {
    /// Document name.
    pub document: String,
    /// Chunks produced by the chunker.
    pub chunk_count: usize,
    /// Chunks written to the store.
    pub indexed: usize,
    /// Chunks dropped because an identical one was already in this document.
    pub skipped_duplicates: usize,
    /// Questions generated across all chunks.
    pub questions_generated: usize,
}

/// Coordinates the ingestion pipeline and knowledge-base administration.
pub struct KnowledgeBaseIngestor {
    layout: Option<Arc<dyn LayoutParser>>,
    chunker: DocumentChunker,
    enricher: QuestionEnricher,
    embeddings: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    metrics: Arc<PipelineMetrics>,
}

impl KnowledgeBaseIngestor {
    /// Wire the ingestion collaborators.
    pub fn new(
        layout: Option<Arc<dyn LayoutParser>>,
        chunker: DocumentChunker,
        enricher: QuestionEnricher,
        embeddings: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            layout,
            chunker,
            enricher,
            embeddings,
            store,
            metrics,
        }
    }

    /// Whether layout-based chunking is possible.
    pub fn has_layout_parser(&self) -> bool {
        self.layout.is_some()
    }

    /// Parse, chunk and enrich a PDF without storing it.
    pub async fn prepare_chunks(&self, filename: &str, bytes: &[u8]) -> Result<Vec<Chunk>, IngestError> {
        if DocumentFormat::from_filename(filename) != Some(DocumentFormat::Pdf) {
            return Err(IngestError::UnsupportedInput(filename.to_string()));
        }
        let layout = self.layout.as_ref().ok_or(IngestError::LayoutUnavailable)?;
        let blocks = layout.parse(filename, bytes).await?;
        let chunks = self.chunker.chunk_blocks(&blocks, filename);
        tracing::debug!(filename, blocks = blocks.len(), chunks = chunks.len(), "Chunked layout");
        Ok(self.enricher.enrich(chunks).await)
    }

    /// Ingest a PDF into the knowledge base.
    pub async fn ingest(&self, filename: &str, bytes: &[u8]) -> Result<IngestionOutcome, IngestError> {
        tracing::info!(filename, bytes = bytes.len(), "Ingesting document");
        let chunks = self.prepare_chunks(filename, bytes).await?;
        let chunk_count = chunks.len();
        let questions_generated = chunks.iter().map(|chunk| chunk.questions.len()).sum();
        let (unique, skipped_duplicates) = dedupe_chunks(chunks);

        let mut indexed = 0;
        for batch in unique.chunks(EMBED_BATCH_SIZE) {
            let texts = batch.iter().map(|chunk| chunk.content.clone()).collect();
            let vectors = self.embeddings.embed(texts).await?;
            indexed += self.store.add(batch, vectors).await?;
        }

        self.metrics.record_document(indexed as u64);
        tracing::info!(
            filename,
            chunks = chunk_count,
            indexed,
            skipped_duplicates,
            questions_generated,
            "Document ingested"
        );
        Ok(IngestionOutcome {
            document: filename.to_string(),
            chunk_count,
            indexed,
            skipped_duplicates,
            questions_generated,
        })
    }

    /// Number of chunks in the knowledge base.
    pub async fn status(&self) -> Result<usize, IngestError> {
        Ok(self.store.count().await?)
    }

    /// Delete every chunk, leaving an empty knowledge base.
    pub async fn reset(&self) -> Result<(), IngestError> {
        self.store.delete_all().await?;
        tracing::warn!("Knowledge base reset");
        Ok(())
    }
}

/// Keep the first chunk for each `content` hash; returns the survivors and the skip count.
pub(crate) fn dedupe_chunks(chunks: Vec<Chunk>) -> (Vec<Chunk>, usize) {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(chunks.len());
    let mut skipped = 0;

    for chunk in chunks {
        if chunk.content.trim().is_empty() {
            continue;
        }
        if seen.insert(compute_chunk_hash(&chunk.content)) {
            unique.push(chunk);
        } else {
            skipped += 1;
        }
    }

    (unique, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingSettings;
    use crate::embedding::HashEmbeddingClient;
    use crate::layout::{BlockKind, LayoutBlock};
    use crate::llm::{LlmClient, LlmError};
    use crate::vector_store::MemoryVectorStore;
    use async_trait::async_trait;

    struct FixedLayout(Vec<LayoutBlock>);

    #[async_trait]
    impl LayoutParser for FixedLayout {
        async fn parse(&self, _filename: &str, _bytes: &[u8]) -> Result<Vec<LayoutBlock>, LayoutError> {
            Ok(self.0.clone())
        }
    }

    struct TwoQuestions;

    #[async_trait]
    impl LlmClient for TwoQuestions {
        async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok("1. What is the deadline?\n2. Who must file?".into())
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    const BODY: &str = "Applicants must file the asylum application within one year of arrival.";

    fn ingestor(layout: Option<Vec<LayoutBlock>>) -> (KnowledgeBaseIngestor, Arc<MemoryVectorStore>, Arc<PipelineMetrics>) {
        let store = Arc::new(MemoryVectorStore::new(32));
        let metrics = Arc::new(PipelineMetrics::new());
        let llm: Arc<dyn LlmClient> = Arc::new(TwoQuestions);
        let chunker = DocumentChunker::new(ChunkingSettings::default()).expect("chunker");
        let layout = layout.map(|blocks| Arc::new(FixedLayout(blocks)) as Arc<dyn LayoutParser>);
        let ingestor = KnowledgeBaseIngestor::new(
            layout,
            chunker,
            QuestionEnricher::new(llm, 50, 2),
            Arc::new(HashEmbeddingClient::new(32)),
            store.clone(),
            metrics.clone(),
        );
        (ingestor, store, metrics)
    }

    fn blocks() -> Vec<LayoutBlock> {
        vec![
            LayoutBlock::new(BlockKind::Heading(1), "Asylum", 1),
            LayoutBlock::new(BlockKind::Paragraph, BODY, 1),
            LayoutBlock::new(BlockKind::Heading(1), "Fees", 2),
            LayoutBlock::new(BlockKind::Paragraph, "There is no fee to file the asylum application form.", 2),
            LayoutBlock::new(BlockKind::Footer, "Page 2", 2),
        ]
    }

    #[tokio::test]
    async fn ingests_enriched_chunks_into_the_store() {
        let (ingestor, store, metrics) = ingestor(Some(blocks()));
        let outcome = ingestor.ingest("guide.pdf", b"%PDF").await.expect("ingest");
        assert_eq!(outcome.document, "guide.pdf");
        assert_eq!(outcome.chunk_count, 2);
        assert_eq!(outcome.indexed, 2);
        assert_eq!(outcome.skipped_duplicates, 0);
        assert_eq!(outcome.questions_generated, 4);
        assert_eq!(store.count().await.expect("count"), 2);
        assert_eq!(ingestor.status().await.expect("status"), 2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 1);
        assert_eq!(snapshot.chunks_indexed, 2);
    }

    #[tokio::test]
    async fn re_ingesting_a_document_keeps_one_copy_per_chunk() {
        let (ingestor, store, _) = ingestor(Some(blocks()));
        ingestor.ingest("guide.pdf", b"%PDF").await.expect("first ingest");
        let first = ingestor.status().await.expect("status");
        ingestor.ingest("guide.pdf", b"%PDF").await.expect("second ingest");
        assert_eq!(ingestor.status().await.expect("status"), first);

        let query = HashEmbeddingClient::new(32)
            .embed_one(BODY)
            .await
            .expect("embed");
        let hits = store.search(query, 2).await.expect("search");
        assert_eq!(hits.len(), 2);
        assert_ne!(hits[0].chunk.original_content, hits[1].chunk.original_content);
    }

    #[tokio::test]
    async fn rejects_non_pdf_before_parsing() {
        let (ingestor, store, _) = ingestor(Some(blocks()));
        let error = ingestor.ingest("notes.docx", b"PK").await.unwrap_err();
        assert!(matches!(error, IngestError::UnsupportedInput(name) if name == "notes.docx"));
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn missing_layout_parser_is_reported() {
        let (ingestor, _, _) = ingestor(None);
        assert!(!ingestor.has_layout_parser());
        let error = ingestor.ingest("guide.pdf", b"%PDF").await.unwrap_err();
        assert!(matches!(error, IngestError::LayoutUnavailable));
    }

    #[tokio::test]
    async fn reset_empties_the_knowledge_base() {
        let (ingestor, _, _) = ingestor(Some(blocks()));
        ingestor.ingest("guide.pdf", b"%PDF").await.expect("ingest");
        ingestor.reset().await.expect("reset");
        assert_eq!(ingestor.status().await.expect("status"), 0);
    }

    #[test]
    fn dedupe_keeps_first_copy() {
        let chunk = |text: &str, page| Chunk::new(text, page, "h", "d.pdf");
        let (unique, skipped) = dedupe_chunks(vec![
            chunk("alpha", 1),
            chunk("beta", 1),
            chunk("alpha", 2),
            chunk("  ", 3),
        ]);
        assert_eq!(skipped, 1);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].page, 1);
        assert_eq!(unique[1].content, "beta");
    }
}
