//! Assembles a [`ConversationService`] from [`Config`].

use std::sync::Arc;

use thiserror::Error;

use crate::assembler::PromptAssembler;
use crate::chunking::{ChunkingError, ChunkingSettings, DocumentChunker, QuestionEnricher};
use crate::config::{Config, EmbeddingProvider, VectorStoreKind};
use crate::embedding::{
    EmbeddingClient, EmbeddingClientError, HashEmbeddingClient, OllamaEmbeddingClient,
};
use crate::ingest::KnowledgeBaseIngestor;
use crate::layout::{HttpLayoutParser, LayoutError, LayoutParser};
use crate::llm::{LlmClient, LlmError, OllamaLlmClient};
use crate::map_reduce::MapReduceProcessor;
use crate::metrics::PipelineMetrics;
use crate::orchestrator::{ConversationService, PipelineSettings, ServiceComponents};
use crate::prompts::{PromptError, PromptLibrary};
use crate::resilience::CallPolicy;
use crate::retrieval::RetrievalEngine;
use crate::session::SessionStore;
use crate::vector_store::{MemoryVectorStore, QdrantVectorStore, VectorStore, VectorStoreError};

/// Failures while building the service.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Generation client could not be built.
    #[error("Failed to initialize LLM client: {0}")]
    Llm(#[from] LlmError),
    /// Embedding client could not be built.
    #[error("Failed to initialize embedding client: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Vector store could not be reached or prepared.
    #[error("Failed to initialize vector store: {0}")]
    VectorStore(#[from] VectorStoreError),
    /// Layout parser client could not be built.
    #[error("Failed to initialize layout parser: {0}")]
    Layout(#[from] LayoutError),
    /// Chunk or window sizes are unusable.
    #[error("Invalid chunking settings: {0}")]
    Chunking(#[from] ChunkingError),
    /// Template overrides could not be loaded.
    #[error("Failed to load prompt templates: {0}")]
    Prompts(#[from] PromptError),
}

/// Build every collaborator described by `config` and wire the service.
pub async fn build_service(config: &Config) -> Result<ConversationService, BootstrapError> {
    let policy = CallPolicy::new(config.external_call_timeout_secs, config.external_call_retries);

    let llm: Arc<dyn LlmClient> = Arc::new(OllamaLlmClient::new(
        config.llm_base_url.clone(),
        config.llm_model.clone(),
        policy,
    )?);
    if !llm.is_available().await {
        tracing::warn!(url = %config.llm_base_url, "LLM runtime not reachable at startup");
    }

    let embeddings = build_embeddings(config, policy)?;
    let store = build_store(config, policy).await?;
    let layout = config
        .layout_parser_url
        .as_ref()
        .map(|url| {
            HttpLayoutParser::new(url.clone(), config.layout_parser_api_key.clone(), policy)
                .map(|parser| Arc::new(parser) as Arc<dyn LayoutParser>)
        })
        .transpose()?;

    let chunker = DocumentChunker::new(ChunkingSettings {
        chunk_size: config.chunk_size,
        chunk_overlap: config.chunk_overlap,
        min_section_text_length: config.min_section_text_length,
        default_header_text: config.default_header_text.clone(),
    })?;
    let enricher = QuestionEnricher::new(
        llm.clone(),
        config.min_section_text_length,
        config.enrichment_concurrency,
    );
    let metrics = Arc::new(PipelineMetrics::new());
    let ingestor = KnowledgeBaseIngestor::new(
        layout,
        chunker,
        enricher,
        embeddings.clone(),
        store.clone(),
        metrics.clone(),
    );

    let library = match &config.prompt_template_dir {
        Some(dir) => PromptLibrary::load(dir)?,
        None => PromptLibrary::builtin(),
    };
    let map_reduce = MapReduceProcessor::new(
        llm.clone(),
        config.map_reduce_window_size,
        config.map_reduce_window_overlap,
        config.map_reduce_concurrency,
    )?;

    let components = ServiceComponents {
        llm,
        retrieval: RetrievalEngine::new(embeddings, store),
        map_reduce,
        assembler: PromptAssembler::new(library, config.context_history_messages),
        ingestor,
        sessions: SessionStore::new(config.max_turns_per_session),
        metrics,
    };
    let settings = PipelineSettings {
        max_chunks_retrieved: config.max_chunks_retrieved,
        large_document_threshold: config.large_document_threshold,
        session_document_chunking: config.session_document_chunking,
    };
    tracing::info!(
        llm_model = %config.llm_model,
        embedding_provider = ?config.embedding_provider,
        vector_store = ?config.vector_store,
        layout_parser = config.layout_parser_url.is_some(),
        "Conversation service ready"
    );
    Ok(ConversationService::new(components, settings))
}

fn build_embeddings(
    config: &Config,
    policy: CallPolicy,
) -> Result<Arc<dyn EmbeddingClient>, BootstrapError> {
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            config.embedding_base_url(),
            config.embedding_model.clone(),
            config.embedding_dimension,
            policy,
        )?),
        EmbeddingProvider::Hash => Arc::new(HashEmbeddingClient::new(config.embedding_dimension)),
    };
    Ok(client)
}

async fn build_store(
    config: &Config,
    policy: CallPolicy,
) -> Result<Arc<dyn VectorStore>, BootstrapError> {
    match config.vector_store {
        VectorStoreKind::Qdrant => {
            let store = QdrantVectorStore::new(
                &config.qdrant_url,
                config.qdrant_api_key.clone(),
                config.qdrant_collection_name.clone(),
                config.embedding_dimension,
                policy,
            )?;
            store.ensure_collection().await?;
            tracing::debug!(collection = store.collection(), "Knowledge base collection ready");
            Ok(Arc::new(store))
        }
        VectorStoreKind::Memory => {
            tracing::warn!("Using in-memory knowledge base; contents are lost on restart");
            Ok(Arc::new(MemoryVectorStore::new(config.embedding_dimension)))
        }
    }
}
