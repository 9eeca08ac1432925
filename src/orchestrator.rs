//! Per-turn orchestration.
//!
//! [`ConversationService`] owns the session store and every pipeline stage. A chat turn detects
//! the language, routes between the knowledge base and the session document, picks a strategy
//! for document questions and records the exchange. Uploads attach a document to the session and
//! answer the accompanying message (or return a summary when there is none).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::assembler::PromptAssembler;
use crate::classify::{
    Intent, IntentClassifier, LanguageDetector, ModeRouter, TranslationIntentDetector,
    translation_target,
};
use crate::extract::{DocumentFormat, ExtractError, extract_text};
use crate::ingest::{IngestError, IngestionOutcome, KnowledgeBaseIngestor};
use crate::llm::{LlmClient, LlmError};
use crate::map_reduce::{MapReduceProcessor, MapTask};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::prompts::{self, NO_RELEVANT_INFORMATION};
use crate::retrieval::{RetrievalEngine, RetrievalError};
use crate::session::{SessionStore, SessionView};
use crate::types::{
    AnswerStrategy, DocumentContext, Language, Mode, SourceRef, Turn, current_timestamp_rfc3339,
};

/// Summary stored when the summary call fails.
pub const SUMMARY_FALLBACK: &str = "No summary could be generated.";

/// Characters of an uploaded document sampled for language detection when no message is given.
const LANGUAGE_SAMPLE_CHARS: usize = 500;

/// Reply when extraction finds nothing relevant in the document.
pub fn not_found_reply(language: Language) -> &'static str {
    match language {
        Language::English => "I couldn't find any information in the document for your question.",
        Language::Spanish => "No encontré información en el documento para tu pregunta.",
    }
}

/// Failures surfaced by a turn.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Upload is not a PDF or DOCX file.
    #[error("Unsupported file type for {0}: only .pdf and .docx are accepted")]
    UnsupportedInput(String),
    /// Text could not be extracted from the upload.
    #[error(transparent)]
    Extraction(ExtractError),
    /// Language model call failed.
    #[error("Language model request failed: {0}")]
    Llm(#[from] LlmError),
    /// Query embedding or vector search failed.
    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),
    /// Layout parsing, embedding or storage failed during ingestion.
    #[error(transparent)]
    Ingest(IngestError),
    /// Background extraction task panicked or was cancelled.
    #[error("Internal task failed: {0}")]
    Internal(String),
}

impl From<ExtractError> for ServiceError {
    fn from(error: ExtractError) -> Self {
        match error {
            ExtractError::UnsupportedInput(name) => Self::UnsupportedInput(name),
            other => Self::Extraction(other),
        }
    }
}

impl From<IngestError> for ServiceError {
    fn from(error: IngestError) -> Self {
        match error {
            IngestError::UnsupportedInput(name) => Self::UnsupportedInput(name),
            other => Self::Ingest(other),
        }
    }
}

impl ServiceError {
    /// True when an external collaborator failed after timeout and retry.
    pub fn is_external_failure(&self) -> bool {
        matches!(self, Self::Llm(_) | Self::Retrieval(_) | Self::Ingest(_))
    }
}

/// Result of a chat turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    /// Answer text.
    pub response: String,
    /// Citations.
    pub sources: Vec<SourceRef>,
    /// Detected language of the message.
    pub language: Language,
    /// RFC 3339 time of the reply.
    pub timestamp: String,
    /// Mode the turn was routed to.
    pub mode: Mode,
    /// How the answer was produced.
    pub strategy: AnswerStrategy,
}

/// State of an upload after processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Document attached and message answered.
    Completed,
}

/// Result of an upload turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReply {
    /// Answer to the accompanying message, or the document summary.
    pub response: String,
    /// Uploaded file name.
    pub filename: String,
    /// Citations.
    pub sources: Vec<SourceRef>,
    /// Detected language of the message, or of the document text when no message was given.
    pub language: Language,
    /// Processing state.
    pub processing_status: ProcessingStatus,
    /// Always document mode after an upload.
    pub mode: Mode,
    /// How the answer was produced.
    pub strategy: AnswerStrategy,
    /// RFC 3339 time of the reply.
    pub timestamp: String,
}

/// Tunables for strategy selection.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Knowledge-base and ranked-chunk hits per answer.
    pub max_chunks_retrieved: usize,
    /// Holistic questions over longer documents use map-reduce.
    pub large_document_threshold: usize,
    /// Chunk uploaded PDFs through the layout parser instead of plain extraction.
    pub session_document_chunking: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_chunks_retrieved: 3,
            large_document_threshold: 12_000,
            session_document_chunking: false,
        }
    }
}

/// Collaborators the service is built from.
pub struct ServiceComponents {
    /// Generation backend shared by classifiers and answers.
    pub llm: Arc<dyn LlmClient>,
    /// Knowledge-base and in-memory ranking.
    pub retrieval: RetrievalEngine,
    /// Oversized-document processor.
    pub map_reduce: MapReduceProcessor,
    /// Answer prompt builder.
    pub assembler: PromptAssembler,
    /// Knowledge-base ingestion and administration.
    pub ingestor: KnowledgeBaseIngestor,
    /// Conversation state.
    pub sessions: SessionStore,
    /// Shared counters.
    pub metrics: Arc<PipelineMetrics>,
}

/// Operations exposed to the HTTP layer.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// Answer one chat message.
    async fn handle_chat(&self, session_id: &str, message: &str) -> Result<ChatReply, ServiceError>;

    /// Attach an uploaded document and answer `message` about it.
    async fn handle_upload(
        &self,
        session_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        message: &str,
    ) -> Result<UploadReply, ServiceError>;

    /// Session state; an unknown id yields an empty view.
    async fn get_history(&self, session_id: &str) -> SessionView;

    /// Drop a session. Returns whether it existed.
    async fn clear_session(&self, session_id: &str) -> bool;

    /// Ingest a PDF into the knowledge base.
    async fn ingest_document(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<IngestionOutcome, ServiceError>;

    /// Number of chunks in the knowledge base.
    async fn knowledge_base_status(&self) -> Result<usize, ServiceError>;

    /// Delete every knowledge-base chunk.
    async fn reset_knowledge_base(&self) -> Result<(), ServiceError>;

    /// Current pipeline counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

struct Answer {
    response: String,
    sources: Vec<SourceRef>,
    strategy: AnswerStrategy,
}

impl Answer {
    fn unsourced(response: String, strategy: AnswerStrategy) -> Self {
        Self {
            response,
            sources: Vec::new(),
            strategy,
        }
    }
}

/// Conversational retrieval pipeline.
pub struct ConversationService {
    llm: Arc<dyn LlmClient>,
    language: LanguageDetector,
    router: ModeRouter,
    intent: IntentClassifier,
    translation: TranslationIntentDetector,
    retrieval: RetrievalEngine,
    map_reduce: MapReduceProcessor,
    assembler: PromptAssembler,
    ingestor: KnowledgeBaseIngestor,
    sessions: SessionStore,
    metrics: Arc<PipelineMetrics>,
    settings: PipelineSettings,
}

impl ConversationService {
    /// Build the service; classifiers share the components' LLM client.
    pub fn new(components: ServiceComponents, settings: PipelineSettings) -> Self {
        let ServiceComponents {
            llm,
            retrieval,
            map_reduce,
            assembler,
            ingestor,
            sessions,
            metrics,
        } = components;
        Self {
            language: LanguageDetector::new(llm.clone()),
            router: ModeRouter::new(llm.clone()),
            intent: IntentClassifier::new(llm.clone()),
            translation: TranslationIntentDetector::new(llm.clone()),
            llm,
            retrieval,
            map_reduce,
            assembler,
            ingestor,
            sessions,
            metrics,
            settings,
        }
    }

    /// Session store backing this service.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Answer one chat message.
    pub async fn handle_chat(&self, session_id: &str, message: &str) -> Result<ChatReply, ServiceError> {
        let _turn = self.sessions.begin_turn(session_id).await;
        let session = self.sessions.get_or_create(session_id).await;

        let language = self.language.detect(message).await.category;
        let history_text = self.assembler.router_history(&session.history);
        let route = self
            .router
            .route(message, &history_text, session.has_document())
            .await;
        let mode = route.category;
        self.sessions.set_mode(session_id, mode).await;
        tracing::info!(
            session_id,
            mode = ?mode,
            language = language.as_str(),
            route_valid = route.valid,
            "Routed turn"
        );

        let answer = match (mode, &session.document_context) {
            (Mode::DocumentQa, Some(document)) => {
                self.answer_from_document(document, message, language, &session.history)
                    .await?
            }
            _ => {
                self.answer_from_knowledge_base(message, language, &session.history)
                    .await?
            }
        };

        let timestamp = current_timestamp_rfc3339();
        self.record_turn(session_id, message, &answer, mode, &timestamp)
            .await;
        Ok(ChatReply {
            response: answer.response,
            sources: answer.sources,
            language,
            timestamp,
            mode,
            strategy: answer.strategy,
        })
    }

    /// Attach an uploaded document to the session and answer `message` about it.
    pub async fn handle_upload(
        &self,
        session_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        message: &str,
    ) -> Result<UploadReply, ServiceError> {
        let format = DocumentFormat::from_filename(filename)
            .ok_or_else(|| ServiceError::UnsupportedInput(filename.to_string()))?;
        let _turn = self.sessions.begin_turn(session_id).await;
        tracing::info!(session_id, filename, bytes = bytes.len(), format = ?format, "Processing upload");

        let chunked = self.settings.session_document_chunking
            && format == DocumentFormat::Pdf
            && self.ingestor.has_layout_parser();
        let document = if chunked {
            let chunks = self.ingestor.prepare_chunks(filename, &bytes).await?;
            if chunks.is_empty() {
                return Err(ExtractError::Empty(filename.to_string()).into());
            }
            DocumentContext::ChunkedDocument {
                filename: filename.to_string(),
                chunks,
            }
        } else {
            DocumentContext::SimpleDocument {
                filename: filename.to_string(),
                full_text: self.extract(filename, bytes).await?,
                summary: String::new(),
            }
        };

        let full_text = document.full_text();
        let language = if message.trim().is_empty() {
            let sample: String = full_text.chars().take(LANGUAGE_SAMPLE_CHARS).collect();
            self.language.detect(&sample).await.category
        } else {
            self.language.detect(message).await.category
        };

        let (document, summary) = match document {
            DocumentContext::SimpleDocument {
                filename, full_text, ..
            } => {
                let summary = self.summarize(&full_text, language).await;
                let document = DocumentContext::SimpleDocument {
                    filename,
                    full_text,
                    summary: summary.clone(),
                };
                (document, Some(summary))
            }
            chunked => (chunked, None),
        };

        self.sessions
            .set_document_context(session_id, document.clone())
            .await;
        self.sessions.set_mode(session_id, Mode::DocumentQa).await;

        let answer = if message.trim().is_empty() {
            let summary = match summary {
                Some(summary) => summary,
                None => self.summarize(&full_text, language).await,
            };
            Answer::unsourced(summary, AnswerStrategy::FullText)
        } else {
            self.answer_from_document(&document, message, language, &[])
                .await?
        };

        let question = if message.trim().is_empty() {
            format!("Uploaded {filename}")
        } else {
            message.to_string()
        };
        let timestamp = current_timestamp_rfc3339();
        self.record_turn(session_id, &question, &answer, Mode::DocumentQa, &timestamp)
            .await;
        Ok(UploadReply {
            response: answer.response,
            filename: filename.to_string(),
            sources: answer.sources,
            language,
            processing_status: ProcessingStatus::Completed,
            mode: Mode::DocumentQa,
            strategy: answer.strategy,
            timestamp,
        })
    }

    /// Session state; an unknown id yields an empty view without creating a session.
    pub async fn get_history(&self, session_id: &str) -> SessionView {
        match self.sessions.get(session_id).await {
            Some(session) => session.into(),
            None => SessionView {
                session_id: session_id.to_string(),
                mode: Mode::GeneralQa,
                document: None,
                history: Vec::new(),
            },
        }
    }

    /// Drop a session once its in-flight turn has finished.
    pub async fn clear_session(&self, session_id: &str) -> bool {
        self.sessions.clear(session_id).await
    }

    /// Ingest a PDF into the knowledge base.
    pub async fn ingest_document(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<IngestionOutcome, ServiceError> {
        Ok(self.ingestor.ingest(filename, &bytes).await?)
    }

    /// Number of chunks in the knowledge base.
    pub async fn knowledge_base_status(&self) -> Result<usize, ServiceError> {
        Ok(self.ingestor.status().await?)
    }

    /// Delete every knowledge-base chunk.
    pub async fn reset_knowledge_base(&self) -> Result<(), ServiceError> {
        Ok(self.ingestor.reset().await?)
    }

    /// Current pipeline counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn answer_from_knowledge_base(
        &self,
        message: &str,
        language: Language,
        history: &[Turn],
    ) -> Result<Answer, ServiceError> {
        let hits = self
            .retrieval
            .search(message, self.settings.max_chunks_retrieved)
            .await?;
        let prompt =
            self.assembler
                .general_answer(language, message, hits.iter().map(|hit| &hit.chunk), history);
        let response = self.llm.generate(&prompt).await?;
        Ok(Answer {
            response,
            sources: unique_sources(hits.iter().map(|hit| hit.chunk.source_ref())),
            strategy: AnswerStrategy::KnowledgeBase,
        })
    }

    async fn answer_from_document(
        &self,
        document: &DocumentContext,
        message: &str,
        language: Language,
        history: &[Turn],
    ) -> Result<Answer, ServiceError> {
        let full_text = document.full_text();

        if self.translation.detect(message).await.category {
            let target = translation_target(message, language);
            tracing::info!(target = target.as_str(), "Translating document");
            let outcome = self
                .map_reduce
                .run(&full_text, &MapTask::Translate { target }, language)
                .await?;
            self.metrics.record_map_reduce(outcome.failed_windows as u64);
            return Ok(Answer::unsourced(outcome.response, AnswerStrategy::Translation));
        }

        let intent = self.intent.classify(message, language).await;
        let length = full_text.chars().count();
        tracing::debug!(intent = ?intent.category, valid = intent.valid, length, "Classified document question");

        match intent.category {
            Intent::Holistic if length > self.settings.large_document_threshold => {
                let task = MapTask::Answer {
                    question: message.to_string(),
                };
                let outcome = self.map_reduce.run(&full_text, &task, language).await?;
                self.metrics.record_map_reduce(outcome.failed_windows as u64);
                Ok(Answer::unsourced(outcome.response, AnswerStrategy::MapReduce))
            }
            Intent::Holistic => {
                let prompt = self
                    .assembler
                    .document_answer(language, message, &full_text, history);
                let response = self.llm.generate(&prompt).await?;
                Ok(Answer::unsourced(response, AnswerStrategy::FullText))
            }
            Intent::Specific => match document {
                DocumentContext::SimpleDocument { full_text, .. } => {
                    self.extract_and_answer(full_text, message, language, history)
                        .await
                }
                DocumentContext::ChunkedDocument { chunks, .. } => {
                    let ranked = self
                        .retrieval
                        .rank_chunks(message, chunks, self.settings.max_chunks_retrieved)
                        .await?;
                    let prompt = self.assembler.chunk_answer(
                        language,
                        message,
                        ranked.iter().map(|hit| &hit.chunk),
                        history,
                    );
                    let response = self.llm.generate(&prompt).await?;
                    Ok(Answer {
                        response,
                        sources: unique_sources(ranked.iter().map(|hit| hit.chunk.source_ref())),
                        strategy: AnswerStrategy::RankedChunks,
                    })
                }
            },
        }
    }

    async fn extract_and_answer(
        &self,
        full_text: &str,
        message: &str,
        language: Language,
        history: &[Turn],
    ) -> Result<Answer, ServiceError> {
        let excerpt = self
            .llm
            .generate(&prompts::extraction(full_text, message))
            .await?;
        let not_found = NO_RELEVANT_INFORMATION.trim_end_matches('.').to_lowercase();
        if excerpt.trim().is_empty() || excerpt.to_lowercase().contains(&not_found) {
            tracing::info!("Extraction found nothing relevant");
            return Ok(Answer::unsourced(
                not_found_reply(language).to_string(),
                AnswerStrategy::NotFound,
            ));
        }
        let prompt = self
            .assembler
            .document_answer(language, message, &excerpt, history);
        let response = self.llm.generate(&prompt).await?;
        Ok(Answer::unsourced(response, AnswerStrategy::Extraction))
    }

    async fn extract(&self, filename: &str, bytes: Vec<u8>) -> Result<String, ServiceError> {
        let name = filename.to_string();
        tokio::task::spawn_blocking(move || extract_text(&name, &bytes))
            .await
            .map_err(|error| ServiceError::Internal(error.to_string()))?
            .map_err(ServiceError::from)
    }

    async fn summarize(&self, text: &str, language: Language) -> String {
        let excerpt: String = text
            .chars()
            .take(self.settings.large_document_threshold)
            .collect();
        match self.llm.generate(&prompts::summary(language, &excerpt)).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => SUMMARY_FALLBACK.to_string(),
            Err(error) => {
                tracing::warn!(%error, "Summary generation failed");
                SUMMARY_FALLBACK.to_string()
            }
        }
    }

    async fn record_turn(
        &self,
        session_id: &str,
        question: &str,
        answer: &Answer,
        mode: Mode,
        timestamp: &str,
    ) {
        let turn = Turn {
            question: question.to_string(),
            response: answer.response.clone(),
            sources: answer.sources.clone(),
            timestamp: timestamp.to_string(),
        };
        self.sessions.append_turn(session_id, turn).await;
        self.metrics.record_turn(mode);
        tracing::info!(
            session_id,
            mode = ?mode,
            strategy = ?answer.strategy,
            sources = answer.sources.len(),
            "Turn completed"
        );
    }
}

fn unique_sources(sources: impl Iterator<Item = SourceRef>) -> Vec<SourceRef> {
    let mut unique: Vec<SourceRef> = Vec::new();
    for source in sources {
        if !unique.contains(&source) {
            unique.push(source);
        }
    }
    unique
}

#[async_trait]
impl ConversationApi for ConversationService {
    async fn handle_chat(&self, session_id: &str, message: &str) -> Result<ChatReply, ServiceError> {
        ConversationService::handle_chat(self, session_id, message).await
    }

    async fn handle_upload(
        &self,
        session_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        message: &str,
    ) -> Result<UploadReply, ServiceError> {
        ConversationService::handle_upload(self, session_id, filename, bytes, message).await
    }

    async fn get_history(&self, session_id: &str) -> SessionView {
        ConversationService::get_history(self, session_id).await
    }

    async fn clear_session(&self, session_id: &str) -> bool {
        ConversationService::clear_session(self, session_id).await
    }

    async fn ingest_document(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<IngestionOutcome, ServiceError> {
        ConversationService::ingest_document(self, filename, bytes).await
    }

    async fn knowledge_base_status(&self) -> Result<usize, ServiceError> {
        ConversationService::knowledge_base_status(self).await
    }

    async fn reset_knowledge_base(&self) -> Result<(), ServiceError> {
        ConversationService::reset_knowledge_base(self).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        ConversationService::metrics_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str, page: u32) -> SourceRef {
        SourceRef {
            source: name.into(),
            page,
            header: "H".into(),
        }
    }

    #[test]
    fn sources_are_deduplicated_in_order() {
        let sources = unique_sources(
            vec![source("b.pdf", 2), source("a.pdf", 1), source("b.pdf", 2)].into_iter(),
        );
        assert_eq!(sources, vec![source("b.pdf", 2), source("a.pdf", 1)]);
    }

    #[test]
    fn unsupported_input_is_lifted_from_nested_errors() {
        let from_extract: ServiceError = ExtractError::UnsupportedInput("a.xlsx".into()).into();
        let from_ingest: ServiceError = IngestError::UnsupportedInput("a.docx".into()).into();
        assert!(matches!(from_extract, ServiceError::UnsupportedInput(name) if name == "a.xlsx"));
        assert!(matches!(from_ingest, ServiceError::UnsupportedInput(name) if name == "a.docx"));
    }

    #[test]
    fn only_collaborator_failures_count_as_external() {
        assert!(ServiceError::Llm(LlmError::GenerationFailed("x".into())).is_external_failure());
        assert!(ServiceError::Ingest(IngestError::LayoutUnavailable).is_external_failure());
        assert!(!ServiceError::Extraction(ExtractError::Empty("a.pdf".into())).is_external_failure());
        assert!(!ServiceError::Internal("join".into()).is_external_failure());
    }

    #[test]
    fn not_found_reply_follows_language() {
        assert!(not_found_reply(Language::Spanish).starts_with("No encontré"));
        assert!(not_found_reply(Language::English).starts_with("I couldn't"));
    }
}
