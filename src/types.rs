//! Domain types shared across the pipeline.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Languages the assistant answers in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English, the fallback for anything unrecognized.
    #[default]
    English,
    /// Spanish.
    Spanish,
}

impl Language {
    /// Lowercase name used in prompts and responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::English => "english",
            Self::Spanish => "spanish",
        }
    }
}

/// Which source a turn is answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    /// Permanent knowledge base.
    #[default]
    #[serde(rename = "GENERAL_QA")]
    GeneralQa,
    /// The document uploaded into the session.
    #[serde(rename = "DOCUMENT_QA")]
    DocumentQa,
}

/// How a reply was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStrategy {
    /// Retrieved knowledge-base chunks.
    KnowledgeBase,
    /// Whole uploaded text in the prompt.
    FullText,
    /// Relevant excerpt extracted from the uploaded text.
    Extraction,
    /// Top-ranked chunks of a chunked upload.
    RankedChunks,
    /// Per-window answers combined into one.
    MapReduce,
    /// Window-by-window translation.
    Translation,
    /// Extraction found nothing relevant.
    NotFound,
}

/// Citation attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Document name.
    pub source: String,
    /// 1-based page number.
    pub page: u32,
    /// Section header the text belongs to.
    pub header: String,
}

/// Retrieval unit produced by the chunker.
///
/// `original_content` holds the chunk text as split. `content` starts identical and may gain a
/// trailing block of generated questions; `original_content` is never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Text that gets embedded.
    pub content: String,
    /// Text shown to the model and the user.
    pub original_content: String,
    /// Page of the section's first block.
    pub page: u32,
    /// Section header.
    pub header: String,
    /// Name of the source document.
    pub document_name: String,
    /// Questions generated for this chunk.
    #[serde(default)]
    pub questions: Vec<String>,
}

impl Chunk {
    /// Build an unenriched chunk.
    pub fn new(
        text: impl Into<String>,
        page: u32,
        header: impl Into<String>,
        document_name: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            content: text.clone(),
            original_content: text,
            page,
            header: header.into(),
            document_name: document_name.into(),
            questions: Vec::new(),
        }
    }

    /// Record generated questions and append them to the embedded text.
    pub fn enrich(&mut self, questions: Vec<String>) {
        if questions.is_empty() {
            return;
        }
        self.content = format!(
            "{}\n\nRelated questions: {}",
            self.original_content,
            questions.join(" ")
        );
        self.questions = questions;
    }

    /// Citation for this chunk.
    pub fn source_ref(&self) -> SourceRef {
        SourceRef {
            source: self.document_name.clone(),
            page: self.page,
            header: self.header.clone(),
        }
    }
}

/// Search hit with its cosine distance.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedChunk {
    /// Matched chunk.
    pub chunk: Chunk,
    /// `1 - cosine similarity`.
    pub distance: f32,
}

impl RankedChunk {
    /// Cosine similarity implied by the distance.
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

/// One question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// User message.
    pub question: String,
    /// Assistant reply.
    pub response: String,
    /// Citations for the reply.
    pub sources: Vec<SourceRef>,
    /// RFC 3339 UTC time of the exchange.
    pub timestamp: String,
}

impl Turn {
    /// Build a turn stamped with the current time.
    pub fn now(question: String, response: String, sources: Vec<SourceRef>) -> Self {
        Self {
            question,
            response,
            sources,
            timestamp: current_timestamp_rfc3339(),
        }
    }
}

/// Document attached to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentContext {
    /// Extracted plain text.
    SimpleDocument {
        /// Uploaded file name.
        filename: String,
        /// Extracted text.
        full_text: String,
        /// Generated summary.
        summary: String,
    },
    /// Layout-parsed, chunked upload.
    ChunkedDocument {
        /// Uploaded file name.
        filename: String,
        /// Chunks in document order.
        chunks: Vec<Chunk>,
    },
}

impl DocumentContext {
    /// Uploaded file name.
    pub fn filename(&self) -> &str {
        match self {
            Self::SimpleDocument { filename, .. } | Self::ChunkedDocument { filename, .. } => {
                filename
            }
        }
    }

    /// Full document text; chunk originals are joined for chunked uploads.
    pub fn full_text(&self) -> String {
        match self {
            Self::SimpleDocument { full_text, .. } => full_text.clone(),
            Self::ChunkedDocument { chunks, .. } => chunks
                .iter()
                .map(|chunk| chunk.original_content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// Current UTC time in RFC 3339.
pub fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
