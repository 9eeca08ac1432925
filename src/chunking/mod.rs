//! From layout blocks to retrieval-ready chunks.
//!
//! [`DocumentChunker`] groups blocks into header-led sections and sizes them; [`QuestionEnricher`]
//! then appends generated questions to each chunk's embedded text.

mod enrich;
mod sections;
mod splitter;

pub use enrich::{QuestionEnricher, looks_spanish, parse_questions};
pub use sections::{ChunkingSettings, DocumentChunker, Section};
pub use splitter::TextSplitter;

use thiserror::Error;

/// Errors produced while configuring the chunker.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Chunk size of zero.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap would leave no room for new text.
    #[error("overlap {overlap} must be smaller than chunk size {chunk_size}")]
    OverlapTooLarge {
        /// Configured chunk size.
        chunk_size: usize,
        /// Configured overlap.
        overlap: usize,
    },
}
