//! Knowledge-base storage.
//!
//! [`VectorStore`] is the seam between ingestion/retrieval and the database. Qdrant is the
//! production backend; [`MemoryVectorStore`] serves offline runs and tests.

mod memory;
pub mod payload;
mod qdrant;

pub use memory::MemoryVectorStore;
pub use payload::compute_chunk_hash;
pub use qdrant::QdrantVectorStore;

use crate::resilience::Transient;
use crate::types::{Chunk, RankedChunk};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by storage backends.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid vector store URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend responded with an unexpected status code.
    #[error("Unexpected vector store response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the backend.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Caller passed a different number of chunks and vectors.
    #[error("Got {chunks} chunks but {vectors} vectors")]
    LengthMismatch {
        /// Chunk count.
        chunks: usize,
        /// Vector count.
        vectors: usize,
    },
    /// Vector length differs from the collection's.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Collection dimension.
        expected: usize,
        /// Offending vector length.
        actual: usize,
    },
    /// An attempt exceeded the call timeout.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// Guarded operation name.
        operation: &'static str,
        /// Timeout that elapsed.
        seconds: u64,
    },
}

impl Transient for VectorStoreError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Http(error) => error.is_connect() || error.is_timeout() || error.is_request(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    fn timed_out(operation: &'static str, after: Duration) -> Self {
        Self::Timeout {
            operation,
            seconds: after.as_secs(),
        }
    }
}

/// Storage operations used by ingestion and retrieval.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert chunks with their vectors; returns the number written.
    ///
    /// A chunk with the same source, page and displayed text replaces the stored one.
    async fn add(&self, chunks: &[Chunk], vectors: Vec<Vec<f32>>)
    -> Result<usize, VectorStoreError>;

    /// Nearest `k` chunks by cosine similarity, closest first.
    async fn search(&self, vector: Vec<f32>, k: usize)
    -> Result<Vec<RankedChunk>, VectorStoreError>;

    /// Number of stored chunks.
    async fn count(&self) -> Result<usize, VectorStoreError>;

    /// Remove every chunk, leaving an empty, usable store.
    async fn delete_all(&self) -> Result<(), VectorStoreError>;
}

pub(crate) fn check_batch(
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
    dimension: usize,
) -> Result<(), VectorStoreError> {
    if chunks.len() != vectors.len() {
        return Err(VectorStoreError::LengthMismatch {
            chunks: chunks.len(),
            vectors: vectors.len(),
        });
    }
    if let Some(vector) = vectors.iter().find(|vector| vector.len() != dimension) {
        return Err(VectorStoreError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    Ok(())
}
