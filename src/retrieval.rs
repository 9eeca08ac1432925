//! Query embedding and similarity ranking.

use std::sync::Arc;

use thiserror::Error;

use crate::embedding::{EmbeddingClient, EmbeddingClientError, cosine_similarity};
use crate::types::{Chunk, RankedChunk};
use crate::vector_store::{VectorStore, VectorStoreError};

/// Retrieval failures; both are external-service failures.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Query or chunk embedding failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Vector store search failed.
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
}

/// Ranks knowledge-base or in-memory chunks against a query.
#[derive(Clone)]
pub struct RetrievalEngine {
    embeddings: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
}

impl RetrievalEngine {
    /// Engine over `store`, embedding queries with `embeddings`.
    pub fn new(embeddings: Arc<dyn EmbeddingClient>, store: Arc<dyn VectorStore>) -> Self {
        Self { embeddings, store }
    }

    /// Top `k` knowledge-base chunks for `query`, most similar first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RankedChunk>, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embeddings.embed_one(query).await?;
        let mut hits = self.store.search(vector, k).await?;
        sort_by_distance(&mut hits);
        hits.truncate(k);
        tracing::debug!(k, hits = hits.len(), "Knowledge base search");
        Ok(hits)
    }

    /// Top `k` of `chunks` for `query`. Query and chunk contents are embedded in one call.
    pub async fn rank_chunks(
        &self,
        query: &str,
        chunks: &[Chunk],
        k: usize,
    ) -> Result<Vec<RankedChunk>, RetrievalError> {
        if chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let mut texts = Vec::with_capacity(chunks.len() + 1);
        texts.push(query.to_string());
        texts.extend(chunks.iter().map(|chunk| chunk.content.clone()));

        let vectors = self.embeddings.embed(texts).await?;
        let Some((query_vector, chunk_vectors)) = vectors.split_first() else {
            return Err(EmbeddingClientError::InvalidResponse("no vectors returned".into()).into());
        };
        if chunk_vectors.len() != chunks.len() {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                chunks.len() + 1,
                vectors.len()
            ))
            .into());
        }

        let mut ranked: Vec<RankedChunk> = chunks
            .iter()
            .zip(chunk_vectors)
            .map(|(chunk, vector)| RankedChunk {
                chunk: chunk.clone(),
                distance: 1.0 - cosine_similarity(query_vector, vector),
            })
            .collect();
        sort_by_distance(&mut ranked);
        ranked.truncate(k);
        Ok(ranked)
    }
}

fn sort_by_distance(hits: &mut [RankedChunk]) {
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingClient;
    use crate::vector_store::MemoryVectorStore;

    fn engine() -> (RetrievalEngine, Arc<MemoryVectorStore>, Arc<HashEmbeddingClient>) {
        let embeddings = Arc::new(HashEmbeddingClient::new(64));
        let store = Arc::new(MemoryVectorStore::new(64));
        (
            RetrievalEngine::new(embeddings.clone(), store.clone()),
            store,
            embeddings,
        )
    }

    fn chunks() -> Vec<Chunk> {
        vec![
            Chunk::new("asylum filing deadline one year", 1, "Asylum", "a.pdf"),
            Chunk::new("green card spouse petition", 2, "Family", "a.pdf"),
            Chunk::new("naturalization civics test", 3, "Citizenship", "a.pdf"),
        ]
    }

    #[tokio::test]
    async fn empty_knowledge_base_returns_nothing() {
        let (engine, _, _) = engine();
        assert!(engine.search("anything", 3).await.expect("search").is_empty());
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_caps_at_k() {
        let (engine, store, embeddings) = engine();
        let chunks = chunks();
        let vectors = embeddings
            .embed(chunks.iter().map(|c| c.content.clone()).collect())
            .await
            .expect("embed");
        store.add(&chunks, vectors).await.expect("add");

        let hits = engine.search("asylum deadline", 2).await.expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.header, "Asylum");
        assert!(hits[0].similarity() >= hits[1].similarity());
    }

    #[tokio::test]
    async fn rank_chunks_works_in_memory() {
        let (engine, store, _) = engine();
        let ranked = engine
            .rank_chunks("civics test for naturalization", &chunks(), 1)
            .await
            .expect("rank");
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].chunk.header, "Citizenship");
        assert_eq!(store.count().await.expect("count"), 0);
    }
}
