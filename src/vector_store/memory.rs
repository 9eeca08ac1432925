//! In-process brute-force store.

use super::payload::point_id;
use super::{VectorStore, VectorStoreError, check_batch};
use crate::embedding::cosine_similarity;
use crate::types::{Chunk, RankedChunk};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// [`VectorStore`] kept in memory and scanned linearly on search.
pub struct MemoryVectorStore {
    dimension: usize,
    points: RwLock<Points>,
}

/// Entries in insertion order, indexed by point id.
#[derive(Default)]
struct Points {
    positions: HashMap<String, usize>,
    entries: Vec<(Chunk, Vec<f32>)>,
}

impl MemoryVectorStore {
    /// Empty store accepting `dimension`-length vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: RwLock::new(Points::default()),
        }
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add(
        &self,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
    ) -> Result<usize, VectorStoreError> {
        check_batch(chunks, &vectors, self.dimension)?;
        let mut guard = self.points.write().unwrap_or_else(|e| e.into_inner());
        let points = &mut *guard;
        for (chunk, vector) in chunks.iter().cloned().zip(vectors) {
            let id = point_id(&chunk);
            match points.positions.get(&id).copied() {
                Some(position) => points.entries[position] = (chunk, vector),
                None => {
                    let position = points.entries.len();
                    points.entries.push((chunk, vector));
                    points.positions.insert(id, position);
                }
            }
        }
        Ok(chunks.len())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<RankedChunk>, VectorStoreError> {
        if vector.len() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let points = self.points.read().unwrap_or_else(|e| e.into_inner());
        let mut ranked: Vec<RankedChunk> = points
            .entries
            .iter()
            .map(|(chunk, stored)| RankedChunk {
                chunk: chunk.clone(),
                distance: 1.0 - cosine_similarity(&vector, stored),
            })
            .collect();
        ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        ranked.truncate(k);
        Ok(ranked)
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        Ok(self
            .points
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len())
    }

    async fn delete_all(&self) -> Result<(), VectorStoreError> {
        *self.points.write().unwrap_or_else(|e| e.into_inner()) = Points::default();
        Ok(())
    }
}
