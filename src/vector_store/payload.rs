//! Helpers for constructing, hashing and reading back stored chunk payloads.

use crate::types::{Chunk, current_timestamp_rfc3339};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const QUESTION_SEPARATOR: &str = "|";
const POINT_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_2a7e_91d4_4b6a_8c3e_d2f1_7a60_b915);

/// Build the payload object stored alongside each indexed chunk.
pub(crate) fn build_payload(chunk: &Chunk, indexed_at: &str) -> Value {
    let mut payload = Map::new();
    payload.insert("content".into(), Value::String(chunk.content.clone()));
    payload.insert(
        "original_content".into(),
        Value::String(chunk.original_content.clone()),
    );
    payload.insert("source".into(), Value::String(chunk.document_name.clone()));
    payload.insert("page".into(), Value::from(chunk.page));
    payload.insert("header".into(), Value::String(chunk.header.clone()));
    payload.insert(
        "questions".into(),
        Value::String(chunk.questions.join(QUESTION_SEPARATOR)),
    );
    payload.insert(
        "chunk_hash".into(),
        Value::String(compute_chunk_hash(&chunk.content)),
    );
    payload.insert("indexed_at".into(), Value::String(indexed_at.to_string()));
    Value::Object(payload)
}

/// Rebuild a chunk from a stored payload. Missing fields fall back to empty values.
pub(crate) fn chunk_from_payload(payload: Option<Map<String, Value>>) -> Chunk {
    let mut map = payload.unwrap_or_default();
    let mut take_string = |key: &str| match map.remove(key) {
        Some(Value::String(value)) => value,
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    };

    let content = take_string("content");
    let mut original_content = take_string("original_content");
    if original_content.is_empty() {
        original_content = content.clone();
    }
    let document_name = take_string("source");
    let header = take_string("header");
    let page = take_string("page").parse().unwrap_or(1);
    let questions = take_string("questions")
        .split(QUESTION_SEPARATOR)
        .map(str::trim)
        .filter(|question| !question.is_empty())
        .map(str::to_string)
        .collect();

    Chunk {
        content,
        original_content,
        page,
        header,
        document_name,
        questions,
    }
}

/// Compute a deterministic SHA-256 hash for the chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Timestamp recorded on each indexed point.
pub(crate) fn indexed_at() -> String {
    current_timestamp_rfc3339()
}

/// Stable point identifier derived from source, page and displayed text.
///
/// Re-indexing the same chunk yields the same id, so stores overwrite instead of duplicating.
pub(crate) fn point_id(chunk: &Chunk) -> String {
    let key = format!(
        "{}:{}:{}",
        chunk.document_name,
        chunk.page,
        compute_chunk_hash(&chunk.original_content)
    );
    Uuid::new_v5(&POINT_NAMESPACE, key.as_bytes()).to_string()
}
