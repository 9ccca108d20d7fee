//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is everything the retrieval pipeline needs
//! from a backend: upsert by chunk id, nearest-neighbor and keyword
//! search with an optional [`FilterPredicate`], and point lookups.
//! Backends are shared behind `Arc` and must be `Send + Sync`; every call
//! is independent, with no session state between calls.
//!
//! [`InMemoryStore`] lives here. The SQLite backend lives in the `ragloom`
//! app crate.

pub mod memory;

pub use memory::InMemoryStore;

use std::cmp::Ordering;
use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::filter::FilterPredicate;
use crate::models::{DataChunk, RESERVED_METADATA_KEYS};

/// Result type for store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A search hit as reported by a backend, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    /// Cosine similarity for vector search, BM25 relevance (higher is
    /// better) for keyword search.
    pub raw_score: f64,
}

/// A stored chunk as returned by [`VectorStore::get`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub parent_id: String,
    pub sequence_index: usize,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub content_hash: String,
    pub has_vector: bool,
}

impl ChunkRecord {
    pub fn from_chunk(chunk: &DataChunk, has_vector: bool) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            parent_id: chunk.parent_id.clone(),
            sequence_index: chunk.sequence_index,
            content: chunk.content.clone(),
            metadata: chunk.metadata_map(),
            content_hash: chunk.content_hash(),
            has_vector,
        }
    }
}

/// Aggregate counts for a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub chunks: usize,
    pub vectors: usize,
    pub parents: usize,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or overwrite one chunk (and vector) |
/// | [`upsert_batch`](VectorStore::upsert_batch) | Same, for many chunks |
/// | [`vector_search`](VectorStore::vector_search) | Cosine nearest neighbors |
/// | [`keyword_search`](VectorStore::keyword_search) | BM25 full-text search |
/// | [`delete`](VectorStore::delete) | Remove one chunk |
/// | [`delete_parent`](VectorStore::delete_parent) | Remove every chunk of a parent |
/// | [`replace_parent`](VectorStore::replace_parent) | Swap a parent's chunks in one step |
/// | [`get`](VectorStore::get) | Fetch one chunk |
/// | [`indexed_fields`](VectorStore::indexed_fields) | Metadata fields usable in filters |
///
/// Search results are ordered by descending `raw_score`, ties by
/// ascending `chunk_id`, and contain at most `top_k` entries.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite `chunk`. Re-upserting an id replaces content,
    /// metadata and vector; `None` removes any stored vector.
    async fn upsert(&self, chunk: &DataChunk, vector: Option<&[f32]>) -> StoreResult<()>;

    /// Upsert many chunks. `vectors`, when given, pairs with `chunks` by
    /// position.
    async fn upsert_batch(
        &self,
        chunks: &[DataChunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> StoreResult<()> {
        check_vector_count(chunks, vectors)?;
        for (i, chunk) in chunks.iter().enumerate() {
            let vector = vectors.map(|v| v[i].as_slice());
            self.upsert(chunk, vector).await?;
        }
        Ok(())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filter: Option<&FilterPredicate>,
    ) -> StoreResult<Vec<ChunkCandidate>>;

    async fn keyword_search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&FilterPredicate>,
    ) -> StoreResult<Vec<ChunkCandidate>>;

    /// Remove a chunk. Returns whether it existed.
    async fn delete(&self, chunk_id: &str) -> StoreResult<bool>;

    /// Remove every chunk of `parent_id`. Returns how many were removed.
    async fn delete_parent(&self, parent_id: &str) -> StoreResult<usize>;

    /// Replace every chunk of `parent_id` with `chunks`. Returns how many
    /// old chunks were removed.
    ///
    /// Backends apply this atomically: on error the parent's previous
    /// chunks are left in place. The default implementation validates the
    /// input and then deletes and upserts in two steps, so it is only
    /// atomic against invalid input.
    async fn replace_parent(
        &self,
        parent_id: &str,
        chunks: &[DataChunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> StoreResult<usize> {
        check_replacement(parent_id, chunks, vectors)?;
        let removed = self.delete_parent(parent_id).await?;
        self.upsert_batch(chunks, vectors).await?;
        Ok(removed)
    }

    async fn get(&self, chunk_id: &str) -> StoreResult<Option<ChunkRecord>>;

    /// Metadata fields a filter may reference.
    async fn indexed_fields(&self) -> StoreResult<BTreeSet<String>>;

    async fn stats(&self) -> StoreResult<StoreStats>;

    /// Remove everything.
    async fn clear(&self) -> StoreResult<()>;
}

/// `vectors`, when given, must pair one-to-one with `chunks`.
pub fn check_vector_count(chunks: &[DataChunk], vectors: Option<&[Vec<f32>]>) -> StoreResult<()> {
    match vectors {
        Some(vecs) if vecs.len() != chunks.len() => Err(StoreError::Insert(format!(
            "{} chunks but {} vectors",
            chunks.len(),
            vecs.len()
        ))),
        _ => Ok(()),
    }
}

/// Input checks for [`VectorStore::replace_parent`]: vector count, and
/// every chunk belonging to `parent_id`.
pub fn check_replacement(
    parent_id: &str,
    chunks: &[DataChunk],
    vectors: Option<&[Vec<f32>]>,
) -> StoreResult<()> {
    check_vector_count(chunks, vectors)?;
    match chunks.iter().find(|c| c.parent_id != parent_id) {
        Some(c) => Err(StoreError::Insert(format!(
            "chunk {} belongs to {}, not {}",
            c.chunk_id, c.parent_id, parent_id
        ))),
        None => Ok(()),
    }
}

/// Reserved metadata keys; always filterable.
pub fn reserved_fields() -> BTreeSet<String> {
    RESERVED_METADATA_KEYS.iter().map(|k| k.to_string()).collect()
}

/// Sort by score descending, then chunk id ascending, and keep `top_k`.
pub fn rank_candidates(mut candidates: Vec<ChunkCandidate>, top_k: usize) -> Vec<ChunkCandidate> {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(top_k);
    candidates
}
