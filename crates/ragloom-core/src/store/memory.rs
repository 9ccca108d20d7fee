//! In-memory [`VectorStore`] for tests, previews and small corpora.
//!
//! Chunks live in a `BTreeMap` keyed by chunk id behind a
//! `std::sync::RwLock`. Vector search is brute-force cosine similarity.
//! Keyword search is Okapi BM25 (`k1 = 1.2`, `b = 0.75`) with corpus
//! statistics computed over every stored chunk, so a filter narrows the
//! candidates without changing their scores.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::{cosine_similarity, terms};
use crate::error::StoreError;
use crate::filter::FilterPredicate;
use crate::models::DataChunk;

use super::{
    check_replacement, rank_candidates, reserved_fields, ChunkCandidate, ChunkRecord,
    StoreResult, StoreStats, VectorStore,
};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

struct Entry {
    record: ChunkRecord,
    vector: Option<Vec<f32>>,
    term_freqs: HashMap<String, usize>,
    length: usize,
}

impl Entry {
    fn new(chunk: &DataChunk, vector: Option<&[f32]>) -> Self {
        let mut term_freqs: HashMap<String, usize> = HashMap::new();
        let mut length = 0;
        for term in terms(&chunk.content) {
            *term_freqs.entry(term).or_default() += 1;
            length += 1;
        }
        Self {
            record: ChunkRecord::from_chunk(chunk, vector.is_some()),
            vector: vector.map(<[f32]>::to_vec),
            term_freqs,
            length,
        }
    }

    fn candidate(&self, raw_score: f64) -> ChunkCandidate {
        ChunkCandidate {
            chunk_id: self.record.chunk_id.clone(),
            content: self.record.content.clone(),
            metadata: self.record.metadata.clone(),
            raw_score,
        }
    }

    fn passes(&self, filter: Option<&FilterPredicate>) -> bool {
        filter.map_or(true, |f| f.matches(&self.record.metadata))
    }
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<String, Entry>>> {
        self.entries
            .read()
            .map_err(|_| StoreError::Connection("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<String, Entry>>> {
        self.entries
            .write()
            .map_err(|_| StoreError::Connection("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, chunk: &DataChunk, vector: Option<&[f32]>) -> StoreResult<()> {
        let entry = Entry::new(chunk, vector);
        self.write()?.insert(chunk.chunk_id.clone(), entry);
        Ok(())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filter: Option<&FilterPredicate>,
    ) -> StoreResult<Vec<ChunkCandidate>> {
        let entries = self.read()?;
        let candidates = entries
            .values()
            .filter(|e| e.passes(filter))
            .filter_map(|e| {
                let v = e.vector.as_ref()?;
                Some(e.candidate(cosine_similarity(query_vec, v) as f64))
            })
            .collect();
        Ok(rank_candidates(candidates, top_k))
    }

    async fn keyword_search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&FilterPredicate>,
    ) -> StoreResult<Vec<ChunkCandidate>> {
        let query_terms: Vec<String> = {
            let mut seen = HashSet::new();
            terms(query).filter(|t| seen.insert(t.clone())).collect()
        };
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.read()?;
        let n = entries.len() as f64;
        if n == 0.0 {
            return Ok(Vec::new());
        }
        let avg_len = entries.values().map(|e| e.length).sum::<usize>() as f64 / n;
        let idf: Vec<f64> = query_terms
            .iter()
            .map(|t| {
                let df = entries
                    .values()
                    .filter(|e| e.term_freqs.contains_key(t))
                    .count() as f64;
                (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
            })
            .collect();

        let candidates = entries
            .values()
            .filter(|e| e.passes(filter))
            .filter_map(|e| {
                let norm = 1.0 - BM25_B + BM25_B * e.length as f64 / avg_len.max(1.0);
                let mut score = 0.0;
                let mut hit = false;
                for (term, idf) in query_terms.iter().zip(&idf) {
                    if let Some(&tf) = e.term_freqs.get(term) {
                        let tf = tf as f64;
                        score += idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * norm);
                        hit = true;
                    }
                }
                hit.then(|| e.candidate(score))
            })
            .collect();
        Ok(rank_candidates(candidates, top_k))
    }

    async fn delete(&self, chunk_id: &str) -> StoreResult<bool> {
        Ok(self.write()?.remove(chunk_id).is_some())
    }

    async fn delete_parent(&self, parent_id: &str) -> StoreResult<usize> {
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|_, e| e.record.parent_id != parent_id);
        Ok(before - entries.len())
    }

    async fn replace_parent(
        &self,
        parent_id: &str,
        chunks: &[DataChunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> StoreResult<usize> {
        check_replacement(parent_id, chunks, vectors)?;
        let fresh: Vec<Entry> = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| Entry::new(c, vectors.map(|v| v[i].as_slice())))
            .collect();

        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|_, e| e.record.parent_id != parent_id);
        let removed = before - entries.len();
        for entry in fresh {
            entries.insert(entry.record.chunk_id.clone(), entry);
        }
        Ok(removed)
    }

    async fn get(&self, chunk_id: &str) -> StoreResult<Option<ChunkRecord>> {
        Ok(self.read()?.get(chunk_id).map(|e| e.record.clone()))
    }

    async fn indexed_fields(&self) -> StoreResult<BTreeSet<String>> {
        let mut fields = reserved_fields();
        for e in self.read()?.values() {
            fields.extend(e.record.metadata.keys().cloned());
        }
        Ok(fields)
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let entries = self.read()?;
        let parents: HashSet<&str> = entries
            .values()
            .map(|e| e.record.parent_id.as_str())
            .collect();
        Ok(StoreStats {
            chunks: entries.len(),
            vectors: entries.values().filter(|e| e.vector.is_some()).count(),
            parents: parents.len(),
        })
    }

    async fn clear(&self) -> StoreResult<()> {
        self.write()?.clear();
        Ok(())
    }
}
