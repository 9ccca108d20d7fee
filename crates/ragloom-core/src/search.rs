//! Similarity, keyword and hybrid retrieval over a [`VectorStore`].
//!
//! The [`Retriever`] is a thin, stateless layer: it validates arguments
//! before any I/O, embeds the query through the injected [`Embedder`],
//! asks the store for candidates, puts every score on a common `[0, 1]`
//! scale and ranks. Store and embedder failures propagate unchanged as
//! [`Error::Retrieval`] / [`Error::Embedding`]; nothing is retried here.
//!
//! # Scores
//!
//! - Vector: cosine similarity clamped to `[0, 1]`.
//! - Keyword: BM25 relevance is unbounded, so it is rescaled per query
//!   with [`KeywordNormalization`] (min-max by default, where a single
//!   candidate or all-equal scores map to `1.0`).
//! - Hybrid: `alpha × vector + (1 − alpha) × keyword`, with `0` for a
//!   side on which the chunk did not appear. A side whose weight is zero
//!   is not queried at all.
//!
//! Every list is sorted by descending score, ties by ascending
//! `chunk_id`, and carries 1-based ranks.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::filter::FilterPredicate;
use crate::models::{ResultSource, ScoreBreakdown, SearchResult};
use crate::store::{ChunkCandidate, StoreStats, VectorStore};

pub const DEFAULT_HYBRID_ALPHA: f64 = 0.6;
pub const DEFAULT_CANDIDATE_POOL_FACTOR: usize = 3;
pub const DEFAULT_LOGISTIC_MIDPOINT: f64 = 3.0;
pub const DEFAULT_LOGISTIC_SCALE: f64 = 1.5;

/// Which search to run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchType {
    Similar,
    Keyword,
    Hybrid { alpha: f64 },
}

impl SearchType {
    /// Parse a mode name (`similar`, `keyword`, `hybrid`); `alpha` is used
    /// for hybrid.
    pub fn parse(mode: &str, alpha: f64) -> Result<Self> {
        match mode {
            "similar" | "semantic" | "vector" => Ok(SearchType::Similar),
            "keyword" => Ok(SearchType::Keyword),
            "hybrid" => Ok(SearchType::Hybrid { alpha }),
            other => Err(Error::InvalidArgument(format!(
                "unknown search mode '{}', use similar, keyword or hybrid",
                other
            ))),
        }
    }

    fn needs_vector(&self) -> bool {
        match self {
            SearchType::Similar => true,
            SearchType::Keyword => false,
            SearchType::Hybrid { alpha } => *alpha > 0.0,
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchType::Similar => write!(f, "similar"),
            SearchType::Keyword => write!(f, "keyword"),
            SearchType::Hybrid { alpha } => write!(f, "hybrid(alpha={})", alpha),
        }
    }
}

/// How raw BM25 scores are mapped into `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum KeywordNormalization {
    /// `(s − min) / (max − min)` over the query's candidate pool.
    MinMax,
    /// `1 / (1 + e^(−(s − midpoint) / scale))`, independent of other
    /// candidates.
    Logistic { midpoint: f64, scale: f64 },
}

impl Default for KeywordNormalization {
    fn default() -> Self {
        KeywordNormalization::MinMax
    }
}

impl FromStr for KeywordNormalization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "min_max" | "minmax" => Ok(KeywordNormalization::MinMax),
            "logistic" => Ok(KeywordNormalization::Logistic {
                midpoint: DEFAULT_LOGISTIC_MIDPOINT,
                scale: DEFAULT_LOGISTIC_SCALE,
            }),
            other => Err(Error::Configuration(format!(
                "unknown keyword normalization '{}', use min_max or logistic",
                other
            ))),
        }
    }
}

/// Retrieval tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverConfig {
    /// Each side of a search fetches `top_k × candidate_pool_factor`
    /// candidates before ranking.
    pub candidate_pool_factor: usize,
    /// Results scoring below this are dropped.
    pub score_threshold: f64,
    pub keyword_normalization: KeywordNormalization,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            candidate_pool_factor: DEFAULT_CANDIDATE_POOL_FACTOR,
            score_threshold: 0.0,
            keyword_normalization: KeywordNormalization::MinMax,
        }
    }
}

/// Store counts plus the embedder in use.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrieverStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub embedding_model: String,
    pub embedding_dims: usize,
}

/// A candidate with its score on the `[0, 1]` scale.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: ChunkCandidate,
    pub score: f64,
}

/// Executes searches against an injected store and embedder.
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self::with_config(store, embedder, RetrieverConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Nearest-neighbor search by cosine similarity.
    pub async fn search_similar(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&FilterPredicate>,
    ) -> Result<Vec<SearchResult>> {
        self.search(query, SearchType::Similar, top_k, filter).await
    }

    /// BM25 search with per-query score normalization.
    pub async fn search_keyword(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&FilterPredicate>,
    ) -> Result<Vec<SearchResult>> {
        self.search(query, SearchType::Keyword, top_k, filter).await
    }

    /// Relative-score fusion of vector and keyword search.
    ///
    /// Fails with [`Error::InvalidArgument`] before any I/O if `alpha` is
    /// outside `[0, 1]`.
    pub async fn search_hybrid(
        &self,
        query: &str,
        alpha: f64,
        top_k: usize,
        filter: Option<&FilterPredicate>,
    ) -> Result<Vec<SearchResult>> {
        self.search(query, SearchType::Hybrid { alpha }, top_k, filter)
            .await
    }

    /// Run `search_type` restricted by `filter`.
    ///
    /// Fails with [`Error::InvalidFilter`] naming the first referenced
    /// field the store does not index.
    pub async fn search_with_filter(
        &self,
        query: &str,
        filter: &FilterPredicate,
        search_type: SearchType,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        self.search(query, search_type, top_k, Some(filter)).await
    }

    /// Run one search per query with a single embedding call.
    ///
    /// Searches run concurrently; the output is in input order and each
    /// list equals what the single-query method returns.
    pub async fn search_batch(
        &self,
        queries: &[String],
        top_k: usize,
        search_type: SearchType,
    ) -> Result<Vec<Vec<SearchResult>>> {
        validate(search_type, top_k)?;
        let prepared = queries
            .iter()
            .map(|q| prepare_query(q))
            .collect::<Result<Vec<_>>>()?;

        let vectors: Vec<Option<Vec<f32>>> = if search_type.needs_vector() && !prepared.is_empty()
        {
            let batch = self.embedder.embed_batch(&prepared).await?;
            if batch.len() != prepared.len() {
                return Err(crate::error::EmbedError::Response(format!(
                    "{} queries but {} vectors",
                    prepared.len(),
                    batch.len()
                ))
                .into());
            }
            batch.into_iter().map(Some).collect()
        } else {
            vec![None; prepared.len()]
        };

        debug!(queries = prepared.len(), %search_type, "batch search");
        try_join_all(
            prepared
                .iter()
                .zip(vectors.iter())
                .map(|(q, v)| self.execute(q, v.as_deref(), search_type, top_k, None)),
        )
        .await
    }

    /// Store counts and embedder identity.
    pub async fn stats(&self) -> Result<RetrieverStats> {
        Ok(RetrieverStats {
            store: self.store.stats().await?,
            embedding_model: self.embedder.model_name().to_string(),
            embedding_dims: self.embedder.dims(),
        })
    }

    /// Single entry point behind every public search method.
    pub async fn search(
        &self,
        query: &str,
        search_type: SearchType,
        top_k: usize,
        filter: Option<&FilterPredicate>,
    ) -> Result<Vec<SearchResult>> {
        validate(search_type, top_k)?;
        let query = prepare_query(query)?;
        if let Some(filter) = filter {
            self.check_filter(filter).await?;
        }
        let vector = if search_type.needs_vector() {
            Some(self.embedder.embed(&query).await?)
        } else {
            None
        };
        self.execute(&query, vector.as_deref(), search_type, top_k, filter)
            .await
    }

    async fn check_filter(&self, filter: &FilterPredicate) -> Result<()> {
        let indexed = self.store.indexed_fields().await?;
        match filter.fields().into_iter().find(|f| !indexed.contains(*f)) {
            Some(field) => Err(Error::InvalidFilter {
                field: field.to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn execute(
        &self,
        query: &str,
        vector: Option<&[f32]>,
        search_type: SearchType,
        top_k: usize,
        filter: Option<&FilterPredicate>,
    ) -> Result<Vec<SearchResult>> {
        let pool = top_k.saturating_mul(self.config.candidate_pool_factor.max(1));
        let (alpha, source) = match search_type {
            SearchType::Similar => (1.0, ResultSource::Vector),
            SearchType::Keyword => (0.0, ResultSource::Keyword),
            SearchType::Hybrid { alpha } => (alpha, ResultSource::Hybrid),
        };

        let vector_side = async {
            match vector {
                Some(v) if alpha > 0.0 => self.store.vector_search(v, pool, filter).await,
                _ => Ok(Vec::new()),
            }
        };
        let keyword_side = async {
            if alpha < 1.0 {
                self.store
                    .keyword_search(&query.to_lowercase(), pool, filter)
                    .await
            } else {
                Ok(Vec::new())
            }
        };
        let (vector_hits, keyword_hits) = futures::try_join!(vector_side, keyword_side)?;
        debug!(
            %search_type,
            vector_candidates = vector_hits.len(),
            keyword_candidates = keyword_hits.len(),
            "retrieved candidates"
        );

        let vector_scored = score_vector(vector_hits);
        let keyword_scored = normalize_scores(keyword_hits, self.config.keyword_normalization);

        let results = match source {
            ResultSource::Vector => to_results(vector_scored, source, |s| ScoreBreakdown {
                vector: Some(s),
                ..Default::default()
            }),
            ResultSource::Keyword => to_results(keyword_scored, source, |s| ScoreBreakdown {
                keyword: Some(s),
                ..Default::default()
            }),
            ResultSource::Hybrid => fuse_scores(&vector_scored, &keyword_scored, alpha),
        };
        Ok(finish(results, top_k, self.config.score_threshold))
    }
}

fn validate(search_type: SearchType, top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(Error::InvalidArgument("top_k must be at least 1".to_string()));
    }
    if let SearchType::Hybrid { alpha } = search_type {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(Error::InvalidArgument(format!(
                "alpha must be within [0, 1], got {}",
                alpha
            )));
        }
    }
    Ok(())
}

/// Collapse runs of whitespace; reject blank queries.
fn prepare_query(query: &str) -> Result<String> {
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Err(Error::InvalidInput("query must not be empty".to_string()));
    }
    Ok(collapsed)
}

/// Keep the best raw score per chunk id.
fn dedupe(candidates: Vec<ChunkCandidate>) -> Vec<ChunkCandidate> {
    let mut best: BTreeMap<String, ChunkCandidate> = BTreeMap::new();
    for c in candidates {
        match best.get(&c.chunk_id) {
            Some(existing) if existing.raw_score >= c.raw_score => {}
            _ => {
                best.insert(c.chunk_id.clone(), c);
            }
        }
    }
    best.into_values().collect()
}

fn score_vector(candidates: Vec<ChunkCandidate>) -> Vec<ScoredCandidate> {
    dedupe(candidates)
        .into_iter()
        .map(|c| {
            let score = c.raw_score.clamp(0.0, 1.0);
            ScoredCandidate {
                candidate: c,
                score,
            }
        })
        .collect()
}

/// Map raw keyword scores into `[0, 1]`.
///
/// With min-max, all-equal scores (including a single candidate)
/// normalize to `1.0`.
pub fn normalize_scores(
    candidates: Vec<ChunkCandidate>,
    method: KeywordNormalization,
) -> Vec<ScoredCandidate> {
    let candidates = dedupe(candidates);
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .into_iter()
        .map(|c| {
            let score = match method {
                KeywordNormalization::MinMax => {
                    if (s_max - s_min).abs() < f64::EPSILON {
                        1.0
                    } else {
                        (c.raw_score - s_min) / (s_max - s_min)
                    }
                }
                KeywordNormalization::Logistic { midpoint, scale } => {
                    1.0 / (1.0 + (-(c.raw_score - midpoint) / scale.max(f64::EPSILON)).exp())
                }
            };
            ScoredCandidate {
                candidate: c,
                score,
            }
        })
        .collect()
}

/// Fuse normalized vector and keyword scores as
/// `alpha × vector + (1 − alpha) × keyword`, using `0` for a missing side.
pub fn fuse_scores(
    vector: &[ScoredCandidate],
    keyword: &[ScoredCandidate],
    alpha: f64,
) -> Vec<SearchResult> {
    let vec_map: HashMap<&str, &ScoredCandidate> = vector
        .iter()
        .map(|s| (s.candidate.chunk_id.as_str(), s))
        .collect();
    let kw_map: HashMap<&str, &ScoredCandidate> = keyword
        .iter()
        .map(|s| (s.candidate.chunk_id.as_str(), s))
        .collect();

    let mut all: BTreeMap<&str, &ChunkCandidate> = BTreeMap::new();
    for s in keyword.iter().chain(vector.iter()) {
        all.entry(s.candidate.chunk_id.as_str())
            .or_insert(&s.candidate);
    }

    all.into_iter()
        .map(|(id, cand)| {
            let v = vec_map.get(id).map(|s| s.score);
            let k = kw_map.get(id).map(|s| s.score);
            let fused = alpha * v.unwrap_or(0.0) + (1.0 - alpha) * k.unwrap_or(0.0);
            SearchResult {
                chunk_id: cand.chunk_id.clone(),
                content: cand.content.clone(),
                metadata: cand.metadata.clone(),
                similarity_score: fused,
                rank: 0,
                source: ResultSource::Hybrid,
                scores: ScoreBreakdown {
                    vector: v,
                    keyword: k,
                    alpha: Some(alpha),
                },
            }
        })
        .collect()
}

fn to_results(
    scored: Vec<ScoredCandidate>,
    source: ResultSource,
    breakdown: impl Fn(f64) -> ScoreBreakdown,
) -> Vec<SearchResult> {
    scored
        .into_iter()
        .map(|s| SearchResult {
            chunk_id: s.candidate.chunk_id,
            content: s.candidate.content,
            metadata: s.candidate.metadata,
            similarity_score: s.score,
            rank: 0,
            source,
            scores: breakdown(s.score),
        })
        .collect()
}

/// Sort, threshold, truncate and assign 1-based ranks.
fn finish(mut results: Vec<SearchResult>, top_k: usize, threshold: f64) -> Vec<SearchResult> {
    results.retain(|r| r.similarity_score >= threshold);
    results.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(top_k);
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::DataChunker;
    use crate::context::ChunkingContextBuilder;
    use crate::embedding::HashingEmbedder;
    use crate::error::{EmbedError, StoreError};
    use crate::filter::FilterBuilder;
    use crate::models::DataChunk;
    use crate::store::{ChunkRecord, InMemoryStore, StoreResult};
    use async_trait::async_trait;
    use serde_json::Map;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn candidate(id: &str, raw: f64) -> ChunkCandidate {
        ChunkCandidate {
            chunk_id: id.to_string(),
            content: format!("content of {}", id),
            metadata: Map::new(),
            raw_score: raw,
        }
    }

    fn scored(id: &str, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            candidate: candidate(id, score),
            score,
        }
    }

    #[test]
    fn test_fusion_keeps_single_signal_matches() {
        let fused = finish(
            fuse_scores(&[scored("x", 0.9)], &[scored("y", 0.8)], 0.5),
            10,
            0.0,
        );
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].chunk_id, "x");
        assert!((fused[0].similarity_score - 0.45).abs() < 1e-9);
        assert_eq!(fused[1].chunk_id, "y");
        assert!((fused[1].similarity_score - 0.40).abs() < 1e-9);
        assert_eq!(fused[0].scores.keyword, None);
        assert_eq!(fused[1].rank, 2);
    }

    #[test]
    fn test_min_max_normalization() {
        let out = normalize_scores(
            vec![candidate("a", 2.0), candidate("b", 6.0), candidate("c", 4.0)],
            KeywordNormalization::MinMax,
        );
        let by_id: HashMap<_, _> = out
            .iter()
            .map(|s| (s.candidate.chunk_id.as_str(), s.score))
            .collect();
        assert_eq!(by_id["a"], 0.0);
        assert_eq!(by_id["b"], 1.0);
        assert!((by_id["c"] - 0.5).abs() < 1e-9);

        let single = normalize_scores(vec![candidate("a", 7.3)], KeywordNormalization::MinMax);
        assert_eq!(single[0].score, 1.0);
    }

    #[test]
    fn test_logistic_normalization_is_bounded() {
        let method = KeywordNormalization::Logistic {
            midpoint: 3.0,
            scale: 1.5,
        };
        let out = normalize_scores(vec![candidate("a", 3.0), candidate("b", 40.0)], method);
        assert!((out[0].score - 0.5).abs() < 1e-9);
        assert!(out[1].score <= 1.0 && out[1].score > 0.99);
    }

    #[test]
    fn test_dedupe_keeps_best_score() {
        let out = dedupe(vec![candidate("a", 0.2), candidate("a", 0.7), candidate("b", 0.1)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].raw_score, 0.7);
    }

    #[test]
    fn test_ties_break_by_chunk_id() {
        let results = finish(
            fuse_scores(&[scored("b", 0.5), scored("a", 0.5)], &[], 1.0),
            10,
            0.0,
        );
        assert_eq!(results[0].chunk_id, "a");
        assert_eq!(results[0].rank, 1);
    }

    #[test]
    fn test_parse_search_type() {
        assert_eq!(SearchType::parse("keyword", 0.5).unwrap(), SearchType::Keyword);
        assert_eq!(
            SearchType::parse("hybrid", 0.3).unwrap(),
            SearchType::Hybrid { alpha: 0.3 }
        );
        assert!(matches!(
            SearchType::parse("fuzzy", 0.5),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(
            "logistic".parse::<KeywordNormalization>().unwrap(),
            KeywordNormalization::Logistic {
                midpoint: DEFAULT_LOGISTIC_MIDPOINT,
                scale: DEFAULT_LOGISTIC_SCALE
            }
        );
    }

    /// Store that counts calls and can be told to fail.
    #[derive(Default)]
    struct RecordingStore {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl VectorStore for RecordingStore {
        async fn upsert(&self, _: &DataChunk, _: Option<&[f32]>) -> StoreResult<()> {
            Ok(())
        }
        async fn vector_search(
            &self,
            _: &[f32],
            _: usize,
            _: Option<&FilterPredicate>,
        ) -> StoreResult<Vec<ChunkCandidate>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if self.fail {
                return Err(StoreError::Query("connection reset".to_string()));
            }
            Ok(vec![candidate("v", 0.9)])
        }
        async fn keyword_search(
            &self,
            _: &str,
            _: usize,
            _: Option<&FilterPredicate>,
        ) -> StoreResult<Vec<ChunkCandidate>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if self.fail {
                return Err(StoreError::Query("connection reset".to_string()));
            }
            Ok(vec![candidate("k", 12.0)])
        }
        async fn delete(&self, _: &str) -> StoreResult<bool> {
            Ok(false)
        }
        async fn delete_parent(&self, _: &str) -> StoreResult<usize> {
            Ok(0)
        }
        async fn get(&self, _: &str) -> StoreResult<Option<ChunkRecord>> {
            Ok(None)
        }
        async fn indexed_fields(&self) -> StoreResult<BTreeSet<String>> {
            Ok(crate::store::reserved_fields())
        }
        async fn stats(&self) -> StoreResult<StoreStats> {
            Ok(StoreStats::default())
        }
        async fn clear(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    fn recording(fail: bool) -> (Arc<RecordingStore>, Retriever) {
        let store = Arc::new(RecordingStore {
            calls: AtomicUsize::new(0),
            fail,
        });
        let retriever = Retriever::new(store.clone(), Arc::new(HashingEmbedder::new(16)));
        (store, retriever)
    }

    #[tokio::test]
    async fn test_bad_arguments_fail_before_io() {
        let (store, retriever) = recording(false);
        for alpha in [-0.1, 1.5, f64::NAN] {
            let err = retriever.search_hybrid("q", alpha, 5, None).await.unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
        let err = retriever.search_similar("q", 0, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = retriever.search_keyword("   ", 3, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(store.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_weight_side_is_not_queried() {
        let (store, retriever) = recording(false);
        let results = retriever.search_hybrid("q", 1.0, 5, None).await.unwrap();
        assert_eq!(store.calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "v");

        let results = retriever.search_hybrid("q", 0.0, 5, None).await.unwrap();
        assert_eq!(store.calls.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(results[0].chunk_id, "k");
        assert_eq!(results[0].similarity_score, 1.0);
    }

    #[tokio::test]
    async fn test_store_failure_is_retrieval_error() {
        let (_, retriever) = recording(true);
        let err = retriever.search_keyword("q", 5, None).await.unwrap_err();
        assert!(matches!(err, Error::Retrieval(StoreError::Query(_))));
    }

    #[tokio::test]
    async fn test_unindexed_filter_field_is_named() {
        let (_, retriever) = recording(false);
        let filter = FilterBuilder::and(vec![
            FilterBuilder::equals("type", "paragraph"),
            FilterBuilder::equals("publisher", "springer"),
        ])
        .unwrap()
        .build()
        .unwrap();
        let err = retriever
            .search_with_filter("q", &filter, SearchType::Keyword, 5)
            .await
            .unwrap_err();
        match err {
            Error::InvalidFilter { field } => assert_eq!(field, "publisher"),
            other => panic!("unexpected error: {other}"),
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed_batch(&self, _: &[String]) -> crate::embedding::EmbedResult<Vec<Vec<f32>>> {
            Err(EmbedError::Request("timeout".to_string()))
        }
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let retriever = Retriever::new(Arc::new(InMemoryStore::new()), Arc::new(FailingEmbedder));
        let err = retriever.search_similar("q", 3, None).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(EmbedError::Request(_))));
        // keyword search never touches the embedder
        assert!(retriever.search_keyword("q", 3, None).await.unwrap().is_empty());
    }

    async fn seeded() -> Retriever {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(HashingEmbedder::new(128));
        let chunker = DataChunker::new();
        let docs = [
            ("budget", "The quarterly budget review moved to Friday afternoon."),
            ("lattice", "Lattice reduction algorithms and the LLL basis."),
            ("wavelet", "Wavelet transforms for signal denoising."),
            ("meeting", "Friday meeting notes: budget, hiring, roadmap."),
        ];
        for (parent, text) in docs {
            let ctx = ChunkingContextBuilder::for_text()
                .with_parent_id(parent)
                .build()
                .unwrap();
            let chunks = chunker.chunk(text, &ctx).unwrap();
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await.unwrap();
            store.upsert_batch(&chunks, Some(&vectors)).await.unwrap();
        }
        Retriever::new(store, embedder)
    }

    fn ids(results: &[SearchResult]) -> Vec<String> {
        results.iter().map(|r| r.chunk_id.clone()).collect()
    }

    #[tokio::test]
    async fn test_hybrid_extremes_match_single_signal_rankings() {
        let retriever = seeded().await;
        let q = "budget friday";
        let similar = retriever.search_similar(q, 3, None).await.unwrap();
        let hybrid_v = retriever.search_hybrid(q, 1.0, 3, None).await.unwrap();
        assert_eq!(ids(&similar), ids(&hybrid_v));

        let keyword = retriever.search_keyword(q, 3, None).await.unwrap();
        let hybrid_k = retriever.search_hybrid(q, 0.0, 3, None).await.unwrap();
        assert_eq!(ids(&keyword), ids(&hybrid_k));
        assert!(keyword
            .iter()
            .all(|r| (0.0..=1.0).contains(&r.similarity_score)));
    }

    #[tokio::test]
    async fn test_batch_matches_individual_searches() {
        let retriever = seeded().await;
        let queries = vec![
            "lattice basis".to_string(),
            "signal wavelet".to_string(),
            "budget".to_string(),
        ];
        let batch = retriever
            .search_batch(&queries, 2, SearchType::Similar)
            .await
            .unwrap();
        assert_eq!(batch.len(), 3);
        for (q, got) in queries.iter().zip(&batch) {
            let single = retriever.search_similar(q, 2, None).await.unwrap();
            assert_eq!(&single, got);
        }
    }

    #[tokio::test]
    async fn test_filter_and_threshold() {
        let retriever = seeded().await;
        let filter = FilterBuilder::equals("parent_id", "meeting").build().unwrap();
        let results = retriever
            .search_with_filter("budget", &filter, SearchType::Keyword, 5)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata["parent_id"], "meeting");

        let strict = Retriever::with_config(
            Arc::new(InMemoryStore::new()),
            Arc::new(HashingEmbedder::new(8)),
            RetrieverConfig {
                score_threshold: 0.99,
                ..Default::default()
            },
        );
        assert!(strict.search_similar("anything", 3, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_reports_embedder() {
        let retriever = seeded().await;
        let stats = retriever.stats().await.unwrap();
        assert_eq!(stats.store.chunks, 4);
        assert_eq!(stats.embedding_model, HashingEmbedder::MODEL_NAME);
        assert_eq!(stats.embedding_dims, 128);
    }
}
