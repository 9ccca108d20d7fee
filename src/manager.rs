//! Knowledge base orchestration.
//!
//! [`KnowledgeBaseManager`] ties the core pieces together: documents and
//! emails are chunked synchronously, then the embed + store step for each
//! parent runs concurrently on a [`JoinSet`] bounded by a [`Semaphore`].
//! Within a parent, chunks are embedded in `batch_size` batches first and
//! then handed to [`VectorStore::replace_parent`] in one call, so
//! re-processing a parent swaps its chunks atomically and a failed store
//! leaves the previous version searchable.
//!
//! Embedding failures are non-fatal: the parent is stored without vectors
//! (keyword search still finds it) and its chunks are counted as pending.
//!
//! Cancellation is cooperative through a [`CancellationFlag`], checked
//! before each parent is dispatched. Parents already running complete.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use ragloom_core::chunk::DataChunker;
use ragloom_core::context::{
    ChunkingContextBuilder, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
    DEFAULT_EMAIL_CHUNK_OVERLAP, DEFAULT_EMAIL_CHUNK_SIZE,
};
use ragloom_core::document::TextFormat;
use ragloom_core::email::{
    EmailPreprocessor, SignatureDetector, DEFAULT_MAX_SIGNATURE_LINES,
    DEFAULT_SIGNATURE_DELIMITERS,
};
use ragloom_core::embedding::Embedder;
use ragloom_core::filter::FilterPredicate;
use ragloom_core::models::{DataChunk, EmailMessage, SearchResult};
use ragloom_core::search::{Retriever, RetrieverConfig, SearchType};
use ragloom_core::store::{ChunkRecord, StoreStats, VectorStore};
use ragloom_core::tokenizer::{HeuristicTokenizer, Tokenizer};

use crate::config::Config;
use crate::tokenizer::build_tokenizer;

/// Shared cancellation signal for batch ingestion.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Tuning for a [`KnowledgeBaseManager`].
#[derive(Clone)]
pub struct ManagerSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub email_chunk_size: usize,
    pub email_chunk_overlap: usize,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub signature_delimiters: Vec<String>,
    pub max_signature_lines: usize,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Parents embedded and stored at the same time.
    pub concurrency: usize,
    /// Compute vectors at ingest time.
    pub embed: bool,
    pub default_top_k: usize,
    pub hybrid_alpha: f64,
    pub retriever: RetrieverConfig,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            email_chunk_size: DEFAULT_EMAIL_CHUNK_SIZE,
            email_chunk_overlap: DEFAULT_EMAIL_CHUNK_OVERLAP,
            tokenizer: Arc::new(HeuristicTokenizer::default()),
            signature_delimiters: DEFAULT_SIGNATURE_DELIMITERS
                .iter()
                .map(|d| d.to_string())
                .collect(),
            max_signature_lines: DEFAULT_MAX_SIGNATURE_LINES,
            batch_size: 64,
            concurrency: 4,
            embed: true,
            default_top_k: 10,
            hybrid_alpha: ragloom_core::search::DEFAULT_HYBRID_ALPHA,
            retriever: RetrieverConfig::default(),
        }
    }
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            email_chunk_size: config.chunking.email_chunk_size,
            email_chunk_overlap: config.chunking.email_chunk_overlap,
            tokenizer: build_tokenizer(&config.chunking)?,
            signature_delimiters: config.email.signature_delimiters.clone(),
            max_signature_lines: config.email.max_signature_lines,
            batch_size: config.embedding.batch_size.max(1),
            concurrency: config.ingest.concurrency.max(1),
            embed: config.embedding.is_enabled(),
            default_top_k: config.retrieval.top_k,
            hybrid_alpha: config.retrieval.hybrid_alpha,
            retriever: config.retrieval.retriever_config()?,
        })
    }
}

/// A document to ingest.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub text: String,
    /// Display name, usually the file path.
    pub source: String,
    pub format: TextFormat,
    /// Defaults to `source`.
    pub parent_id: Option<String>,
    /// Registered strategy key; defaults to `document`.
    pub strategy: Option<String>,
    pub created_at: Option<String>,
    pub metadata: Map<String, Value>,
}

impl DocumentInput {
    pub fn new(source: impl Into<String>, text: impl Into<String>, format: TextFormat) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            format,
            parent_id: None,
            strategy: None,
            created_at: None,
            metadata: Map::new(),
        }
    }
}

/// Outcome of storing one parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoredParent {
    pub parent_id: String,
    pub chunks: usize,
    pub embedded: usize,
    /// Chunks stored without a vector because embedding failed.
    pub pending: usize,
}

/// Outcome of a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub parents: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub pending: usize,
    /// `(source, error)` for parents that failed.
    pub failed: Vec<(String, String)>,
    /// Parents skipped after cancellation.
    pub cancelled: usize,
}

impl IngestSummary {
    fn absorb(&mut self, stored: StoredParent) {
        self.parents += 1;
        self.chunks += stored.chunks;
        self.embedded += stored.embedded;
        self.pending += stored.pending;
    }
}

/// Search results plus aggregate facts about them.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub search_type: String,
    pub results: Vec<SearchResult>,
    /// Distinct `source_document` values, in rank order.
    pub sources: Vec<String>,
    /// Distinct chunk types, sorted.
    pub chunk_types: Vec<String>,
    pub avg_similarity: f64,
    pub max_similarity: f64,
}

impl QueryResponse {
    fn new(query: &str, search_type: SearchType, results: Vec<SearchResult>) -> Self {
        let mut sources: Vec<String> = Vec::new();
        let mut chunk_types = BTreeSet::new();
        for r in &results {
            if let Some(src) = r.metadata.get("source_document").and_then(Value::as_str) {
                if !sources.iter().any(|s| s == src) {
                    sources.push(src.to_string());
                }
            }
            if let Some(t) = r.metadata.get("type").and_then(Value::as_str) {
                chunk_types.insert(t.to_string());
            }
        }
        let max_similarity = results
            .iter()
            .map(|r| r.similarity_score)
            .fold(0.0, f64::max);
        let avg_similarity = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.similarity_score).sum::<f64>() / results.len() as f64
        };
        Self {
            query: query.to_string(),
            search_type: search_type.to_string(),
            results,
            sources,
            chunk_types: chunk_types.into_iter().collect(),
            avg_similarity,
            max_similarity,
        }
    }
}

/// Store counts, embedder identity and registered strategies.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBaseStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub tokenizer: String,
    pub strategies: Vec<String>,
}

/// Chunk, embed, store and search.
pub struct KnowledgeBaseManager {
    chunker: Arc<DataChunker>,
    preprocessor: EmailPreprocessor,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    retriever: Retriever,
    settings: ManagerSettings,
    cancel: CancellationFlag,
}

impl KnowledgeBaseManager {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        settings: ManagerSettings,
    ) -> Self {
        Self::with_chunker(Arc::new(DataChunker::new()), store, embedder, settings)
    }

    /// Use a custom strategy registry.
    pub fn with_chunker(
        chunker: Arc<DataChunker>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        settings: ManagerSettings,
    ) -> Self {
        let preprocessor = EmailPreprocessor::new(chunker.clone())
            .with_detector(SignatureDetector::new(
                settings.signature_delimiters.as_slice(),
                settings.max_signature_lines,
            ))
            .with_body_window(settings.email_chunk_size, settings.email_chunk_overlap)
            .with_tokenizer(settings.tokenizer.clone());
        let retriever =
            Retriever::with_config(store.clone(), embedder.clone(), settings.retriever.clone());
        Self {
            chunker,
            preprocessor,
            store,
            embedder,
            retriever,
            settings,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Handle for cancelling an in-flight batch.
    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Chunk a document without storing it.
    pub fn chunk_document(&self, doc: &DocumentInput) -> Result<Vec<DataChunk>> {
        let parent_id = doc.parent_id.clone().unwrap_or_else(|| doc.source.clone());
        let mut builder = ChunkingContextBuilder::for_document()
            .with_chunk_size(self.settings.chunk_size)
            .with_overlap(self.settings.chunk_overlap)
            .with_format(doc.format)
            .with_parent_id(parent_id)
            .with_source(doc.source.clone())
            .with_tokenizer(self.settings.tokenizer.clone());
        if let Some(key) = &doc.strategy {
            builder = builder.with_strategy(key.clone());
        }
        if let Some(created) = &doc.created_at {
            builder = builder.with_created_at(created.clone());
        }
        for (k, v) in &doc.metadata {
            builder = builder.with_metadata(k.clone(), v.clone());
        }
        let ctx = builder.build()?;
        let chunks = self
            .chunker
            .chunk(&doc.text, &ctx)
            .with_context(|| format!("Failed to chunk {}", doc.source))?;
        Ok(chunks)
    }

    /// Chunk an email without storing it.
    pub fn chunk_email(&self, email: &EmailMessage) -> Result<Vec<DataChunk>> {
        Ok(self.preprocessor.preprocess_email(email, 0)?)
    }

    pub async fn process_document(&self, doc: &DocumentInput) -> Result<StoredParent> {
        let chunks = self.chunk_document(doc)?;
        self.store_parent(chunks).await
    }

    pub async fn process_email(&self, email: &EmailMessage) -> Result<StoredParent> {
        let chunks = self.chunk_email(email)?;
        self.store_parent(chunks).await
    }

    /// Ingest many documents with bounded concurrency.
    ///
    /// A document that fails to chunk or store is recorded in
    /// [`IngestSummary::failed`]; the others proceed.
    pub async fn process_documents(&self, docs: &[DocumentInput]) -> Result<IngestSummary> {
        let jobs = docs
            .iter()
            .map(|d| (d.source.clone(), self.chunk_document(d)));
        self.run_batch(jobs).await
    }

    /// Ingest many emails with bounded concurrency.
    pub async fn process_emails(&self, emails: &[EmailMessage]) -> Result<IngestSummary> {
        let jobs = emails.iter().map(|e| {
            let label = e
                .message_id
                .clone()
                .or_else(|| e.subject.clone())
                .unwrap_or_else(|| "(email)".to_string());
            (label, self.chunk_email(e))
        });
        self.run_batch(jobs).await
    }

    async fn run_batch(
        &self,
        jobs: impl Iterator<Item = (String, Result<Vec<DataChunk>>)>,
    ) -> Result<IngestSummary> {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut set: JoinSet<(String, Result<StoredParent>)> = JoinSet::new();
        let mut summary = IngestSummary::default();

        for (label, chunked) in jobs {
            if self.cancel.is_cancelled() {
                summary.cancelled += 1;
                continue;
            }
            let chunks = match chunked {
                Ok(c) => c,
                Err(e) => {
                    warn!(source = %label, error = %e, "skipping parent");
                    summary.failed.push((label, format!("{:#}", e)));
                    continue;
                }
            };
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("ingest semaphore closed")?;
            let store = self.store.clone();
            let embedder = self.embedder.clone();
            let batch_size = self.settings.batch_size;
            let embed = self.settings.embed;
            set.spawn(async move {
                let result = store_chunks(store, embedder, chunks, batch_size, embed).await;
                drop(permit);
                (label, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            let (label, result) = joined.context("ingest task panicked")?;
            match result {
                Ok(stored) => summary.absorb(stored),
                Err(e) => {
                    warn!(source = %label, error = %e, "failed to store parent");
                    summary.failed.push((label, format!("{:#}", e)));
                }
            }
        }

        if summary.cancelled > 0 {
            info!(skipped = summary.cancelled, "ingest cancelled");
        }
        info!(
            parents = summary.parents,
            chunks = summary.chunks,
            embedded = summary.embedded,
            "ingest complete"
        );
        Ok(summary)
    }

    async fn store_parent(&self, chunks: Vec<DataChunk>) -> Result<StoredParent> {
        store_chunks(
            self.store.clone(),
            self.embedder.clone(),
            chunks,
            self.settings.batch_size,
            self.settings.embed,
        )
        .await
    }

    pub async fn search(
        &self,
        query: &str,
        search_type: SearchType,
        top_k: usize,
        filter: Option<&FilterPredicate>,
    ) -> Result<Vec<SearchResult>> {
        Ok(self
            .retriever
            .search(query, search_type, top_k, filter)
            .await?)
    }

    /// Search and summarize the results.
    pub async fn query(
        &self,
        query: &str,
        search_type: SearchType,
        top_k: Option<usize>,
        filter: Option<&FilterPredicate>,
    ) -> Result<QueryResponse> {
        let top_k = top_k.unwrap_or(self.settings.default_top_k);
        let results = self.search(query, search_type, top_k, filter).await?;
        Ok(QueryResponse::new(query, search_type, results))
    }

    pub async fn get_chunk(&self, chunk_id: &str) -> Result<Option<ChunkRecord>> {
        Ok(self.store.get(chunk_id).await?)
    }

    pub async fn delete_chunk(&self, chunk_id: &str) -> Result<bool> {
        Ok(self.store.delete(chunk_id).await?)
    }

    pub async fn stats(&self) -> Result<KnowledgeBaseStats> {
        let stats = self.retriever.stats().await?;
        Ok(KnowledgeBaseStats {
            store: stats.store,
            embedding_model: stats.embedding_model,
            embedding_dims: stats.embedding_dims,
            tokenizer: self.settings.tokenizer.name().to_string(),
            strategies: self
                .chunker
                .strategy_keys()
                .into_iter()
                .map(String::from)
                .collect(),
        })
    }

    pub async fn clear(&self) -> Result<()> {
        Ok(self.store.clear().await?)
    }
}

/// Embed a parent's chunks, then replace its stored chunks in one step.
async fn store_chunks(
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    chunks: Vec<DataChunk>,
    batch_size: usize,
    embed: bool,
) -> Result<StoredParent> {
    let Some(first) = chunks.first() else {
        return Ok(StoredParent::default());
    };
    let mut stored = StoredParent {
        parent_id: first.parent_id.clone(),
        chunks: chunks.len(),
        ..Default::default()
    };

    let vectors = if embed {
        embed_all(embedder.as_ref(), &chunks, batch_size, &stored.parent_id).await
    } else {
        None
    };
    match &vectors {
        Some(_) => stored.embedded = chunks.len(),
        None if embed => stored.pending = chunks.len(),
        None => {}
    }

    let removed = store
        .replace_parent(&stored.parent_id, &chunks, vectors.as_deref())
        .await
        .with_context(|| format!("Failed to store chunks of {}", stored.parent_id))?;
    if removed > 0 {
        debug!(parent = %stored.parent_id, removed, "replaced previous chunks");
    }

    debug!(
        parent = %stored.parent_id,
        chunks = stored.chunks,
        embedded = stored.embedded,
        "stored parent"
    );
    Ok(stored)
}

/// Vectors for every chunk in order, or `None` if any batch fails.
async fn embed_all(
    embedder: &dyn Embedder,
    chunks: &[DataChunk],
    batch_size: usize,
    parent_id: &str,
) -> Option<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        match embedder.embed_batch(&texts).await {
            Ok(v) if v.len() == batch.len() => vectors.extend(v),
            Ok(v) => {
                warn!(
                    parent = %parent_id,
                    expected = batch.len(),
                    got = v.len(),
                    "embedding count mismatch, storing without vectors"
                );
                return None;
            }
            Err(e) => {
                warn!(
                    parent = %parent_id,
                    error = %e,
                    "embedding failed, storing without vectors"
                );
                return None;
            }
        }
    }
    Some(vectors)
}
