//! Chunking strategies and the [`DataChunker`] registry.
//!
//! A [`ChunkingStrategy`] turns `(text, context)` into an ordered list of
//! [`DataChunk`]s. Strategies hold configuration only and are shared
//! behind `Arc`, so one registry can serve concurrent callers.
//!
//! [`DataChunker`] maps a context's `chunk_type_key` to a strategy:
//!
//! | Key | Strategy |
//! |-----|----------|
//! | `text`, `code`, `email_header`, `email_signature` | [`FixedSizeStrategy`] |
//! | `document` | [`StructureAwareStrategy`] |
//! | `email_body` | [`EmailAwareStrategy`] |
//!
//! Every strategy produces byte spans of the input. The shared finalizer
//! turns spans into chunks: ids are UUID v5 over `"{parent}:{index}"`,
//! `overlap_with_previous` is the number of tokens the span shares with
//! the previous span, and sequence indices continue from the context's
//! `start_sequence_index`. Because chunk content is always a slice of the
//! input, [`reassemble`] rebuilds the text by stripping each chunk's
//! overlap.

mod email;
mod fixed;
mod structure;

pub use email::EmailAwareStrategy;
pub use fixed::FixedSizeStrategy;
pub use structure::StructureAwareStrategy;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::context::ChunkingContext;
use crate::error::{Error, Result};
use crate::models::{sha256_hex, ChunkKind, ChunkMetadata, DataChunk};
use crate::tokenizer::Tokenizer;

/// A pluggable chunking algorithm.
pub trait ChunkingStrategy: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Split `text` into chunks according to `ctx`.
    ///
    /// Callers going through [`DataChunker`] never pass blank text.
    fn chunk(&self, text: &str, ctx: &ChunkingContext) -> Result<Vec<DataChunk>>;
}

/// Registry and dispatcher of chunking strategies.
pub struct DataChunker {
    strategies: HashMap<String, Arc<dyn ChunkingStrategy>>,
}

impl DataChunker {
    /// Registry with the default strategies registered.
    pub fn new() -> Self {
        let fixed: Arc<dyn ChunkingStrategy> = Arc::new(FixedSizeStrategy);
        let mut strategies: HashMap<String, Arc<dyn ChunkingStrategy>> = HashMap::new();
        for key in ["text", "code", "email_header", "email_signature"] {
            strategies.insert(key.to_string(), fixed.clone());
        }
        strategies.insert("document".to_string(), Arc::new(StructureAwareStrategy));
        strategies.insert("email_body".to_string(), Arc::new(EmailAwareStrategy));
        Self { strategies }
    }

    /// Registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Register `strategy` under `key`. The last registration for a key wins.
    pub fn register_strategy(
        &mut self,
        key: impl Into<String>,
        strategy: Arc<dyn ChunkingStrategy>,
    ) -> Result<()> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(Error::Configuration(
                "strategy key must not be empty".to_string(),
            ));
        }
        if let Some(previous) = self.strategies.insert(key.clone(), strategy) {
            debug!(key = %key, replaced = previous.name(), "strategy re-registered");
        }
        Ok(())
    }

    pub fn has_strategy(&self, key: &str) -> bool {
        self.strategies.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn strategy_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Chunk `text` with the strategy registered for `ctx.chunk_type_key()`.
    ///
    /// Fails with [`Error::InvalidInput`] for blank text and with
    /// [`Error::UnknownStrategy`] when no strategy is registered for the
    /// key. There is no fallback strategy.
    pub fn chunk(&self, text: &str, ctx: &ChunkingContext) -> Result<Vec<DataChunk>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput(
                "cannot chunk empty or whitespace-only text".to_string(),
            ));
        }
        let strategy = self
            .strategies
            .get(ctx.chunk_type_key())
            .ok_or_else(|| Error::UnknownStrategy(ctx.chunk_type_key().to_string()))?;

        let chunks = strategy.chunk(text, ctx)?;
        debug!(
            strategy = strategy.name(),
            key = ctx.chunk_type_key(),
            chunks = chunks.len(),
            bytes = text.len(),
            "chunked text"
        );
        Ok(chunks)
    }
}

impl Default for DataChunker {
    fn default() -> Self {
        Self::new()
    }
}

/// Rebuild the chunked text from an ordered chunk sequence by dropping
/// the overlapping prefix of every chunk after the first.
///
/// Exact for fixed-size chunking. Structure-aware chunking skips the
/// blank lines between blocks that end one section and start the next,
/// so those are not restored.
pub fn reassemble(chunks: &[DataChunk]) -> String {
    let mut out = String::new();
    let mut covered: Option<usize> = None;
    for c in chunks {
        match covered {
            None => out.push_str(&c.content),
            Some(end) => {
                let skip = end.saturating_sub(c.start_offset).min(c.content.len());
                out.push_str(&c.content[skip..]);
            }
        }
        covered = Some(covered.map_or(c.end_offset, |e| e.max(c.end_offset)));
    }
    out
}

/// Token start offsets of a whole text, for counting tokens in byte ranges.
pub(crate) struct TokenIndex {
    starts: Vec<usize>,
    text_len: usize,
}

impl TokenIndex {
    pub(crate) fn new(tokenizer: &dyn Tokenizer, text: &str) -> Self {
        Self {
            starts: tokenizer.token_starts(text),
            text_len: text.len(),
        }
    }

    /// Number of tokens.
    pub(crate) fn len(&self) -> usize {
        self.starts.len()
    }

    /// Byte offset where token `i` starts; `len()` maps to the end of text.
    pub(crate) fn offset(&self, i: usize) -> usize {
        self.starts.get(i).copied().unwrap_or(self.text_len)
    }

    /// Index of the token containing byte `pos`.
    pub(crate) fn token_containing(&self, pos: usize) -> usize {
        self.starts.partition_point(|&s| s <= pos).saturating_sub(1)
    }

    /// Index of the first token starting at or after byte `pos`.
    pub(crate) fn token_at_or_after(&self, pos: usize) -> usize {
        self.starts.partition_point(|&s| s < pos)
    }

    /// Number of tokens intersecting the byte range `[a, b)`.
    pub(crate) fn count(&self, a: usize, b: usize) -> usize {
        if b <= a || self.starts.is_empty() {
            return 0;
        }
        self.token_at_or_after(b) - self.token_containing(a)
    }
}

/// A byte span chosen by a strategy, before it becomes a [`DataChunk`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
    pub kind: ChunkKind,
    pub section_title: Option<String>,
    pub quoted: bool,
}

impl Span {
    pub(crate) fn plain(start: usize, end: usize, kind: ChunkKind) -> Self {
        Self {
            start,
            end,
            kind,
            section_title: None,
            quoted: false,
        }
    }
}

/// Turn spans into chunks with ids, sequence indices, overlap and metadata.
///
/// Blank spans are dropped; overlap is measured against the previous
/// emitted span.
pub(crate) fn finalize(
    text: &str,
    index: &TokenIndex,
    spans: Vec<Span>,
    ctx: &ChunkingContext,
) -> Vec<DataChunk> {
    let parent_id = ctx
        .parent_id()
        .map(str::to_string)
        .unwrap_or_else(|| sha256_hex(text));
    let source = ctx
        .source_document()
        .map(str::to_string)
        .unwrap_or_else(|| parent_id.clone());

    let spans: Vec<Span> = spans
        .into_iter()
        .filter(|s| s.end > s.start && !text[s.start..s.end].trim().is_empty())
        .collect();
    let total = spans.len();

    let mut chunks = Vec::with_capacity(total);
    let mut prev_end: Option<usize> = None;
    for (i, span) in spans.into_iter().enumerate() {
        let sequence_index = ctx.start_sequence_index() + i;
        let overlap = match prev_end {
            Some(end) if span.start < end => index.count(span.start, end.min(span.end)),
            _ => 0,
        };
        prev_end = Some(span.end);

        chunks.push(DataChunk {
            chunk_id: DataChunk::derive_id(&parent_id, sequence_index),
            parent_id: parent_id.clone(),
            sequence_index,
            content: text[span.start..span.end].to_string(),
            overlap_with_previous: overlap,
            start_offset: span.start,
            end_offset: span.end,
            metadata: ChunkMetadata {
                kind: span.kind,
                source_document: source.clone(),
                chunk_size: index.count(span.start, span.end),
                total_chunks: total,
                section_title: span
                    .section_title
                    .or_else(|| ctx.section_title().map(str::to_string)),
                page_number: ctx.page_number(),
                created_at: ctx.created_at().map(str::to_string),
                email: ctx.email().cloned(),
                quoted: span.quoted,
                extra: ctx.extra_metadata().clone(),
            },
        });
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ChunkingContextBuilder;
    use crate::tokenizer::CharTokenizer;

    struct WholeText;

    impl ChunkingStrategy for WholeText {
        fn name(&self) -> &str {
            "whole"
        }

        fn chunk(&self, text: &str, ctx: &ChunkingContext) -> Result<Vec<DataChunk>> {
            let index = TokenIndex::new(ctx.tokenizer(), text);
            Ok(finalize(
                text,
                &index,
                vec![Span::plain(0, text.len(), ctx.kind())],
                ctx,
            ))
        }
    }

    #[test]
    fn test_default_keys_registered() {
        let chunker = DataChunker::new();
        assert_eq!(
            chunker.strategy_keys(),
            vec!["code", "document", "email_body", "email_header", "email_signature", "text"]
        );
        assert!(DataChunker::empty().strategy_keys().is_empty());
    }

    #[test]
    fn test_blank_text_rejected() {
        let ctx = ChunkingContextBuilder::for_text().build().unwrap();
        let err = DataChunker::new().chunk(" \n\t ", &ctx).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_unknown_strategy_has_no_fallback() {
        let ctx = ChunkingContextBuilder::for_text()
            .with_strategy("slides")
            .build()
            .unwrap();
        let err = DataChunker::new().chunk("hello", &ctx).unwrap_err();
        assert!(matches!(err, Error::UnknownStrategy(ref k) if k == "slides"));
    }

    #[test]
    fn test_register_custom_strategy_last_wins() {
        let mut chunker = DataChunker::new();
        chunker.register_strategy("text", Arc::new(WholeText)).unwrap();
        let ctx = ChunkingContextBuilder::for_text()
            .with_chunk_size(2)
            .with_overlap(0)
            .with_tokenizer(Arc::new(CharTokenizer))
            .build()
            .unwrap();
        let chunks = chunker.chunk("abcdef", &ctx).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "abcdef");
    }

    #[test]
    fn test_register_empty_key_rejected() {
        let mut chunker = DataChunker::empty();
        let err = chunker.register_strategy("", Arc::new(WholeText)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_token_index_counts_partial_tokens() {
        let index = TokenIndex::new(&CharTokenizer, "abcdef");
        assert_eq!(index.len(), 6);
        assert_eq!(index.count(1, 4), 3);
        assert_eq!(index.count(4, 4), 0);
        assert_eq!(index.offset(6), 6);

        let words = TokenIndex::new(&crate::tokenizer::WordTokenizer, "one two three");
        // byte 5 is inside "two "
        assert_eq!(words.token_containing(5), 1);
        assert_eq!(words.count(5, 13), 2);
    }

    #[test]
    fn test_finalize_parent_defaults_to_text_hash() {
        let ctx = ChunkingContextBuilder::for_text()
            .with_start_sequence_index(4)
            .build()
            .unwrap();
        let text = "some text";
        let index = TokenIndex::new(ctx.tokenizer(), text);
        let chunks = finalize(
            text,
            &index,
            vec![Span::plain(0, text.len(), ChunkKind::Text)],
            &ctx,
        );
        assert_eq!(chunks[0].parent_id, sha256_hex(text));
        assert_eq!(chunks[0].sequence_index, 4);
        assert_eq!(chunks[0].metadata.source_document, chunks[0].parent_id);
        assert_eq!(chunks[0].chunk_id, DataChunk::derive_id(&chunks[0].parent_id, 4));
    }
}
