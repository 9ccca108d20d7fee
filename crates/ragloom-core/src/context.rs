//! Immutable chunking configuration and its fluent builder.
//!
//! A [`ChunkingContext`] describes how one span of text is chunked: the
//! window size and overlap (in tokens of the configured [`Tokenizer`]),
//! which structural boundaries to respect, which strategy to dispatch to,
//! and the provenance metadata stamped onto every produced chunk.
//!
//! Contexts are created through [`ChunkingContextBuilder`], whose preset
//! constructors carry the per-content-type defaults:
//!
//! | Preset | Strategy key | Size | Overlap | Boundaries |
//! |--------|--------------|------|---------|------------|
//! | [`for_text`](ChunkingContextBuilder::for_text) | `text` | 768 | 100 | none |
//! | [`for_document`](ChunkingContextBuilder::for_document) | `document` | 768 | 100 | section, paragraph |
//! | [`for_code`](ChunkingContextBuilder::for_code) | `code` | 768 | 100 | line |
//! | [`for_email_header`](ChunkingContextBuilder::for_email_header) | `email_header` | 512 | 0 | none |
//! | [`for_email_body`](ChunkingContextBuilder::for_email_body) | `email_body` | 512 | 50 | paragraph, line |
//! | [`for_email_signature`](ChunkingContextBuilder::for_email_signature) | `email_signature` | 512 | 0 | line |
//!
//! # Example
//!
//! ```rust
//! use ragloom_core::context::{BoundaryKind, ChunkingContextBuilder};
//!
//! let ctx = ChunkingContextBuilder::for_document()
//!     .with_chunk_size(256)
//!     .with_overlap(32)
//!     .with_source("paper.tex")
//!     .build()
//!     .unwrap();
//! assert_eq!(ctx.chunk_type_key(), "document");
//! assert!(ctx.respects(BoundaryKind::Section));
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::TextFormat;
use crate::error::{Error, Result};
use crate::models::{ChunkKind, EmailInfo, RESERVED_METADATA_KEYS};
use crate::tokenizer::{HeuristicTokenizer, Tokenizer};

pub const DEFAULT_CHUNK_SIZE: usize = 768;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;
pub const DEFAULT_EMAIL_CHUNK_SIZE: usize = 512;
pub const DEFAULT_EMAIL_CHUNK_OVERLAP: usize = 50;

/// Structural boundary a strategy should avoid cutting through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    Line,
    Sentence,
    Paragraph,
    Section,
}

/// Immutable description of how to chunk one span of text.
#[derive(Clone)]
pub struct ChunkingContext {
    chunk_type_key: String,
    kind: ChunkKind,
    chunk_size: usize,
    chunk_overlap: usize,
    boundaries: BTreeSet<BoundaryKind>,
    format: TextFormat,
    parent_id: Option<String>,
    source_document: Option<String>,
    start_sequence_index: usize,
    section_title: Option<String>,
    page_number: Option<u32>,
    created_at: Option<String>,
    email: Option<EmailInfo>,
    extra_metadata: Map<String, Value>,
    tokenizer: Arc<dyn Tokenizer>,
    line_snap_tolerance: usize,
}

impl ChunkingContext {
    /// Strategy key used by [`DataChunker`](crate::chunk::DataChunker) for dispatch.
    pub fn chunk_type_key(&self) -> &str {
        &self.chunk_type_key
    }

    /// Default `type` of produced chunks.
    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn boundaries(&self) -> &BTreeSet<BoundaryKind> {
        &self.boundaries
    }

    pub fn respects(&self, boundary: BoundaryKind) -> bool {
        self.boundaries.contains(&boundary)
    }

    pub fn format(&self) -> TextFormat {
        self.format
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn source_document(&self) -> Option<&str> {
        self.source_document.as_deref()
    }

    /// Sequence index of the first produced chunk.
    pub fn start_sequence_index(&self) -> usize {
        self.start_sequence_index
    }

    pub fn section_title(&self) -> Option<&str> {
        self.section_title.as_deref()
    }

    pub fn page_number(&self) -> Option<u32> {
        self.page_number
    }

    pub fn created_at(&self) -> Option<&str> {
        self.created_at.as_deref()
    }

    pub fn email(&self) -> Option<&EmailInfo> {
        self.email.as_ref()
    }

    pub fn extra_metadata(&self) -> &Map<String, Value> {
        &self.extra_metadata
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    /// Maximum number of tokens a window end may move back when snapping
    /// to a boundary.
    pub fn line_snap_tolerance(&self) -> usize {
        self.line_snap_tolerance
    }
}

impl fmt::Debug for ChunkingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkingContext")
            .field("chunk_type_key", &self.chunk_type_key)
            .field("kind", &self.kind)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("boundaries", &self.boundaries)
            .field("format", &self.format)
            .field("parent_id", &self.parent_id)
            .field("source_document", &self.source_document)
            .field("start_sequence_index", &self.start_sequence_index)
            .field("tokenizer", &self.tokenizer.name())
            .field("line_snap_tolerance", &self.line_snap_tolerance)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`ChunkingContext`].
#[derive(Clone)]
pub struct ChunkingContextBuilder {
    chunk_type_key: String,
    kind: ChunkKind,
    chunk_size: usize,
    chunk_overlap: usize,
    boundaries: BTreeSet<BoundaryKind>,
    format: TextFormat,
    parent_id: Option<String>,
    source_document: Option<String>,
    start_sequence_index: usize,
    section_title: Option<String>,
    page_number: Option<u32>,
    created_at: Option<String>,
    email: Option<EmailInfo>,
    extra_metadata: Map<String, Value>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    line_snap_tolerance: Option<usize>,
}

impl ChunkingContextBuilder {
    fn preset(
        key: &str,
        kind: ChunkKind,
        size: usize,
        overlap: usize,
        boundaries: &[BoundaryKind],
    ) -> Self {
        Self {
            chunk_type_key: key.to_string(),
            kind,
            chunk_size: size,
            chunk_overlap: overlap,
            boundaries: boundaries.iter().copied().collect(),
            format: TextFormat::Plain,
            parent_id: None,
            source_document: None,
            start_sequence_index: 0,
            section_title: None,
            page_number: None,
            created_at: None,
            email: None,
            extra_metadata: Map::new(),
            tokenizer: None,
            line_snap_tolerance: None,
        }
    }

    /// Plain text, fixed windows, no boundary snapping.
    pub fn for_text() -> Self {
        Self::preset(
            "text",
            ChunkKind::Text,
            DEFAULT_CHUNK_SIZE,
            DEFAULT_CHUNK_OVERLAP,
            &[],
        )
    }

    /// Structured documents (Markdown, LaTeX), structure-aware chunking.
    pub fn for_document() -> Self {
        Self::preset(
            "document",
            ChunkKind::Paragraph,
            DEFAULT_CHUNK_SIZE,
            DEFAULT_CHUNK_OVERLAP,
            &[BoundaryKind::Section, BoundaryKind::Paragraph],
        )
    }

    /// Source code, fixed windows snapped to line ends.
    pub fn for_code() -> Self {
        Self::preset(
            "code",
            ChunkKind::Code,
            DEFAULT_CHUNK_SIZE,
            DEFAULT_CHUNK_OVERLAP,
            &[BoundaryKind::Line],
        )
    }

    pub fn for_email_header() -> Self {
        Self::preset(
            "email_header",
            ChunkKind::EmailHeader,
            DEFAULT_EMAIL_CHUNK_SIZE,
            0,
            &[],
        )
    }

    pub fn for_email_body() -> Self {
        Self::preset(
            "email_body",
            ChunkKind::EmailBody,
            DEFAULT_EMAIL_CHUNK_SIZE,
            DEFAULT_EMAIL_CHUNK_OVERLAP,
            &[BoundaryKind::Paragraph, BoundaryKind::Line],
        )
    }

    pub fn for_email_signature() -> Self {
        Self::preset(
            "email_signature",
            ChunkKind::EmailSignature,
            DEFAULT_EMAIL_CHUNK_SIZE,
            0,
            &[BoundaryKind::Line],
        )
    }

    /// Dispatch to a custom registered strategy.
    pub fn with_strategy(mut self, key: impl Into<String>) -> Self {
        self.chunk_type_key = key.into();
        self
    }

    pub fn with_kind(mut self, kind: ChunkKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.chunk_overlap = overlap;
        self
    }

    pub fn with_boundary(mut self, boundary: BoundaryKind) -> Self {
        self.boundaries.insert(boundary);
        self
    }

    pub fn without_boundary(mut self, boundary: BoundaryKind) -> Self {
        self.boundaries.remove(&boundary);
        self
    }

    pub fn without_boundaries(mut self) -> Self {
        self.boundaries.clear();
        self
    }

    pub fn with_format(mut self, format: TextFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_document = Some(source.into());
        self
    }

    /// Continue numbering from `index` when a parent is chunked in several calls.
    pub fn with_start_sequence_index(mut self, index: usize) -> Self {
        self.start_sequence_index = index;
        self
    }

    pub fn with_section(mut self, title: impl Into<String>) -> Self {
        self.section_title = Some(title.into());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page_number = Some(page);
        self
    }

    pub fn with_created_at(mut self, created_at: impl Into<String>) -> Self {
        self.created_at = Some(created_at.into());
        self
    }

    pub fn with_email_info(mut self, info: EmailInfo) -> Self {
        self.email = Some(info);
        self
    }

    /// Attach an extension metadata key. Reserved keys are rejected by [`build`](Self::build).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn with_line_snap_tolerance(mut self, tokens: usize) -> Self {
        self.line_snap_tolerance = Some(tokens);
        self
    }

    /// Validate and freeze the configuration.
    ///
    /// Fails with [`Error::Configuration`] when `chunk_size` is zero, when
    /// `chunk_overlap >= chunk_size`, when the strategy key is blank, or
    /// when extension metadata uses a reserved key.
    pub fn build(self) -> Result<ChunkingContext> {
        if self.chunk_size == 0 {
            return Err(Error::Configuration("chunk_size must be > 0".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.chunk_type_key.trim().is_empty() {
            return Err(Error::Configuration(
                "chunk_type_key must not be empty".to_string(),
            ));
        }
        if let Some(key) = self
            .extra_metadata
            .keys()
            .find(|k| RESERVED_METADATA_KEYS.contains(&k.as_str()))
        {
            return Err(Error::Configuration(format!(
                "metadata key '{}' is reserved",
                key
            )));
        }

        let line_snap_tolerance = self
            .line_snap_tolerance
            .unwrap_or(self.chunk_size / 4)
            .max(1);

        Ok(ChunkingContext {
            chunk_type_key: self.chunk_type_key,
            kind: self.kind,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            boundaries: self.boundaries,
            format: self.format,
            parent_id: self.parent_id,
            source_document: self.source_document,
            start_sequence_index: self.start_sequence_index,
            section_title: self.section_title,
            page_number: self.page_number,
            created_at: self.created_at,
            email: self.email,
            extra_metadata: self.extra_metadata,
            tokenizer: self
                .tokenizer
                .unwrap_or_else(|| Arc::new(HeuristicTokenizer::default())),
            line_snap_tolerance,
        })
    }
}

impl Default for ChunkingContextBuilder {
    fn default() -> Self {
        Self::for_text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::CharTokenizer;

    #[test]
    fn test_presets() {
        let doc = ChunkingContextBuilder::for_document().build().unwrap();
        assert_eq!(doc.chunk_size(), 768);
        assert_eq!(doc.chunk_overlap(), 100);
        assert!(doc.respects(BoundaryKind::Section));
        assert!(doc.respects(BoundaryKind::Paragraph));

        let body = ChunkingContextBuilder::for_email_body().build().unwrap();
        assert_eq!(body.chunk_type_key(), "email_body");
        assert_eq!(body.chunk_size(), 512);
        assert_eq!(body.chunk_overlap(), 50);

        let text = ChunkingContextBuilder::for_text().build().unwrap();
        assert!(text.boundaries().is_empty());
        assert_eq!(text.tokenizer().name(), "heuristic");
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = ChunkingContextBuilder::for_text()
            .with_chunk_size(100)
            .with_overlap(100)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let err = ChunkingContextBuilder::for_text()
            .with_chunk_size(0)
            .with_overlap(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_reserved_metadata_key_rejected() {
        let err = ChunkingContextBuilder::for_text()
            .with_metadata("source_document", "x")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("source_document"));
    }

    #[test]
    fn test_blank_strategy_key_rejected() {
        let result = ChunkingContextBuilder::for_text().with_strategy("  ").build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_line_snap_tolerance_defaults_to_quarter_window() {
        let ctx = ChunkingContextBuilder::for_code()
            .with_chunk_size(200)
            .with_overlap(20)
            .build()
            .unwrap();
        assert_eq!(ctx.line_snap_tolerance(), 50);

        let ctx = ChunkingContextBuilder::for_code()
            .with_line_snap_tolerance(7)
            .build()
            .unwrap();
        assert_eq!(ctx.line_snap_tolerance(), 7);
    }

    #[test]
    fn test_builder_carries_provenance() {
        let ctx = ChunkingContextBuilder::for_text()
            .with_parent_id("doc-1")
            .with_source("notes.txt")
            .with_start_sequence_index(5)
            .with_page(3)
            .with_metadata("project", "apollo")
            .with_tokenizer(Arc::new(CharTokenizer))
            .build()
            .unwrap();
        assert_eq!(ctx.parent_id(), Some("doc-1"));
        assert_eq!(ctx.start_sequence_index(), 5);
        assert_eq!(ctx.page_number(), Some(3));
        assert_eq!(ctx.extra_metadata()["project"], "apollo");
        assert_eq!(ctx.tokenizer().name(), "chars");
    }
}
