//! Structure-aware ("adaptive") chunking over the parsed document tree.
//!
//! # Algorithm
//!
//! 1. Parse the text into sections and blocks ([`crate::document::parse`]).
//! 2. Within a section, accumulate consecutive blocks while the chunk
//!    stays within `chunk_size` tokens. A chunk never spans two sections.
//! 3. When a chunk closes after a paragraph, the next chunk starts with
//!    the trailing `chunk_overlap` tokens of that paragraph (of the whole
//!    chunk when `Paragraph` is not a respected boundary). No overlap is
//!    seeded after an equation, citation or code block.
//! 4. At a section change the overlap is reset to zero when `Section` is
//!    a respected boundary.
//! 5. Equations, citations and code blocks are atomic. An atomic block
//!    larger than `chunk_size` is emitted alone as an oversized chunk.
//! 6. An oversized paragraph is split into token windows that never cut
//!    through an inline citation.
//!
//! Whenever a seeded overlap would push the next chunk past
//! `chunk_size`, it is dropped and the chunk records zero overlap.

use crate::context::{BoundaryKind, ChunkingContext};
use crate::document::{self, inline_citations, Block, BlockKind, Section};
use crate::error::Result;
use crate::models::{ChunkKind, DataChunk};

use super::fixed::windows;
use super::{finalize, ChunkingStrategy, Span, TokenIndex};

/// Section/paragraph-aware chunking for Markdown, LaTeX and plain documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructureAwareStrategy;

impl ChunkingStrategy for StructureAwareStrategy {
    fn name(&self) -> &str {
        "structure_aware"
    }

    fn chunk(&self, text: &str, ctx: &ChunkingContext) -> Result<Vec<DataChunk>> {
        let index = TokenIndex::new(ctx.tokenizer(), text);
        if index.len() == 0 {
            return Ok(Vec::new());
        }
        let doc = document::parse(text, ctx.format());
        let spans = accumulate(
            text,
            &index,
            &doc.sections,
            ctx,
            ctx.respects(BoundaryKind::Section),
        );
        Ok(finalize(text, &index, spans, ctx))
    }
}

struct OpenChunk {
    start: usize,
    end: usize,
    blocks: usize,
    first_kind: BlockKind,
    last: Block,
    /// End of the last atomic block inside the chunk; overlap seeds never
    /// start before it.
    atomic_end: Option<usize>,
}

impl OpenChunk {
    fn new(start: usize, block: Block) -> Self {
        Self {
            start,
            end: block.end,
            blocks: 1,
            first_kind: block.kind,
            last: block,
            atomic_end: block.kind.is_atomic().then_some(block.end),
        }
    }

    fn push(&mut self, block: Block) {
        self.end = block.end;
        self.blocks += 1;
        self.last = block;
        if block.kind.is_atomic() {
            self.atomic_end = Some(block.end);
        }
    }

    fn kind(&self, default: ChunkKind) -> ChunkKind {
        if self.blocks == 1 {
            atomic_kind(self.first_kind).unwrap_or(default)
        } else {
            default
        }
    }

    /// Byte offset where the next chunk's overlap begins, if any.
    fn overlap_seed(&self, index: &TokenIndex, ctx: &ChunkingContext) -> Option<usize> {
        let overlap = ctx.chunk_overlap();
        if overlap == 0 || self.last.kind.is_atomic() {
            return None;
        }
        let mut floor = self.start;
        if ctx.respects(BoundaryKind::Paragraph) {
            floor = floor.max(self.last.start);
        }
        if let Some(atomic_end) = self.atomic_end {
            floor = floor.max(atomic_end);
        }
        let end_token = index.token_at_or_after(self.end);
        let seed = index.offset(end_token.saturating_sub(overlap)).max(floor);
        (seed > self.start && seed < self.end).then_some(seed)
    }
}

fn atomic_kind(kind: BlockKind) -> Option<ChunkKind> {
    match kind {
        BlockKind::Equation => Some(ChunkKind::Equation),
        BlockKind::Citation => Some(ChunkKind::Citation),
        BlockKind::Code => Some(ChunkKind::Code),
        BlockKind::Heading | BlockKind::Paragraph => None,
    }
}

/// Accumulate blocks of each section into chunk spans.
///
/// With `reset_at_section`, no overlap is carried from one section into
/// the next.
pub(crate) fn accumulate(
    text: &str,
    index: &TokenIndex,
    sections: &[Section],
    ctx: &ChunkingContext,
    reset_at_section: bool,
) -> Vec<Span> {
    let size = ctx.chunk_size();
    let mut spans = Vec::new();
    let mut seed: Option<usize> = None;

    for section in sections {
        let span_of = |start: usize, end: usize, kind: ChunkKind| Span {
            start,
            end,
            kind,
            section_title: section.title.clone(),
            quoted: section.quoted,
        };
        let mut open: Option<OpenChunk> = None;

        for block in &section.blocks {
            if let Some(chunk) = open.as_mut() {
                if index.count(chunk.start, block.end) <= size {
                    chunk.push(*block);
                    continue;
                }
            }
            if let Some(chunk) = open.take() {
                seed = chunk.overlap_seed(index, ctx);
                spans.push(span_of(chunk.start, chunk.end, chunk.kind(ctx.kind())));
            }

            let pending = seed.take();
            if index.count(block.start, block.end) > size {
                if block.kind.is_atomic() {
                    let kind = atomic_kind(block.kind).unwrap_or(ctx.kind());
                    spans.push(span_of(block.start, block.end, kind));
                    continue;
                }
                let from = pending.unwrap_or(block.start);
                let protected = inline_citations(text, block.start, block.end);
                let mut pieces = windows(text, index, from, block.end, ctx, &protected);
                let tail = pieces.pop();
                for (start, end) in pieces {
                    spans.push(span_of(start, end, ctx.kind()));
                }
                if let Some((start, _)) = tail {
                    open = Some(OpenChunk::new(start, *block));
                }
                continue;
            }

            let start = pending
                .filter(|&s| index.count(s, block.end) <= size)
                .unwrap_or(block.start);
            open = Some(OpenChunk::new(start, *block));
        }

        if let Some(chunk) = open.take() {
            seed = if reset_at_section {
                None
            } else {
                chunk.overlap_seed(index, ctx)
            };
            spans.push(span_of(chunk.start, chunk.end, chunk.kind(ctx.kind())));
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::chunk::{reassemble, DataChunker};
    use crate::context::ChunkingContextBuilder;
    use crate::document::TextFormat;
    use crate::tokenizer::WordTokenizer;

    fn doc_ctx(format: TextFormat, size: usize, overlap: usize) -> ChunkingContext {
        ChunkingContextBuilder::for_document()
            .with_format(format)
            .with_chunk_size(size)
            .with_overlap(overlap)
            .with_tokenizer(Arc::new(WordTokenizer))
            .build()
            .unwrap()
    }

    #[test]
    fn test_paragraphs_accumulate_with_seeded_overlap() {
        let text = "p1 w w w w w w w\n\np2 w w w w w w w\n\np3 w w w w w w w";
        let chunks = StructureAwareStrategy
            .chunk(text, &doc_ctx(TextFormat::Plain, 20, 3))
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "p1 w w w w w w w\n\np2 w w w w w w w");
        assert_eq!(chunks[1].overlap_with_previous, 3);
        assert!(chunks[1].content.starts_with("w w w\n\np3"));
        let shared = chunks[0].end_offset - chunks[1].start_offset;
        assert!(chunks[0].content.ends_with(&chunks[1].content[..shared]));
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn test_section_change_resets_overlap() {
        let text = "# One\n\nalpha beta gamma delta\n\n# Two\n\nepsilon zeta eta theta";
        let chunks = StructureAwareStrategy
            .chunk(text, &doc_ctx(TextFormat::Markdown, 50, 2))
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.section_title.as_deref(), Some("One"));
        assert_eq!(chunks[1].metadata.section_title.as_deref(), Some("Two"));
        assert_eq!(chunks[1].overlap_with_previous, 0);
        assert!(chunks[1].content.starts_with("# Two"));
    }

    #[test]
    fn test_overlap_crosses_sections_when_not_respected() {
        let text = "# One\n\nalpha beta gamma delta\n\n# Two\n\nepsilon zeta eta theta";
        let ctx = ChunkingContextBuilder::for_document()
            .with_format(TextFormat::Markdown)
            .without_boundary(BoundaryKind::Section)
            .with_chunk_size(50)
            .with_overlap(2)
            .with_tokenizer(Arc::new(WordTokenizer))
            .build()
            .unwrap();
        let chunks = StructureAwareStrategy.chunk(text, &ctx).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].overlap_with_previous, 2);
        assert!(chunks[1].content.starts_with("gamma delta"));
    }

    #[test]
    fn test_oversized_equation_is_atomic() {
        let equation = format!(
            "\\begin{{equation}}\n{}\n\\end{{equation}}",
            "x + ".repeat(40)
        );
        let text = format!(
            "\\section{{Model}}\nWe define the loss as follows.\n{}\nwhich converges quickly.",
            equation
        );
        let chunks = StructureAwareStrategy
            .chunk(&text, &doc_ctx(TextFormat::Latex, 12, 3))
            .unwrap();
        let holders: Vec<&DataChunk> = chunks
            .iter()
            .filter(|c| c.content.contains("\\begin{equation}"))
            .collect();
        assert_eq!(holders.len(), 1);
        assert!(holders[0].content.contains(&equation));
        assert_eq!(holders[0].metadata.kind, ChunkKind::Equation);
        let after = chunks
            .iter()
            .find(|c| c.content.contains("converges"))
            .unwrap();
        assert_eq!(after.overlap_with_previous, 0);
        assert!(!after.content.contains("\\end{equation}"));
    }

    #[test]
    fn test_small_equation_never_split() {
        let text = "Intro words here.\n$$\na = b + c\n$$\nClosing words follow here now.";
        let chunks = StructureAwareStrategy
            .chunk(text, &doc_ctx(TextFormat::Markdown, 8, 2))
            .unwrap();
        let holders = chunks.iter().filter(|c| c.content.contains("a = b")).count();
        assert_eq!(holders, 1);
        for c in &chunks {
            assert_eq!(c.content.matches("$$").count() % 2, 0, "split: {:?}", c.content);
        }
    }

    #[test]
    fn test_oversized_paragraph_keeps_inline_citations_whole() {
        let words = (0..30).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let text = format!("{} \\cite{{knuth1984, lamport1994}} {}", words, words);
        let chunks = StructureAwareStrategy
            .chunk(&text, &doc_ctx(TextFormat::Latex, 10, 2))
            .unwrap();
        assert!(chunks.len() > 3);
        for c in &chunks {
            let opens = c.content.matches("\\cite{").count();
            let whole = c.content.matches("\\cite{knuth1984, lamport1994}").count();
            assert_eq!(opens, whole, "citation cut in {:?}", c.content);
            assert!(!c.content.starts_with("lamport1994"));
        }
        assert!(chunks
            .iter()
            .any(|c| c.content.contains("\\cite{knuth1984, lamport1994}")));
    }

    #[test]
    fn test_chunks_stay_within_size_when_blocks_fit() {
        let text = (0..12)
            .map(|i| format!("Paragraph {} has exactly six words.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let ctx = doc_ctx(TextFormat::Plain, 20, 4);
        let chunks = DataChunker::new().chunk(&text, &ctx).unwrap();
        for c in &chunks {
            assert!(c.metadata.chunk_size <= 20, "oversized: {}", c.metadata.chunk_size);
        }
        for pair in chunks.windows(2) {
            let shared = pair[0].end_offset.saturating_sub(pair[1].start_offset);
            assert!(pair[0].content.ends_with(&pair[1].content[..shared]));
        }
        assert_eq!(reassemble(&chunks), text);
    }
}
