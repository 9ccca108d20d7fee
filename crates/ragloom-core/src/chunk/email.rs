//! Email body chunking.
//!
//! The body is split into paragraphs and grouped into author and quoted
//! runs (`>` lines, reply markers and unquoted forwarded originals).
//! Author text below a quoted run, as in bottom-posted or interleaved
//! replies, starts a new author run. Paragraphs accumulate like in the
//! structure-aware strategy, but a chunk never mixes the two runs and
//! overlap never crosses from one into the other. Chunks made of quoted text carry `quoted = true`.

use crate::context::ChunkingContext;
use crate::email::segment_body;
use crate::error::Result;
use crate::models::DataChunk;

use super::structure::accumulate;
use super::{finalize, ChunkingStrategy, TokenIndex};

#[derive(Debug, Clone, Copy, Default)]
pub struct EmailAwareStrategy;

impl ChunkingStrategy for EmailAwareStrategy {
    fn name(&self) -> &str {
        "email_aware"
    }

    fn chunk(&self, text: &str, ctx: &ChunkingContext) -> Result<Vec<DataChunk>> {
        let index = TokenIndex::new(ctx.tokenizer(), text);
        if index.len() == 0 {
            return Ok(Vec::new());
        }
        let sections = segment_body(text);
        let spans = accumulate(text, &index, &sections, ctx, true);
        Ok(finalize(text, &index, spans, ctx))
    }
}
