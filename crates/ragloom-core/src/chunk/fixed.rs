//! Fixed-size token windows with overlap.
//!
//! # Algorithm
//!
//! 1. Windows hold `chunk_size` tokens and advance so that consecutive
//!    windows share exactly `chunk_overlap` tokens.
//! 2. If the context respects `Paragraph`, `Line` or `Sentence`
//!    boundaries, a window end moves back to the nearest preceding
//!    boundary of that kind (paragraph first, then line, then sentence),
//!    as long as it moves at most `line_snap_tolerance` tokens and the
//!    window still extends past `start + chunk_overlap`.
//! 3. When fewer than `chunk_overlap` tokens would remain after a
//!    window, they are merged into it instead of forming a tiny tail.
//! 4. A window whose new text is whitespace only is merged into the
//!    previous window.
//!
//! Content is never trimmed, so with boundaries disabled the chunks
//! reassemble into the input byte for byte.

use crate::context::{BoundaryKind, ChunkingContext};
use crate::error::Result;
use crate::models::DataChunk;

use super::{finalize, ChunkingStrategy, Span, TokenIndex};

/// Sliding token windows, optionally snapped to line or sentence ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSizeStrategy;

impl ChunkingStrategy for FixedSizeStrategy {
    fn name(&self) -> &str {
        "fixed_size"
    }

    fn chunk(&self, text: &str, ctx: &ChunkingContext) -> Result<Vec<DataChunk>> {
        let index = TokenIndex::new(ctx.tokenizer(), text);
        if index.len() == 0 {
            return Ok(Vec::new());
        }
        let spans = windows(text, &index, 0, text.len(), ctx, &[])
            .into_iter()
            .map(|(start, end)| Span::plain(start, end, ctx.kind()))
            .collect();
        Ok(finalize(text, &index, spans, ctx))
    }
}

/// Byte spans of the token windows covering `text[from..to]`.
///
/// `protected` ranges (absolute byte offsets) are never cut: a window end
/// falling inside one moves before it, or past it when moving back would
/// eat into the overlap.
pub(crate) fn windows(
    text: &str,
    index: &TokenIndex,
    from: usize,
    to: usize,
    ctx: &ChunkingContext,
    protected: &[(usize, usize)],
) -> Vec<(usize, usize)> {
    if from >= to {
        return Vec::new();
    }
    if index.len() == 0 {
        return vec![(from, to)];
    }

    let size = ctx.chunk_size();
    let overlap = ctx.chunk_overlap();
    let first = index.token_containing(from);
    let last = index.token_at_or_after(to).max(first + 1);

    let mut token_spans = Vec::new();
    let mut start = first;
    loop {
        let mut end = (start + size).min(last);
        if end < last {
            end = snap_end(text, index, start, end, ctx);
            end = avoid_protected(index, start, end, overlap, last, protected);
            if last - end < overlap {
                end = last;
            }
        }
        token_spans.push((start, end));
        if end >= last {
            break;
        }
        let next = (start + 1).max(end - overlap);
        start = avoid_protected_start(index, start, next, protected);
    }

    let byte = |t: usize| index.offset(t).clamp(from, to);
    let mut spans: Vec<(usize, usize)> = Vec::with_capacity(token_spans.len());
    let mut leading_blank: Option<usize> = None;
    for (ts, te) in token_spans {
        let (a, b) = (byte(ts), byte(te));
        let fresh_from = spans.last().map_or(a, |prev| prev.1.max(a));
        if text[fresh_from..b].trim().is_empty() {
            match spans.last_mut() {
                Some(prev) => prev.1 = b,
                None => {
                    leading_blank.get_or_insert(a);
                }
            }
            continue;
        }
        let a = match leading_blank.take() {
            Some(blank_start) => blank_start,
            None => a,
        };
        spans.push((a, b));
    }
    spans
}

/// Move a window end back to the nearest preceding boundary the context
/// respects, within the snap tolerance.
fn snap_end(
    text: &str,
    index: &TokenIndex,
    start: usize,
    end: usize,
    ctx: &ChunkingContext,
) -> usize {
    const ORDER: [BoundaryKind; 3] = [
        BoundaryKind::Paragraph,
        BoundaryKind::Line,
        BoundaryKind::Sentence,
    ];
    if !ORDER.iter().any(|b| ctx.respects(*b)) {
        return end;
    }
    let min_end = start + ctx.chunk_overlap() + 1;
    let floor = min_end.max(end.saturating_sub(ctx.line_snap_tolerance()));
    if floor >= end {
        return end;
    }

    // Start two bytes early so a boundary exactly at `floor` is seen.
    let mut lo = index.offset(floor).saturating_sub(2);
    while !text.is_char_boundary(lo) {
        lo -= 1;
    }
    let hi = index.offset(end);
    let region = &text[lo..hi];
    for kind in ORDER.iter().filter(|b| ctx.respects(**b)) {
        for pos in boundary_positions(region, *kind).into_iter().rev() {
            let t = index.token_at_or_after(lo + pos);
            if t >= floor && t < end {
                return t;
            }
        }
    }
    end
}

/// Offsets within `region` where a new unit of `kind` begins.
fn boundary_positions(region: &str, kind: BoundaryKind) -> Vec<usize> {
    let bytes = region.as_bytes();
    match kind {
        BoundaryKind::Line => (1..bytes.len()).filter(|&p| bytes[p - 1] == b'\n').collect(),
        BoundaryKind::Paragraph => (2..bytes.len())
            .filter(|&p| {
                bytes[p - 1] == b'\n'
                    && (bytes[p - 2] == b'\n' || (p >= 3 && &bytes[p - 3..p - 1] == b"\n\r"))
            })
            .collect(),
        BoundaryKind::Sentence => {
            let mut out = Vec::new();
            let mut chars = region.char_indices().peekable();
            while let Some((_, ch)) = chars.next() {
                if matches!(ch, '.' | '!' | '?') {
                    let mut saw_space = false;
                    while let Some(&(_, next)) = chars.peek() {
                        if !next.is_whitespace() {
                            break;
                        }
                        saw_space = true;
                        chars.next();
                    }
                    if saw_space {
                        if let Some(&(p, _)) = chars.peek() {
                            out.push(p);
                        }
                    }
                }
            }
            out
        }
        BoundaryKind::Section => Vec::new(),
    }
}

fn avoid_protected(
    index: &TokenIndex,
    start: usize,
    end: usize,
    overlap: usize,
    last: usize,
    protected: &[(usize, usize)],
) -> usize {
    let cut = index.offset(end);
    match protected.iter().find(|(a, b)| *a < cut && cut < *b) {
        Some(&(a, b)) => {
            let before = index.token_containing(a);
            if before > start + overlap && index.offset(before) <= a {
                before
            } else {
                index.token_at_or_after(b).min(last)
            }
        }
        None => end,
    }
}

/// Keep an overlap start out of protected ranges: widen the overlap to
/// the range start when that stays ahead of the previous window,
/// otherwise skip past the range.
fn avoid_protected_start(
    index: &TokenIndex,
    prev_start: usize,
    start: usize,
    protected: &[(usize, usize)],
) -> usize {
    let at = index.offset(start);
    match protected.iter().find(|(a, b)| *a < at && at < *b) {
        Some(&(a, b)) => {
            let before = index.token_containing(a);
            if before > prev_start && index.offset(before) <= a {
                before
            } else {
                index.token_at_or_after(b)
            }
        }
        None => start,
    }
}
