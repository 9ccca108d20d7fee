//! Lightweight structural parser for plain text, Markdown and LaTeX.
//!
//! Produces a [`Document`]: an ordered list of [`Section`]s, each holding
//! [`Block`]s that carry their byte span in the source text. Blocks never
//! overlap and never include the blank lines that separate them, so a
//! chunk built from consecutive blocks is always a contiguous slice of
//! the source.
//!
//! Recognised structure:
//!
//! - **Markdown**: ATX headings (`#`..`######`), fenced code (```` ``` ````
//!   or `~~~`), display math (`$$ … $$`), reference/footnote definitions
//!   (`[@key]: …`, `[^1]: …`).
//! - **LaTeX**: `\chapter`, `\section`, `\subsection`, `\subsubsection`,
//!   `\paragraph` headings; `equation`, `align`, `gather`, `multline`,
//!   `eqnarray`, `displaymath` environments plus `\[ … \]` and `$$ … $$`;
//!   `verbatim`, `lstlisting`, `minted` code; `\bibitem` entries.
//! - **Plain**: paragraphs separated by blank lines, one section.

use serde::{Deserialize, Serialize};

/// Markup of a text span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    #[default]
    Plain,
    Markdown,
    Latex,
}

impl TextFormat {
    /// Guess the format from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "md" | "markdown" | "mdx" => TextFormat::Markdown,
            "tex" | "latex" => TextFormat::Latex,
            _ => TextFormat::Plain,
        }
    }
}

/// Structural kind of a [`Block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Heading,
    Paragraph,
    Equation,
    Citation,
    Code,
}

impl BlockKind {
    /// Atomic blocks are never split across chunks.
    pub fn is_atomic(&self) -> bool {
        matches!(
            self,
            BlockKind::Equation | BlockKind::Citation | BlockKind::Code
        )
    }
}

/// A structural unit with its byte span `[start, end)` in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub start: usize,
    pub end: usize,
}

/// A run of blocks under one heading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub title: Option<String>,
    /// Set for quoted reply text in emails.
    pub quoted: bool,
    pub blocks: Vec<Block>,
}

/// Parsed document tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub sections: Vec<Section>,
}

impl Document {
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.sections.iter().flat_map(|s| s.blocks.iter())
    }
}

/// A source line: `start..end` excludes the line terminator, `next` is
/// the offset of the following line.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Line {
    pub start: usize,
    pub end: usize,
    pub next: usize,
}

pub(crate) fn lines(text: &str) -> Vec<Line> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        let (end, next) = match text[pos..].find('\n') {
            Some(i) => (pos + i, pos + i + 1),
            None => (text.len(), text.len()),
        };
        let end = if end > pos && text.as_bytes()[end - 1] == b'\r' {
            end - 1
        } else {
            end
        };
        out.push(Line {
            start: pos,
            end,
            next,
        });
        pos = next;
    }
    out
}

/// Parse `text` into sections and blocks.
pub fn parse(text: &str, format: TextFormat) -> Document {
    let lines = lines(text);
    let mut builder = TreeBuilder::default();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let raw = &text[line.start..line.end];
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            builder.flush_paragraph();
            i += 1;
            continue;
        }

        if let Some(title) = heading_title(trimmed, format) {
            builder.flush_paragraph();
            builder.open_section(title);
            builder.push(BlockKind::Heading, line.start, line.end);
            i += 1;
            continue;
        }

        if let Some((kind, closer)) = block_opener(trimmed, format) {
            builder.flush_paragraph();
            let last = find_closing_line(text, &lines, i, trimmed, &closer);
            builder.push(kind, line.start, lines[last].end);
            i = last + 1;
            continue;
        }

        if is_citation_line(trimmed, format) {
            builder.flush_paragraph();
            let mut last = i;
            if format == TextFormat::Latex {
                // a \bibitem runs until a blank line, the next entry, or an environment end
                while last + 1 < lines.len() {
                    let next = text[lines[last + 1].start..lines[last + 1].end].trim();
                    if next.is_empty()
                        || next.starts_with("\\bibitem")
                        || next.starts_with("\\end{")
                    {
                        break;
                    }
                    last += 1;
                }
            }
            builder.push(BlockKind::Citation, line.start, lines[last].end);
            i = last + 1;
            continue;
        }

        builder.extend_paragraph(line.start, line.end);
        i += 1;
    }

    builder.finish()
}

#[derive(Default)]
struct TreeBuilder {
    sections: Vec<Section>,
    current: Section,
    paragraph: Option<(usize, usize)>,
}

impl TreeBuilder {
    fn flush_paragraph(&mut self) {
        if let Some((start, end)) = self.paragraph.take() {
            self.current.blocks.push(Block {
                kind: BlockKind::Paragraph,
                start,
                end,
            });
        }
    }

    fn extend_paragraph(&mut self, start: usize, end: usize) {
        match &mut self.paragraph {
            Some((_, e)) => *e = end,
            None => self.paragraph = Some((start, end)),
        }
    }

    fn push(&mut self, kind: BlockKind, start: usize, end: usize) {
        self.current.blocks.push(Block { kind, start, end });
    }

    fn open_section(&mut self, title: String) {
        let previous = std::mem::replace(
            &mut self.current,
            Section {
                title: Some(title),
                quoted: false,
                blocks: Vec::new(),
            },
        );
        if !previous.blocks.is_empty() {
            self.sections.push(previous);
        }
    }

    fn finish(mut self) -> Document {
        self.flush_paragraph();
        if !self.current.blocks.is_empty() {
            self.sections.push(self.current);
        }
        Document {
            sections: self.sections,
        }
    }
}

fn heading_title(line: &str, format: TextFormat) -> Option<String> {
    match format {
        TextFormat::Markdown => {
            let hashes = line.chars().take_while(|c| *c == '#').count();
            if (1..=6).contains(&hashes) {
                let rest = &line[hashes..];
                if rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t') {
                    return Some(rest.trim().trim_end_matches('#').trim().to_string());
                }
            }
            None
        }
        TextFormat::Latex => {
            const COMMANDS: &[&str] = &[
                "\\chapter",
                "\\section",
                "\\subsection",
                "\\subsubsection",
                "\\paragraph",
            ];
            for cmd in COMMANDS {
                if let Some(rest) = line.strip_prefix(cmd) {
                    let rest = rest.strip_prefix('*').unwrap_or(rest);
                    if rest.starts_with('{') {
                        return Some(braced_argument(rest).unwrap_or_default());
                    }
                }
            }
            None
        }
        TextFormat::Plain => None,
    }
}

/// Content of the leading `{…}` group, honouring nested braces.
pub(crate) fn braced_argument(s: &str) -> Option<String> {
    let mut depth = 0usize;
    for (i, ch) in s.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(s[1..i].trim().to_string());
                }
            }
            _ => {}
        }
    }
    None
}

const LATEX_MATH_ENVS: &[&str] = &[
    "equation",
    "equation*",
    "align",
    "align*",
    "gather",
    "gather*",
    "multline",
    "multline*",
    "eqnarray",
    "eqnarray*",
    "displaymath",
];

const LATEX_CODE_ENVS: &[&str] = &["verbatim", "lstlisting", "minted"];

/// Kind and closing marker of a multi-line atomic block opened on this line.
fn block_opener(line: &str, format: TextFormat) -> Option<(BlockKind, String)> {
    match format {
        TextFormat::Markdown => {
            if line.starts_with("```") || line.starts_with("~~~") {
                return Some((BlockKind::Code, line[..3].to_string()));
            }
            if line.starts_with("$$") {
                return Some((BlockKind::Equation, "$$".to_string()));
            }
            None
        }
        TextFormat::Latex => {
            if let Some(rest) = line.strip_prefix("\\begin{") {
                let env = rest.split('}').next().unwrap_or("");
                let closer = format!("\\end{{{}}}", env);
                if LATEX_MATH_ENVS.contains(&env) {
                    return Some((BlockKind::Equation, closer));
                }
                if LATEX_CODE_ENVS.contains(&env) {
                    return Some((BlockKind::Code, closer));
                }
                return None;
            }
            if line.starts_with("\\[") {
                return Some((BlockKind::Equation, "\\]".to_string()));
            }
            if line.starts_with("$$") {
                return Some((BlockKind::Equation, "$$".to_string()));
            }
            None
        }
        TextFormat::Plain => None,
    }
}

/// Index of the line closing the block opened at `open`. An unclosed
/// block runs to the end of the text.
fn find_closing_line(text: &str, lines: &[Line], open: usize, opener: &str, closer: &str) -> usize {
    // opener and closer on the same line, e.g. `$$ x $$` or `\[ x \]`
    let marker_len = if opener.starts_with("\\begin{") {
        opener.find('}').map(|i| i + 1).unwrap_or(opener.len())
    } else {
        closer.len().min(opener.len())
    };
    if opener[marker_len..].contains(closer) {
        return open;
    }
    for (j, line) in lines.iter().enumerate().skip(open + 1) {
        if text[line.start..line.end].contains(closer) {
            return j;
        }
    }
    lines.len() - 1
}

fn is_citation_line(line: &str, format: TextFormat) -> bool {
    match format {
        TextFormat::Markdown => {
            (line.starts_with("[@") || line.starts_with("[^"))
                && line.find("]:").is_some_and(|i| i > 2)
        }
        TextFormat::Latex => line.starts_with("\\bibitem"),
        TextFormat::Plain => false,
    }
}

/// Byte ranges of inline citations (`\cite{…}` family, `[@key]`) inside
/// `text[start..end]`, as absolute offsets.
pub(crate) fn inline_citations(text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let slice = &text[start..end];
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < slice.len() {
        let rest = &slice[pos..];
        let next_cite = rest.find("\\cite");
        let next_key = rest.find("[@");
        let (offset, is_latex) = match (next_cite, next_key) {
            (Some(a), Some(b)) if a <= b => (a, true),
            (Some(a), None) => (a, true),
            (_, Some(b)) => (b, false),
            (None, None) => break,
        };
        let begin = pos + offset;
        let close = if is_latex {
            slice[begin..].find('}').map(|i| begin + i + 1)
        } else {
            slice[begin..].find(']').map(|i| begin + i + 1)
        };
        match close {
            Some(stop) => {
                out.push((start + begin, start + stop));
                pos = stop;
            }
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(doc: &Document) -> Vec<BlockKind> {
        doc.blocks().map(|b| b.kind).collect()
    }

    #[test]
    fn test_plain_paragraphs() {
        let text = "First line\nstill first.\n\nSecond.\n";
        let doc = parse(text, TextFormat::Plain);
        assert_eq!(doc.sections.len(), 1);
        let blocks: Vec<&str> = doc.blocks().map(|b| &text[b.start..b.end]).collect();
        assert_eq!(blocks, vec!["First line\nstill first.", "Second."]);
    }

    #[test]
    fn test_markdown_sections_and_code() {
        let text = "# Intro\n\nHello.\n\n## Usage\n\n```rust\nfn main() {}\n\nlet x = 1;\n```\n\nDone.";
        let doc = parse(text, TextFormat::Markdown);
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.sections[0].title.as_deref(), Some("Intro"));
        assert_eq!(doc.sections[1].title.as_deref(), Some("Usage"));
        assert_eq!(
            kinds(&doc),
            vec![
                BlockKind::Heading,
                BlockKind::Paragraph,
                BlockKind::Heading,
                BlockKind::Code,
                BlockKind::Paragraph
            ]
        );
        let code = doc.sections[1].blocks[1];
        assert!(text[code.start..code.end].ends_with("```"));
        assert!(text[code.start..code.end].contains("\n\nlet x"));
    }

    #[test]
    fn test_markdown_math_and_references() {
        let text = "Text.\n$$\nE = mc^2\n$$\n[@knuth]: The Art of Computer Programming";
        let doc = parse(text, TextFormat::Markdown);
        assert_eq!(
            kinds(&doc),
            vec![BlockKind::Paragraph, BlockKind::Equation, BlockKind::Citation]
        );
    }

    #[test]
    fn test_latex_structure() {
        let text = "\\section{Background}\nWe cite \\cite{lamport}.\n\\begin{equation}\na^2 + b^2 = c^2\n\\end{equation}\n\\subsection*{Proof}\n\\[ x = 1 \\]\n\\begin{thebibliography}{9}\n\\bibitem{lamport} L. Lamport,\nLaTeX.\n\\end{thebibliography}";
        let doc = parse(text, TextFormat::Latex);
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.sections[0].title.as_deref(), Some("Background"));
        assert_eq!(doc.sections[1].title.as_deref(), Some("Proof"));
        assert_eq!(
            kinds(&doc),
            vec![
                BlockKind::Heading,
                BlockKind::Paragraph,
                BlockKind::Equation,
                BlockKind::Heading,
                BlockKind::Equation,
                BlockKind::Paragraph,
                BlockKind::Citation,
                BlockKind::Paragraph,
            ]
        );
        let bib = doc.blocks().find(|b| b.kind == BlockKind::Citation).unwrap();
        assert_eq!(&text[bib.start..bib.end], "\\bibitem{lamport} L. Lamport,\nLaTeX.");
    }

    #[test]
    fn test_unclosed_fence_runs_to_end() {
        let text = "```\ncode\nmore";
        let doc = parse(text, TextFormat::Markdown);
        assert_eq!(kinds(&doc), vec![BlockKind::Code]);
        assert_eq!(doc.sections[0].blocks[0].end, text.len());
    }

    #[test]
    fn test_inline_citations() {
        let text = "See \\citep{a, b} and [@smith2020] for details.";
        let spans = inline_citations(text, 0, text.len());
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[0].0..spans[0].1], "\\citep{a, b}");
        assert_eq!(&text[spans[1].0..spans[1].1], "[@smith2020]");
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(TextFormat::from_extension("MD"), TextFormat::Markdown);
        assert_eq!(TextFormat::from_extension("tex"), TextFormat::Latex);
        assert_eq!(TextFormat::from_extension("txt"), TextFormat::Plain);
    }
}
