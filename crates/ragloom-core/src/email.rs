//! Email preprocessing: header, body and signature as one chunk sequence.
//!
//! [`EmailPreprocessor::preprocess_email`] emits, in order:
//!
//! 1. exactly one `email_header` chunk (subject, sender, recipients, date),
//!    even when the email has no body;
//! 2. the body without its signature, chunked under the `email_body`
//!    strategy key;
//! 3. the signature, chunked under the `email_signature` key.
//!
//! All regions share the email's parent key (the message id, or a hash of
//! the email when it has none) and one gap-free run of sequence indices.
//! Chunk byte offsets are relative to the region they came from.
//!
//! Signature detection ([`SignatureDetector`]) scans backward from the end
//! of the body and only considers the outermost, unquoted lines, so
//! delimiters inside quoted reply chains are never mistaken for the
//! sender's signature while bottom-posted and interleaved replies still
//! have theirs found. A line is quoted when it starts with `>`, when it is
//! a reply or forward marker, or when it follows a forward marker whose
//! original message is not `>`-prefixed. A pre-detected `signature_span`
//! on the message wins over detection; an invalid span is logged and the
//! body is chunked unsegmented.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::chunk::DataChunker;
use crate::context::{
    ChunkingContextBuilder, DEFAULT_EMAIL_CHUNK_OVERLAP, DEFAULT_EMAIL_CHUNK_SIZE,
};
use crate::document::{lines, Block, BlockKind, Line, Section};
use crate::error::Result;
use crate::models::{sha256_hex, DataChunk, EmailMessage, SignatureSpan};
use crate::tokenizer::{HeuristicTokenizer, Tokenizer};

/// Default signature delimiters: the RFC 3676 `"-- "` plus common variants.
pub const DEFAULT_SIGNATURE_DELIMITERS: &[&str] = &["-- ", "--", "__"];

/// Default maximum number of non-empty signature lines.
pub const DEFAULT_MAX_SIGNATURE_LINES: usize = 12;

/// Number of leading `>` quote markers on a line.
pub fn quote_depth(line: &str) -> usize {
    let mut depth = 0;
    for ch in line.chars() {
        match ch {
            '>' => depth += 1,
            ' ' | '\t' => continue,
            _ => break,
        }
    }
    depth
}

/// Lines that introduce quoted or forwarded content.
pub fn is_reply_marker(line: &str) -> bool {
    let line = line.trim();
    (line.starts_with("On ") && line.ends_with("wrote:")) || is_forward_marker(line)
}

/// Outlook-style and forwarded-message separators.
fn is_forward_marker(line: &str) -> bool {
    let lower = line.trim().to_ascii_lowercase();
    lower.contains("-----original message-----")
        || lower.starts_with("---------- forwarded message")
        || lower.starts_with("begin forwarded message")
}

/// Quote status of every line in `text`.
///
/// Marker lines are quoted. An attribution line ("On ... wrote:") only
/// covers the `>` run below it, so text after that run is the author's
/// again. A forward marker not followed by `>` lines quotes everything
/// after it.
fn quoted_lines(text: &str, lines: &[Line]) -> Vec<bool> {
    let raw = |i: usize| &text[lines[i].start..lines[i].end];
    let mut quoted = vec![false; lines.len()];
    let mut i = 0;
    while i < lines.len() {
        let line = raw(i);
        if quote_depth(line) > 0 {
            quoted[i] = true;
        } else if is_reply_marker(line) {
            quoted[i] = true;
            let next = (i + 1..lines.len()).find(|&j| !raw(j).trim().is_empty());
            match next {
                Some(j) if quote_depth(raw(j)) > 0 => {
                    quoted[i + 1..j].iter_mut().for_each(|q| *q = true);
                    i = j;
                    continue;
                }
                Some(_) if is_forward_marker(line) => {
                    quoted[i + 1..].iter_mut().for_each(|q| *q = true);
                    break;
                }
                _ => {}
            }
        }
        i += 1;
    }
    quoted
}

/// Split an email body into author and quoted sections of paragraphs.
///
/// Quote status follows [`quoted_lines`]. Paragraphs break at blank lines
/// and at quote-status changes.
pub(crate) fn segment_body(text: &str) -> Vec<Section> {
    let lines = lines(text);
    let quoted_flags = quoted_lines(text, &lines);
    let mut sections: Vec<Section> = Vec::new();
    let mut paragraph: Option<(usize, usize, bool)> = None;

    let flush = |paragraph: &mut Option<(usize, usize, bool)>, sections: &mut Vec<Section>| {
        if let Some((start, end, quoted)) = paragraph.take() {
            let block = Block {
                kind: BlockKind::Paragraph,
                start,
                end,
            };
            match sections.last_mut() {
                Some(section) if section.quoted == quoted => section.blocks.push(block),
                _ => sections.push(Section {
                    title: None,
                    quoted,
                    blocks: vec![block],
                }),
            }
        }
    };

    for (line, &quoted) in lines.iter().zip(&quoted_flags) {
        if text[line.start..line.end].trim().is_empty() {
            flush(&mut paragraph, &mut sections);
            continue;
        }
        match paragraph.as_mut() {
            Some((_, end, q)) if *q == quoted => *end = line.end,
            _ => {
                flush(&mut paragraph, &mut sections);
                paragraph = Some((line.start, line.end, quoted));
            }
        }
    }
    flush(&mut paragraph, &mut sections);
    sections
}

/// Location of a signature within a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureSplit {
    /// Body text before the signature delimiter: `body[..body_end]`.
    pub body_end: usize,
    /// Signature text, delimiter excluded.
    pub signature: SignatureSpan,
    /// Quoted reply text after the signature starts here, if any.
    pub rest_start: Option<usize>,
}

/// Finds the sender's signature block in an email body.
#[derive(Debug, Clone)]
pub struct SignatureDetector {
    delimiters: Vec<String>,
    max_lines: usize,
}

impl SignatureDetector {
    /// Build a detector from delimiter patterns.
    ///
    /// Patterns may be backslash-escaped (`\-\-` matches `--`); a pattern
    /// that is empty after unescaping is ignored.
    pub fn new<S: AsRef<str>>(patterns: &[S], max_lines: usize) -> Self {
        let delimiters = patterns
            .iter()
            .map(|p| unescape(p.as_ref()))
            .filter(|p| !p.trim().is_empty())
            .collect();
        Self {
            delimiters,
            max_lines: max_lines.max(1),
        }
    }

    pub fn delimiters(&self) -> &[String] {
        &self.delimiters
    }

    fn is_delimiter(&self, line: &str) -> bool {
        self.delimiters
            .iter()
            .any(|d| line == d || line.trim_end() == d.trim_end())
    }

    /// Locate the signature in `body`, if any.
    ///
    /// The last unquoted delimiter line wins; its signature runs to the
    /// next quoted line or the end of the body.
    pub fn detect(&self, body: &str) -> Option<SignatureSplit> {
        let lines = lines(body);
        let quoted = quoted_lines(body, &lines);

        for i in (0..lines.len()).rev() {
            if quoted[i] || !self.is_delimiter(&body[lines[i].start..lines[i].end]) {
                continue;
            }
            let sig_end = (i + 1..lines.len())
                .find(|&j| quoted[j])
                .unwrap_or(lines.len());
            let sig_lines = (i + 1..sig_end)
                .filter(|&j| !body[lines[j].start..lines[j].end].trim().is_empty())
                .count();
            if sig_lines == 0 || sig_lines > self.max_lines {
                continue;
            }
            let sig_start = lines[i].next;
            let sig_stop = if sig_end > i + 1 {
                lines[sig_end - 1].end
            } else {
                sig_start
            };
            return Some(SignatureSplit {
                body_end: lines[i].start,
                signature: SignatureSpan {
                    start: sig_start,
                    end: sig_stop,
                },
                rest_start: (sig_end < lines.len()).then(|| lines[sig_end].start),
            });
        }
        None
    }
}

impl Default for SignatureDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNATURE_DELIMITERS, DEFAULT_MAX_SIGNATURE_LINES)
    }
}

fn unescape(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Validate a caller-supplied signature span against the body.
fn validate_span(body: &str, span: SignatureSpan) -> std::result::Result<SignatureSplit, String> {
    if span.start > span.end || span.end > body.len() {
        return Err(format!(
            "span {}..{} outside body of {} bytes",
            span.start,
            span.end,
            body.len()
        ));
    }
    if !body.is_char_boundary(span.start) || !body.is_char_boundary(span.end) {
        return Err(format!(
            "span {}..{} is not on a character boundary",
            span.start, span.end
        ));
    }
    Ok(SignatureSplit {
        body_end: span.start,
        signature: span,
        rest_start: (span.end < body.len()).then_some(span.end),
    })
}

/// Crude HTML to text conversion for bodies that have no plain part.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(open) = rest.find('<') {
        out.push_str(&decode_entities(&rest[..open]));
        let after = &rest[open..];
        let close = match after.find('>') {
            Some(i) => i,
            None => {
                rest = "";
                break;
            }
        };
        let tag = after[1..close].trim().to_ascii_lowercase();
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        rest = &after[close + 1..];

        if !tag.starts_with('/') && (name == "script" || name == "style") {
            let end_tag = format!("</{}", name);
            rest = match rest.to_ascii_lowercase().find(&end_tag) {
                Some(i) => {
                    let tail = &rest[i..];
                    tail.find('>').map_or("", |j| &tail[j + 1..])
                }
                None => "",
            };
            continue;
        }
        match name.as_str() {
            "br" => out.push('\n'),
            "p" | "div" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "blockquote"
                if tag.starts_with('/') =>
            {
                out.push_str("\n\n")
            }
            "li" if !tag.starts_with('/') => out.push_str("\n- "),
            _ => {}
        }
    }
    out.push_str(&decode_entities(rest));

    let mut text = String::with_capacity(out.len());
    let mut blank_run = 0;
    for line in out.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        text.push_str(line);
        text.push('\n');
    }
    text.trim().to_string()
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Render the header region of an email.
pub fn format_header(email: &EmailMessage) -> String {
    let mut lines = vec![
        format!(
            "Subject: {}",
            non_blank(&email.subject).unwrap_or("(no subject)")
        ),
        format!(
            "From: {}",
            non_blank(&email.sender).unwrap_or("(unknown sender)")
        ),
    ];
    if !email.recipients.is_empty() {
        lines.push(format!("To: {}", email.recipients.join(", ")));
    }
    if !email.cc.is_empty() {
        lines.push(format!("Cc: {}", email.cc.join(", ")));
    }
    if let Some(date) = non_blank(&email.date_sent) {
        lines.push(format!("Date: {}", date));
    }
    lines.join("\n")
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Parent key shared by every chunk of `email`.
pub fn email_parent_id(email: &EmailMessage) -> String {
    match non_blank(&email.message_id) {
        Some(id) => id.to_string(),
        None => {
            let fingerprint = format!(
                "{}\u{1f}{}\u{1f}{}\u{1f}{}",
                email.subject.as_deref().unwrap_or(""),
                email.sender.as_deref().unwrap_or(""),
                email.date_sent.as_deref().unwrap_or(""),
                email
                    .body_text
                    .as_deref()
                    .or(email.body_html.as_deref())
                    .unwrap_or("")
            );
            format!("email:{}", sha256_hex(&fingerprint))
        }
    }
}

/// Turns emails into ordered header/body/signature chunk sequences.
pub struct EmailPreprocessor {
    chunker: Arc<DataChunker>,
    detector: SignatureDetector,
    body_chunk_size: usize,
    body_chunk_overlap: usize,
    tokenizer: Arc<dyn Tokenizer>,
}

impl EmailPreprocessor {
    pub fn new(chunker: Arc<DataChunker>) -> Self {
        Self {
            chunker,
            detector: SignatureDetector::default(),
            body_chunk_size: DEFAULT_EMAIL_CHUNK_SIZE,
            body_chunk_overlap: DEFAULT_EMAIL_CHUNK_OVERLAP,
            tokenizer: Arc::new(HeuristicTokenizer::default()),
        }
    }

    pub fn with_detector(mut self, detector: SignatureDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Window used for body and signature chunks.
    pub fn with_body_window(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.body_chunk_size = chunk_size;
        self.body_chunk_overlap = chunk_overlap;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn detector(&self) -> &SignatureDetector {
        &self.detector
    }

    /// Chunk one email: header, body, then signature, with sequence
    /// indices running from `start_sequence_idx` without gaps.
    pub fn preprocess_email(
        &self,
        email: &EmailMessage,
        start_sequence_idx: usize,
    ) -> Result<Vec<DataChunk>> {
        let parent_id = email_parent_id(email);
        let info = email.info();
        let source = email
            .folder
            .as_deref()
            .map(|f| format!("{}/{}", f, parent_id))
            .unwrap_or_else(|| parent_id.clone());

        let mut chunks = Vec::new();

        let header = format_header(email);
        let header_ctx = ChunkingContextBuilder::for_email_header()
            .with_chunk_size(DEFAULT_EMAIL_CHUNK_SIZE.max(self.tokenizer.count(&header) + 1))
            .with_parent_id(parent_id.clone())
            .with_source(source.clone())
            .with_start_sequence_index(start_sequence_idx)
            .with_email_info(info.clone())
            .with_tokenizer(self.tokenizer.clone())
            .build()?;
        chunks.extend(self.chunker.chunk(&header, &header_ctx)?);

        if let Some(body) = body_of(email) {
            let (body_text, signature) = self.split_signature(email, &body);

            if !body_text.trim().is_empty() {
                let ctx = ChunkingContextBuilder::for_email_body()
                    .with_chunk_size(self.body_chunk_size)
                    .with_overlap(self.body_chunk_overlap)
                    .with_parent_id(parent_id.clone())
                    .with_source(source.clone())
                    .with_start_sequence_index(start_sequence_idx + chunks.len())
                    .with_email_info(info.clone())
                    .with_tokenizer(self.tokenizer.clone())
                    .build()?;
                chunks.extend(self.chunker.chunk(&body_text, &ctx)?);
            }

            if let Some(signature) = signature.filter(|s| !s.trim().is_empty()) {
                let ctx = ChunkingContextBuilder::for_email_signature()
                    .with_chunk_size(self.body_chunk_size)
                    .with_parent_id(parent_id.clone())
                    .with_source(source.clone())
                    .with_start_sequence_index(start_sequence_idx + chunks.len())
                    .with_email_info(info)
                    .with_tokenizer(self.tokenizer.clone())
                    .build()?;
                chunks.extend(self.chunker.chunk(&signature, &ctx)?);
            }
        }

        let total = chunks.len();
        for chunk in &mut chunks {
            chunk.metadata.total_chunks = total;
        }
        debug!(email = %parent_id, chunks = total, "preprocessed email");
        Ok(chunks)
    }

    /// Chunk several emails; each restarts at `start_sequence_idx` under
    /// its own parent key, and output keeps the input order.
    pub fn preprocess_emails(
        &self,
        emails: &[EmailMessage],
        start_sequence_idx: usize,
    ) -> Result<Vec<DataChunk>> {
        let mut out = Vec::new();
        for email in emails {
            out.extend(self.preprocess_email(email, start_sequence_idx)?);
        }
        Ok(out)
    }

    /// Body text without the signature, and the signature text.
    fn split_signature(&self, email: &EmailMessage, body: &str) -> (String, Option<String>) {
        let split = match email.signature_span {
            Some(span) => match validate_span(body, span) {
                Ok(split) => Some(split),
                Err(reason) => {
                    warn!(
                        email = ?email.message_id,
                        %reason,
                        "ignoring invalid signature span; body left unsegmented"
                    );
                    None
                }
            },
            None => self.detector.detect(body),
        };

        match split {
            Some(split) => {
                let head = body[..split.body_end].trim_end();
                let signature = body[split.signature.start..split.signature.end]
                    .trim()
                    .to_string();
                let body_text = match split.rest_start {
                    Some(rest) if !body[rest..].trim().is_empty() => {
                        format!("{}\n\n{}", head, body[rest..].trim_start())
                    }
                    _ => head.to_string(),
                };
                (body_text.trim().to_string(), Some(signature))
            }
            None => (body.trim().to_string(), None),
        }
    }
}

/// Plain body, falling back to the HTML body converted to text.
fn body_of(email: &EmailMessage) -> Option<String> {
    if let Some(text) = email.body_text.as_deref().filter(|t| !t.trim().is_empty()) {
        return Some(text.to_string());
    }
    email
        .body_html
        .as_deref()
        .map(html_to_text)
        .filter(|t| !t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkKind;
    use crate::tokenizer::WordTokenizer;

    fn preprocessor() -> EmailPreprocessor {
        EmailPreprocessor::new(Arc::new(DataChunker::new()))
    }

    fn email(body: &str) -> EmailMessage {
        EmailMessage {
            message_id: Some("<msg-1@example.com>".into()),
            subject: Some("Quarterly numbers".into()),
            sender: Some("John Doe <john@example.com>".into()),
            recipients: vec!["team@example.com".into()],
            date_sent: Some("2024-03-01T09:30:00Z".into()),
            body_text: Some(body.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_header_body_signature() {
        let pre = EmailPreprocessor::new(Arc::new(DataChunker::new()))
            .with_detector(SignatureDetector::new(&["--"], 12));
        let chunks = pre
            .preprocess_email(&email("Hello\n--\nJohn Doe"), 0)
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].metadata.kind, ChunkKind::EmailHeader);
        assert_eq!(chunks[1].metadata.kind, ChunkKind::EmailBody);
        assert_eq!(chunks[1].content, "Hello");
        assert_eq!(chunks[2].metadata.kind, ChunkKind::EmailSignature);
        assert_eq!(chunks[2].content, "John Doe");
        let seq: Vec<usize> = chunks.iter().map(|c| c.sequence_index).collect();
        assert_eq!(seq, vec![0, 1, 2]);
        assert!(chunks.iter().all(|c| c.parent_id == "<msg-1@example.com>"));
        assert!(chunks.iter().all(|c| c.metadata.total_chunks == 3));
    }

    #[test]
    fn test_header_always_emitted() {
        let mut e = email("");
        e.body_text = None;
        let chunks = preprocessor().preprocess_email(&e, 7).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sequence_index, 7);
        assert!(chunks[0].content.starts_with("Subject: Quarterly numbers"));
        assert!(chunks[0].content.contains("To: team@example.com"));
    }

    #[test]
    fn test_no_subject_placeholder() {
        let e = EmailMessage::default();
        let header = format_header(&e);
        assert!(header.starts_with("Subject: (no subject)"));
    }

    #[test]
    fn test_quoted_delimiter_is_not_signature() {
        let body = "Sounds good.\n\nOn Tue, Jane wrote:\n> Draft attached.\n> --\n> Jane Roe";
        let detector = SignatureDetector::default();
        assert!(detector.detect(body).is_none());
    }

    #[test]
    fn test_signature_before_reply_chain() {
        let body = "Thanks, will do.\n-- \nJohn\nACME Corp\n\n\
                    On Tue, Jane wrote:\n> Can you review?\n> --\n> Jane";
        let split = SignatureDetector::default().detect(body).unwrap();
        assert_eq!(&body[..split.body_end], "Thanks, will do.\n");
        assert_eq!(
            &body[split.signature.start..split.signature.end],
            "John\nACME Corp\n"
        );
        let chunks = preprocessor().preprocess_email(&email(body), 0).unwrap();
        let kinds: Vec<ChunkKind> = chunks.iter().map(|c| c.metadata.kind).collect();
        assert_eq!(kinds.first(), Some(&ChunkKind::EmailHeader));
        assert_eq!(kinds.last(), Some(&ChunkKind::EmailSignature));
        let signature = chunks.last().unwrap();
        assert_eq!(signature.content, "John\nACME Corp");
        let body_text: String = chunks
            .iter()
            .filter(|c| c.metadata.kind == ChunkKind::EmailBody)
            .map(|c| c.content.as_str())
            .collect();
        assert!(body_text.contains("Can you review?"));
        assert!(!body_text.contains("ACME"));
    }

    #[test]
    fn test_escaped_delimiter_pattern() {
        let detector = SignatureDetector::new(&["\\-\\-\\-"], 5);
        assert_eq!(detector.delimiters(), &["---".to_string()]);
        let split = detector.detect("Body\n---\nSig line").unwrap();
        assert_eq!(split.body_end, 5);
    }

    #[test]
    fn test_long_trailing_block_is_not_signature() {
        let mut body = String::from("Intro\n--\n");
        for i in 0..20 {
            body.push_str(&format!("line {}\n", i));
        }
        assert!(SignatureDetector::default().detect(&body).is_none());
    }

    #[test]
    fn test_invalid_span_fails_open() {
        let mut e = email("Hello there\nRegards");
        e.signature_span = Some(SignatureSpan { start: 4, end: 400 });
        let chunks = preprocessor().preprocess_email(&e, 0).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].content, "Hello there\nRegards");
    }

    #[test]
    fn test_supplied_span_wins() {
        let mut e = email("Hello there\nRegards, Ann");
        e.signature_span = Some(SignatureSpan { start: 12, end: 24 });
        let chunks = preprocessor().preprocess_email(&e, 0).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].content, "Hello there");
        assert_eq!(chunks[2].content, "Regards, Ann");
    }

    #[test]
    fn test_html_only_body() {
        let mut e = email("");
        e.body_text = None;
        e.body_html = Some(
            "<html><style>p{}</style><p>Hi &amp; welcome</p><p>Second<br>line</p></html>".into(),
        );
        let chunks = preprocessor().preprocess_email(&e, 0).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].content, "Hi & welcome\n\nSecond\nline");
    }

    #[test]
    fn test_preprocess_emails_restart_indices_per_email() {
        let mut second = email("Another body");
        second.message_id = Some("<msg-2@example.com>".into());
        let pre = preprocessor().with_tokenizer(Arc::new(WordTokenizer));
        let chunks = pre
            .preprocess_emails(&[email("First body"), second], 0)
            .unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].parent_id, "<msg-1@example.com>");
        assert_eq!(chunks[2].parent_id, "<msg-2@example.com>");
        assert_eq!(chunks[2].sequence_index, 0);
        assert_ne!(chunks[0].chunk_id, chunks[2].chunk_id);
    }

    #[test]
    fn test_parent_id_without_message_id_is_stable() {
        let mut e = email("body");
        e.message_id = None;
        assert_eq!(email_parent_id(&e), email_parent_id(&e.clone()));
        assert!(email_parent_id(&e).starts_with("email:"));
    }

    #[test]
    fn test_segment_body_groups_quotes() {
        let body = "My reply.\n\nMore reply.\n> quoted one\n> quoted two\n\nTrailing.";
        let sections = segment_body(body);
        let flags: Vec<bool> = sections.iter().map(|s| s.quoted).collect();
        assert_eq!(flags, vec![false, true, false]);
        assert_eq!(sections[0].blocks.len(), 2);
    }

    #[test]
    fn test_bottom_posted_reply_keeps_signature() {
        let body = "On Mon, Ann wrote:\n> Can we meet Thursday?\n\n\
                    Yes, Thursday works.\n-- \nJohn Doe\nACME";
        let split = SignatureDetector::default().detect(body).unwrap();
        assert_eq!(
            &body[split.signature.start..split.signature.end],
            "John Doe\nACME"
        );
        assert_eq!(split.rest_start, None);

        let chunks = preprocessor().preprocess_email(&email(body), 0).unwrap();
        let signature = chunks.last().unwrap();
        assert_eq!(signature.metadata.kind, ChunkKind::EmailSignature);
        assert_eq!(signature.content, "John Doe\nACME");

        let author = chunks
            .iter()
            .find(|c| c.content == "Yes, Thursday works.")
            .unwrap();
        assert_eq!(author.metadata.kind, ChunkKind::EmailBody);
        assert!(!author.metadata.quoted);
        let quoted = chunks
            .iter()
            .find(|c| c.content.contains("Can we meet Thursday?"))
            .unwrap();
        assert!(quoted.metadata.quoted);
        assert!(chunks.iter().all(|c| !c.content.contains("-- ")));
    }

    #[test]
    fn test_interleaved_reply_signature_and_sections() {
        let body = "On Mon, Ann wrote:\n> Can we meet Thursday?\n\nYes, Thursday works.\n\n\
                    > And the budget?\n\nStill waiting on finance.\n\n-- \nJohn Doe";
        let split = SignatureDetector::default().detect(body).unwrap();
        assert_eq!(&body[split.signature.start..split.signature.end], "John Doe");

        let head = &body[..split.body_end];
        let flags: Vec<bool> = segment_body(head).iter().map(|s| s.quoted).collect();
        assert_eq!(flags, vec![true, false, true, false]);
    }

    #[test]
    fn test_delimiter_inside_unquoted_original_is_ignored() {
        let body = "See below.\n\n-----Original Message-----\nFrom: Ann\nSent: Monday\n\n\
                    Please send it.\n--\nAnn";
        assert!(SignatureDetector::default().detect(body).is_none());
        let flags: Vec<bool> = segment_body(body).iter().map(|s| s.quoted).collect();
        assert_eq!(flags, vec![false, true]);
    }

    #[test]
    fn test_attribution_without_quotes_only_marks_itself() {
        let body = "On Mon, Ann wrote:\nNothing quoted here.";
        let flags: Vec<bool> = segment_body(body).iter().map(|s| s.quoted).collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn test_quote_depth() {
        assert_eq!(quote_depth("> > nested"), 2);
        assert_eq!(quote_depth("plain > not quote"), 0);
    }
}
