//! Core data models for Ragloom.
//!
//! These types flow through the pipeline:
//!
//! ```text
//! text / EmailMessage → DataChunker → DataChunk → Embedder → VectorStore
//!                                                               ↓
//!                                     Retriever → SearchResult ←┘
//! ```
//!
//! Chunk metadata is a typed struct with an open extension bag. When a
//! chunk is stored it is flattened into a JSON object (see
//! [`DataChunk::metadata_map`]); that object is what filters match
//! against and what search results carry back.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Metadata keys written by the pipeline itself. Extension metadata may
/// not use them.
pub const RESERVED_METADATA_KEYS: &[&str] = &[
    "type",
    "source_document",
    "parent_id",
    "sequence_index",
    "chunk_size",
    "total_chunks",
    "section_title",
    "page_number",
    "created_at",
    "quoted",
    "email_subject",
    "email_sender",
    "email_recipients",
    "email_date",
    "email_id",
    "email_thread_id",
    "email_folder",
];

/// Structural kind of a chunk, stored under the `type` metadata key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Text,
    Paragraph,
    Equation,
    Citation,
    Code,
    EmailHeader,
    EmailBody,
    EmailSignature,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Text => "text",
            ChunkKind::Paragraph => "paragraph",
            ChunkKind::Equation => "equation",
            ChunkKind::Citation => "citation",
            ChunkKind::Code => "code",
            ChunkKind::EmailHeader => "email_header",
            ChunkKind::EmailBody => "email_body",
            ChunkKind::EmailSignature => "email_signature",
        }
    }

    /// Equations, citations and code are never split across chunks.
    pub fn is_atomic(&self) -> bool {
        matches!(
            self,
            ChunkKind::Equation | ChunkKind::Citation | ChunkKind::Code
        )
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Email provenance copied onto every chunk of one email.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailInfo {
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    pub date: Option<String>,
    pub email_id: Option<String>,
    pub thread_id: Option<String>,
    pub folder: Option<String>,
}

/// Typed chunk metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub kind: ChunkKind,
    pub source_document: String,
    /// Token count of this chunk's content.
    pub chunk_size: usize,
    /// Number of chunks produced for the parent in the same call.
    pub total_chunks: usize,
    pub section_title: Option<String>,
    pub page_number: Option<u32>,
    pub created_at: Option<String>,
    pub email: Option<EmailInfo>,
    /// Set on email body chunks made of quoted reply text.
    pub quoted: bool,
    /// Open extension bag for caller- or strategy-specific keys.
    pub extra: Map<String, Value>,
}

/// A unit of retrievable text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChunk {
    /// Stable identity derived from `(parent_id, sequence_index)`.
    pub chunk_id: String,
    pub parent_id: String,
    pub sequence_index: usize,
    pub content: String,
    /// Tokens shared with the preceding chunk of the same parent.
    pub overlap_with_previous: usize,
    /// Byte offset of `content` within the text that was chunked.
    pub start_offset: usize,
    pub end_offset: usize,
    pub metadata: ChunkMetadata,
}

impl DataChunk {
    /// Deterministic chunk id: UUID v5 over `"{parent_id}:{sequence_index}"`.
    ///
    /// Re-chunking identical input yields identical ids, which makes
    /// store upserts idempotent.
    pub fn derive_id(parent_id: &str, sequence_index: usize) -> String {
        let name = format!("{}:{}", parent_id, sequence_index);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    /// SHA-256 of the chunk content, hex encoded.
    pub fn content_hash(&self) -> String {
        sha256_hex(&self.content)
    }

    /// Flatten metadata into the JSON object stored alongside the chunk.
    ///
    /// Reserved keys always win over extension keys.
    pub fn metadata_map(&self) -> Map<String, Value> {
        let m = &self.metadata;
        let mut map = Map::new();
        for (k, v) in &m.extra {
            if !RESERVED_METADATA_KEYS.contains(&k.as_str()) {
                map.insert(k.clone(), v.clone());
            }
        }
        map.insert("type".into(), Value::from(m.kind.as_str()));
        map.insert("source_document".into(), Value::from(m.source_document.clone()));
        map.insert("parent_id".into(), Value::from(self.parent_id.clone()));
        map.insert("sequence_index".into(), Value::from(self.sequence_index));
        map.insert("chunk_size".into(), Value::from(m.chunk_size));
        map.insert("total_chunks".into(), Value::from(m.total_chunks));
        if let Some(title) = &m.section_title {
            map.insert("section_title".into(), Value::from(title.clone()));
        }
        if let Some(page) = m.page_number {
            map.insert("page_number".into(), Value::from(page));
        }
        if let Some(created) = &m.created_at {
            map.insert("created_at".into(), Value::from(created.clone()));
        }
        map.insert("quoted".into(), Value::Bool(m.quoted));
        if let Some(email) = &m.email {
            let mut put = |key: &str, value: &Option<String>| {
                if let Some(v) = value {
                    map.insert(key.to_string(), Value::from(v.clone()));
                }
            };
            put("email_subject", &email.subject);
            put("email_sender", &email.sender);
            put("email_date", &email.date);
            put("email_id", &email.email_id);
            put("email_thread_id", &email.thread_id);
            put("email_folder", &email.folder);
            if !email.recipients.is_empty() {
                map.insert(
                    "email_recipients".into(),
                    Value::from(email.recipients.join(", ")),
                );
            }
        }
        map
    }
}

/// Which search produced a [`SearchResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Vector,
    Keyword,
    Hybrid,
}

/// Per-signal scores behind a result's `similarity_score`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// Clamped cosine similarity, if the chunk was a vector candidate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<f64>,
    /// Normalized keyword relevance, if the chunk was a keyword candidate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<f64>,
    /// Fusion weight for hybrid results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
}

/// A ranked search hit. Built fresh per query, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    /// Relevance in `[0.0, 1.0]`.
    pub similarity_score: f64,
    /// 1-based position in the result list.
    pub rank: usize,
    pub source: ResultSource,
    pub scores: ScoreBreakdown,
}

/// Byte range of a pre-detected signature within `body_text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSpan {
    pub start: usize,
    pub end: usize,
}

/// An email as produced by an upstream parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailMessage {
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
    pub date_sent: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub signature_span: Option<SignatureSpan>,
    pub thread_id: Option<String>,
    pub folder: Option<String>,
}

impl EmailMessage {
    /// Provenance block copied onto every chunk of this email.
    pub fn info(&self) -> EmailInfo {
        EmailInfo {
            subject: self.subject.clone(),
            sender: self.sender.clone(),
            recipients: self.recipients.clone(),
            date: self.date_sent.clone(),
            email_id: self.message_id.clone(),
            thread_id: self.thread_id.clone(),
            folder: self.folder.clone(),
        }
    }
}

/// Hex SHA-256 of a string.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
