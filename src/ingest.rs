//! File ingestion.
//!
//! Walks a file or directory, turns each matching file into a document or
//! a set of emails, and hands them to the [`KnowledgeBaseManager`].
//!
//! | Extension | Parsed as |
//! |-----------|-----------|
//! | `.md`, `.markdown`, `.mdx` | Markdown document |
//! | `.tex`, `.latex` | LaTeX document |
//! | `.json` | One email object or an array of emails |
//! | anything else matched by `include_globs` | Plain text document |
//!
//! Document parent ids are the path relative to the ingest root, so
//! re-ingesting a file replaces its chunks. Paths are sorted for
//! deterministic ordering. Default excludes skip `.git`, `target` and
//! `node_modules`.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use ragloom_core::document::TextFormat;
use ragloom_core::models::EmailMessage;

use crate::config::IngestConfig;
use crate::manager::{DocumentInput, IngestSummary, KnowledgeBaseManager};

/// A file found by [`scan_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the ingest root, `/`-separated.
    pub relative: String,
}

/// Parsed contents of a file.
#[derive(Debug, Clone)]
pub enum SourceItem {
    Document(DocumentInput),
    Emails(Vec<EmailMessage>),
}

/// Find the files to ingest under `root`.
///
/// A file root is returned as-is without glob filtering.
pub fn scan_path(root: &Path, config: &IngestConfig) -> Result<Vec<SourceFile>> {
    if !root.exists() {
        bail!("Ingest path does not exist: {}", root.display());
    }
    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string());
        return Ok(vec![SourceFile {
            path: root.to_path_buf(),
            relative: name,
        }]);
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push(SourceFile {
            path: path.to_path_buf(),
            relative: rel_str,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Read and parse one file.
pub fn load_file(file: &SourceFile) -> Result<SourceItem> {
    let body = std::fs::read_to_string(&file.path)
        .with_context(|| format!("Failed to read {}", file.path.display()))?;
    let ext = file
        .path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if ext == "json" {
        return Ok(SourceItem::Emails(parse_emails(&body).with_context(|| {
            format!("Failed to parse emails in {}", file.relative)
        })?));
    }

    let mut doc = DocumentInput::new(file.relative.clone(), body, TextFormat::from_extension(&ext));
    doc.created_at = modified_at(&file.path);
    Ok(SourceItem::Document(doc))
}

/// Parse a single email object or an array of them.
pub fn parse_emails(json: &str) -> Result<Vec<EmailMessage>> {
    let value: Value = serde_json::from_str(json)?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|v| serde_json::from_value::<EmailMessage>(v).map_err(anyhow::Error::from))
            .collect(),
        Value::Object(_) => Ok(vec![serde_json::from_value(value)?]),
        _ => bail!("expected an email object or an array of emails"),
    }
}

fn modified_at(path: &Path) -> Option<String> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let ts: DateTime<Utc> = modified.into();
    Some(ts.to_rfc3339())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Ingest everything under `root` and print a summary.
///
/// Files that fail to read or parse are skipped with a warning and
/// reported as failed.
pub async fn ingest_path(
    manager: &KnowledgeBaseManager,
    config: &IngestConfig,
    root: &Path,
    dry_run: bool,
) -> Result<IngestSummary> {
    let files = scan_path(root, config)?;
    info!(files = files.len(), root = %root.display(), "scanned ingest path");

    let mut docs = Vec::new();
    let mut emails = Vec::new();
    let mut unreadable = Vec::new();
    for file in &files {
        match load_file(file) {
            Ok(SourceItem::Document(doc)) => docs.push(doc),
            Ok(SourceItem::Emails(batch)) => emails.extend(batch),
            Err(e) => {
                warn!(file = %file.relative, error = %e, "skipping file");
                unreadable.push((file.relative.clone(), format!("{:#}", e)));
            }
        }
    }

    if dry_run {
        let mut estimated = 0usize;
        for doc in &docs {
            estimated += manager.chunk_document(doc).map(|c| c.len()).unwrap_or(0);
        }
        for email in &emails {
            estimated += manager.chunk_email(email).map(|c| c.len()).unwrap_or(0);
        }
        println!("ingest {} (dry-run)", root.display());
        println!("  files found: {}", files.len());
        println!("  documents: {}", docs.len());
        println!("  emails: {}", emails.len());
        println!("  estimated chunks: {}", estimated);
        return Ok(IngestSummary::default());
    }

    let mut summary = manager.process_documents(&docs).await?;
    let email_summary = manager.process_emails(&emails).await?;
    summary.parents += email_summary.parents;
    summary.chunks += email_summary.chunks;
    summary.embedded += email_summary.embedded;
    summary.pending += email_summary.pending;
    summary.cancelled += email_summary.cancelled;
    summary.failed.extend(email_summary.failed);
    summary.failed.extend(unreadable);

    println!("ingest {}", root.display());
    println!("  files: {}", files.len());
    println!("  parents stored: {}", summary.parents);
    println!("  chunks written: {}", summary.chunks);
    if manager.settings().embed {
        println!("  embeddings written: {}", summary.embedded);
        println!("  embeddings pending: {}", summary.pending);
    }
    for (source, error) in &summary.failed {
        println!("  failed: {} ({})", source, error);
    }
    println!("ok");
    Ok(summary)
}
