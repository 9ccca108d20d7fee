//! # Ragloom Core
//!
//! Chunking and retrieval primitives for retrieval-augmented generation:
//! chunk models, the [`DataChunker`](chunk::DataChunker) strategy
//! registry, email preprocessing, metadata filters, the store and
//! embedder traits, and the hybrid [`Retriever`](search::Retriever).
//!
//! This crate performs no filesystem or network I/O and pulls in no
//! runtime. Backends and providers that do (SQLite, OpenAI) live in the
//! `ragloom` app crate and plug in through [`store::VectorStore`] and
//! [`embedding::Embedder`].

pub mod chunk;
pub mod context;
pub mod document;
pub mod email;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod models;
pub mod search;
pub mod store;
pub mod tokenizer;

pub use error::{EmbedError, Error, Result, StoreError};
