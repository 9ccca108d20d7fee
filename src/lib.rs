//! # Ragloom
//!
//! Structure-aware chunking, email preprocessing and hybrid retrieval for
//! retrieval-augmented generation.
//!
//! The domain logic (chunk model, chunking strategies, email
//! preprocessing, filters, the store and embedder traits, hybrid
//! retrieval) lives in [`ragloom_core`]. This crate adds the pieces that
//! touch the outside world: TOML configuration, the SQLite store, the
//! OpenAI embedder, file ingestion and the `loom` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌────────────┐
//! │ Files/Emails │──▶│ Chunk + Embed    │──▶│  SQLite    │
//! │   (ingest)   │   │ (manager)        │   │ FTS5 + Vec │
//! └──────────────┘   └──────────────────┘   └─────┬──────┘
//!                                                 │
//!                                        ┌────────▼───────┐
//!                                        │ Retriever      │
//!                                        │ similar/kw/hyb │
//!                                        └────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`embedding`] | Embedder construction, OpenAI provider |
//! | [`ingest`] | Filesystem scanning and parsing |
//! | [`manager`] | Chunk, embed, store and search orchestration |
//! | [`sqlite_store`] | SQLite [`VectorStore`](ragloom_core::store::VectorStore) |
//! | [`tokenizer`] | Tokenizer selection |

pub mod config;
pub mod embedding;
pub mod ingest;
pub mod manager;
pub mod sqlite_store;
pub mod tokenizer;

pub use ragloom_core;
