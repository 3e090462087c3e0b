//! # docqa
//!
//! Retrieval-augmented question answering over uploaded documents.
//!
//! A document is split into overlapping sentence chunks, each chunk is
//! embedded into a flat vector index and written to a lexical index that
//! remembers the chunk's vector position. A query is answered by searching
//! both indexes, handing the best passages to a generative model, and
//! caching the answer.
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────┐   ┌──────────┐   ┌────────────────┐
//!  upload ───▶ │ extract  │──▶│  chunk   │──▶│   embedding    │
//!              └──────────┘   └──────────┘   └───────┬────────┘
//!                                                    ▼
//!                         ┌──────────────┐   ┌──────────────┐
//!                         │ vector_index │◀─▶│   lexical    │  (ledger)
//!                         └──────┬───────┘   └──────┬───────┘
//!                                └────────┬─────────┘
//!  query ───▶ cache ──▶ embedding ────────┘──▶ generation ──▶ cache
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Domain error taxonomy |
//! | [`models`] | Core data types |
//! | [`extract`] | Plain text, PDF and HTML text extraction |
//! | [`chunk`] | Sentence-overlap chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_index`] | Append-only nearest-neighbour index with a snapshot file |
//! | [`lexical`] | Full-text index gateway (SQLite FTS5 or Elasticsearch) |
//! | [`cache`] | Query result cache with TTL |
//! | [`generation`] | Generative model backend |
//! | [`ledger`] | Vector/lexical link bookkeeping |
//! | [`ingest`] | Ingestion pipeline |
//! | [`query`] | Query pipeline |
//! | [`repair`] | Re-link chunks missing from the lexical index |
//! | [`services`] | Shared service handles |
//! | [`server`] | HTTP API |
//! | [`get`] | Chunk lookup and deletion from the CLI |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod get;
pub mod ingest;
pub mod ledger;
pub mod lexical;
pub mod migrate;
pub mod models;
pub mod query;
pub mod repair;
pub mod server;
pub mod services;
pub mod vector_index;
