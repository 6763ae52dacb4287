//! Multi-scope memory for AI agents, with hybrid retrieval and self-pruning.
//!
//! Cairn stores short texts in scoped collections. Each scope isolates a kind
//! of memory and carries its own advisory capacity:
//!
//! | Scope | Owner | Default capacity |
//! |-------|-------|------------------|
//! | **Global** | none (one shared collection) | 10 000 |
//! | **Project** | project id | 5 000 |
//! | **Agent** | agent id | 2 000 |
//! | **Thread** | thread id | 1 000 |
//! | **Objectives** | objective owner | 1 000 |
//! | **Artifacts** | artifact owner | 20 000 |
//!
//! # Architecture
//!
//! - **Storage**: SQLite, with a [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   table for vectors and an FTS5 table for keywords per collection
//! - **Embeddings**: deterministic feature hashing by default, or local ONNX
//!   Runtime with all-MiniLM-L6-v2 (384 dimensions)
//! - **Search**: dense + BM25 merged with Reciprocal Rank Fusion; degrades to
//!   keyword-only when embedding is unavailable
//! - **Upkeep**: a metrics timer and a health timer; a collection crossing the
//!   critical utilization threshold is pruned automatically
//! - **Transport**: MCP over stdio
//!
//! # Modules
//!
//! - [`config`]: configuration from TOML and environment variables
//! - [`db`]: SQLite setup, schema, and migrations
//! - [`embedding`]: text-to-vector providers
//! - [`memory`]: collections, indexes, hybrid search, the result cache, and pruning
//! - [`monitor`]: metrics sampling, health evaluation, and the scheduler
//! - [`engine`]: the async [`engine::MemoryEngine`] tying it together

pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod memory;
pub mod monitor;
