//! # docrag
//!
//! **Retrieval-augmented question answering over technical documentation.**
//!
//! This crate is the application around `docrag-core`: TOML configuration,
//! a SQLite-backed vector index, OpenAI and Ollama adapters for embeddings
//! and streamed chat, filesystem and web ingestion, and the `docrag` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  scan (fs)  │──▶│ chunk+embed  │──▶│ SQLite index  │
//! └─────────────┘   └──────────────┘   └──────┬────────┘
//!                                             │
//!                 question ─▶ embed ─▶ retrieve ─▶ prompt ─▶ LLM ─▶ tokens
//!                                                            └──▶ sources
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docrag init                         # create database
//! docrag ingest                       # chunk, embed and index ./docs
//! docrag retrieve "configure tokio"   # show matching passages
//! docrag ask "How do I configure tokio?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Config file parsing and validation |
//! | [`db`], [`migrate`] | SQLite pool and schema |
//! | [`sqlite_index`] | `VectorIndex` over SQLite |
//! | [`embedding`], [`llm`] | Provider adapters |
//! | [`retry`] | Backoff for ingestion-time embedding |
//! | [`scan`], [`web`], [`ingest`] | Corpus walk, page fetch and indexing |
//! | [`pipeline`] | Index + embedder + retriever wiring |
//! | [`search`], [`ask`] | `retrieve` and `ask` commands |
//! | [`stats`], [`chunks`] | Index inspection |

pub mod ask;
pub mod chunks;
pub mod config;
pub mod db;
pub mod embedding;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod pipeline;
pub mod retry;
pub mod scan;
pub mod search;
pub mod sqlite_index;
pub mod stats;
pub mod web;
