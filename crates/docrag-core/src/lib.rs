//! # docrag core
//!
//! The retrieval-augmented generation pipeline behind `docrag`: data
//! models, the code-fence-aware chunker, the embedder / vector index /
//! language model traits, the retriever, the prompt assembler, citation
//! handling, and the streaming generation chain.
//!
//! This crate has no database, HTTP, or filesystem dependencies. Concrete
//! adapters (SQLite index, OpenAI/Ollama clients) live in the `docrag` app
//! crate and are injected as `Arc<dyn …>` handles.
//!
//! ```text
//! query ─▶ Embedder ─▶ Retriever ─▶ PromptAssembler ─▶ LanguageModel
//!                         │                                  │
//!                    VectorIndex                   token events ─▶ caller
//!                                                            │
//!                                      citations + done ◀────┘
//! ```

pub mod chain;
pub mod chunk;
pub mod citation;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod store;

pub use chain::{ChainConfig, GenerateOptions, GenerationEvent, GenerationStream, RagChain};
pub use error::{ErrorKind, RagError};
