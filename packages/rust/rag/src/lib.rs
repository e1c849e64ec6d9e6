//! Retrieval-augmented generation for CV portals.
//!
//! - [`ContentChunker`]: profile → deterministic, tagged text chunks
//! - [`EmbeddingGenerator`]: batched, paced, retried calls to an
//!   [`EmbeddingProvider`]
//! - [`VectorStore`]: cosine-similarity search with a JSON snapshot format
//! - [`RagQueryProcessor`]: token-budgeted context assembly
//! - [`ChatAssistant`]: grounded answers through a [`ChatProvider`]

pub mod chat;
pub mod chunker;
pub mod generator;
pub mod provider;
pub mod query;
pub mod vector_store;

pub use chat::{
    ChatAnswer, ChatAssistant, ChatProvider, HttpChatProvider, INSUFFICIENT_INFORMATION,
    build_system_prompt,
};
pub use chunker::ContentChunker;
pub use generator::{BatchOptions, EmbeddingGenerator};
pub use provider::{EmbeddingProvider, HttpEmbeddingProvider};
pub use query::{ContextSource, RagQueryProcessor, RetrievedContext};
pub use vector_store::{SearchHit, VectorStore, cosine_similarity};
