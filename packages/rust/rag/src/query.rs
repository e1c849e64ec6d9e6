//! Query-time context retrieval.

use serde::Serialize;

use cvportal_shared::{MAX_CONTEXT_SOURCES, QuerySettings, Result, estimate_tokens};

use crate::generator::EmbeddingGenerator;
use crate::vector_store::VectorStore;

/// Joins chunks in the assembled context.
const CHUNK_SEPARATOR: &str = "\n\n";

/// One embedding that contributed to a retrieved context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSource {
    pub id: String,
    pub section: String,
    pub content: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedContext {
    pub context: String,
    pub sources: Vec<ContextSource>,
    pub token_count: usize,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }
}

/// Embeds a query and packs the best-matching chunks into a token budget.
#[derive(Clone)]
pub struct RagQueryProcessor {
    generator: EmbeddingGenerator,
    settings: QuerySettings,
}

impl RagQueryProcessor {
    pub fn new(generator: EmbeddingGenerator, settings: QuerySettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    pub fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    /// Context for `query` drawn from `store`, at most `max_tokens` long.
    ///
    /// Failures are logged and yield an empty context.
    #[tracing::instrument(skip(self, store), fields(store_len = store.len()))]
    pub async fn retrieve_context(
        &self,
        query: &str,
        store: &VectorStore,
        max_tokens: usize,
    ) -> RetrievedContext {
        if query.trim().is_empty() || store.is_empty() {
            return RetrievedContext::default();
        }
        match self.try_retrieve(query, store, max_tokens).await {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(error = %e, "context retrieval failed");
                RetrievedContext::default()
            }
        }
    }

    async fn try_retrieve(
        &self,
        query: &str,
        store: &VectorStore,
        max_tokens: usize,
    ) -> Result<RetrievedContext> {
        let query_vector = self.generator.embed_query(query).await?;
        let hits = store.search(&query_vector, self.settings.top_k, self.settings.min_score)?;

        let max_sources = self.settings.max_sources.min(MAX_CONTEXT_SOURCES);
        let mut context = String::new();
        let mut sources = Vec::new();
        let mut chunks = 0usize;
        let mut token_count = 0usize;

        for hit in hits {
            // Measure the joined text so separators count against the budget.
            let mut candidate = context.clone();
            if !candidate.is_empty() {
                candidate.push_str(CHUNK_SEPARATOR);
            }
            candidate.push_str(&hit.embedding.content);
            let tokens = estimate_tokens(&candidate);
            if tokens > max_tokens {
                break;
            }
            context = candidate;
            token_count = tokens;
            chunks += 1;
            if sources.len() < max_sources {
                sources.push(ContextSource {
                    id: hit.embedding.id.clone(),
                    section: hit.embedding.metadata.section.clone(),
                    content: hit.embedding.content.clone(),
                    similarity: hit.similarity,
                });
            }
        }

        tracing::debug!(chunks, token_count, "context assembled");
        Ok(RetrievedContext {
            context,
            sources,
            token_count,
        })
    }
}
