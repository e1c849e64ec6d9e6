//! Batched, paced embedding generation.
//!
//! Texts are split into `batch_size` groups and sent one batch at a time.
//! Consecutive batch calls are separated by `rate_limit_delay`, and each
//! batch gets its own retry budget with exponential backoff. Output order
//! always matches input order.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use cvportal_shared::{
    EmbeddingSettings, PortalGenError, RagEmbedding, Result, TextChunk, estimate_tokens,
};

use crate::provider::EmbeddingProvider;

/// Largest backoff exponent; keeps the delay bounded for long retry budgets.
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Batching and pacing knobs for one generation call.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub rate_limit_delay: Duration,
    /// Total attempts per batch, including the first.
    pub max_retries: usize,
    pub retry_backoff: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 16,
            rate_limit_delay: Duration::from_millis(200),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl From<&EmbeddingSettings> for BatchOptions {
    fn from(settings: &EmbeddingSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            rate_limit_delay: settings.rate_limit_delay,
            max_retries: settings.max_retries,
            retry_backoff: settings.retry_backoff,
        }
    }
}

impl BatchOptions {
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff * 2u32.pow(attempt.min(MAX_BACKOFF_EXPONENT))
    }
}

/// Drives an [`EmbeddingProvider`] over arbitrarily many texts.
#[derive(Clone)]
pub struct EmbeddingGenerator {
    provider: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingGenerator {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed `texts`; `result[i]` is the vector for `texts[i]`.
    #[tracing::instrument(skip_all, fields(texts = texts.len(), batch_size = opts.batch_size))]
    pub async fn embed_texts(&self, texts: &[String], opts: &BatchOptions) -> Result<Vec<Vec<f32>>> {
        let batch_size = opts.batch_size.max(1);
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch_idx, batch) in texts.chunks(batch_size).enumerate() {
            if batch_idx > 0 && !opts.rate_limit_delay.is_zero() {
                tokio::time::sleep(opts.rate_limit_delay).await;
            }
            let batch_vectors = self.embed_with_retry(batch_idx, batch, opts).await?;
            vectors.extend(batch_vectors);
        }

        tracing::debug!(vectors = vectors.len(), "embedding generation complete");
        Ok(vectors)
    }

    /// Embed chunks and attach their metadata, index for index.
    pub async fn generate_embeddings(
        &self,
        chunks: &[TextChunk],
        opts: &BatchOptions,
    ) -> Result<Vec<RagEmbedding>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embed_texts(&texts, opts).await?;

        let created_at = Utc::now();
        Ok(chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| RagEmbedding {
                id: uuid::Uuid::now_v7().to_string(),
                content: chunk.content.clone(),
                metadata: chunk.metadata.clone(),
                vector,
                tokens: estimate_tokens(&chunk.content),
                created_at,
            })
            .collect())
    }

    /// Embed a single query string as a one-item batch, without pacing.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let opts = BatchOptions {
            batch_size: 1,
            rate_limit_delay: Duration::ZERO,
            max_retries: 1,
            retry_backoff: Duration::ZERO,
        };
        let mut vectors = self.embed_texts(&[query.to_string()], &opts).await?;
        vectors
            .pop()
            .ok_or_else(|| PortalGenError::EmbeddingProvider("empty query embedding".into()))
    }

    async fn embed_with_retry(
        &self,
        batch_idx: usize,
        batch: &[String],
        opts: &BatchOptions,
    ) -> Result<Vec<Vec<f32>>> {
        let attempts = opts.max_retries.max(1);
        let mut attempt: u32 = 0;

        loop {
            match self.provider.embed_batch(batch).await {
                Ok(vectors) => return self.check_batch(batch_idx, batch.len(), vectors),
                Err(e) if (attempt as usize) + 1 < attempts => {
                    let delay = opts.backoff(attempt);
                    tracing::warn!(
                        batch = batch_idx,
                        attempt = attempt + 1,
                        ?delay,
                        error = %e,
                        "embedding batch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(PortalGenError::EmbeddingProvider(format!(
                        "batch {batch_idx} failed after {attempts} attempt(s): {e}"
                    )));
                }
            }
        }
    }

    fn check_batch(
        &self,
        batch_idx: usize,
        expected: usize,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Vec<Vec<f32>>> {
        if vectors.len() != expected {
            return Err(PortalGenError::EmbeddingProvider(format!(
                "batch {batch_idx}: expected {expected} vectors, got {}",
                vectors.len()
            )));
        }
        let dimension = self.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(PortalGenError::EmbeddingProvider(format!(
                "batch {batch_idx}: expected dimension {dimension}, got {}",
                bad.len()
            )));
        }
        Ok(vectors)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Deterministic provider: vector = [len, first byte, 1.0].
    pub(crate) struct FakeProvider {
        pub dimension: usize,
        pub fail_first: usize,
        pub calls: AtomicUsize,
        pub batches: Mutex<Vec<(usize, Instant)>>,
        pub wrong_dimension: bool,
    }

    impl FakeProvider {
        pub(crate) fn new() -> Self {
            Self {
                dimension: 3,
                fail_first: 0,
                calls: AtomicUsize::new(0),
                batches: Mutex::new(Vec::new()),
                wrong_dimension: false,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        fn model(&self) -> &str {
            "fake"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().unwrap().push((texts.len(), Instant::now()));
            if call < self.fail_first {
                return Err(PortalGenError::EmbeddingProvider("503".into()));
            }
            let dim = if self.wrong_dimension { self.dimension + 1 } else { self.dimension };
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![1.0; dim];
                    v[0] = t.len() as f32;
                    v[1] = t.bytes().next().unwrap_or(0) as f32;
                    v
                })
                .collect())
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}text-{i}", (b'a' + i as u8) as char)).collect()
    }

    fn fast_opts(batch_size: usize) -> BatchOptions {
        BatchOptions {
            batch_size,
            rate_limit_delay: Duration::ZERO,
            max_retries: 3,
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn output_order_matches_input_across_batches() {
        let provider = Arc::new(FakeProvider::new());
        let generator = EmbeddingGenerator::new(provider.clone());
        let input = texts(5);

        let vectors = generator.embed_texts(&input, &fast_opts(2)).await.unwrap();

        assert_eq!(vectors.len(), 5);
        for (text, vector) in input.iter().zip(&vectors) {
            assert_eq!(vector[1], text.as_bytes()[0] as f32);
        }
        let sizes: Vec<usize> = provider.batches.lock().unwrap().iter().map(|b| b.0).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn delay_separates_consecutive_batches() {
        let provider = Arc::new(FakeProvider::new());
        let generator = EmbeddingGenerator::new(provider.clone());
        let opts = BatchOptions {
            rate_limit_delay: Duration::from_millis(20),
            ..fast_opts(1)
        };

        generator.embed_texts(&texts(3), &opts).await.unwrap();

        let batches = provider.batches.lock().unwrap();
        for pair in batches.windows(2) {
            assert!(pair[1].1.duration_since(pair[0].1) >= Duration::from_millis(20));
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let provider = Arc::new(FakeProvider {
            fail_first: 2,
            ..FakeProvider::new()
        });
        let generator = EmbeddingGenerator::new(provider.clone());

        let vectors = generator.embed_texts(&texts(1), &fast_opts(4)).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retry_budget_is_provider_error() {
        let provider = Arc::new(FakeProvider {
            fail_first: usize::MAX,
            ..FakeProvider::new()
        });
        let generator = EmbeddingGenerator::new(provider.clone());

        let err = generator.embed_texts(&texts(2), &fast_opts(4)).await.unwrap_err();
        assert_eq!(err.code(), "EMBEDDING_PROVIDER_ERROR");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn wrong_dimension_is_not_retried() {
        let provider = Arc::new(FakeProvider {
            wrong_dimension: true,
            ..FakeProvider::new()
        });
        let generator = EmbeddingGenerator::new(provider.clone());

        let err = generator.embed_texts(&texts(1), &fast_opts(4)).await.unwrap_err();
        assert!(err.to_string().contains("expected dimension 3"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chunk_metadata_is_zipped_by_index() {
        let generator = EmbeddingGenerator::new(Arc::new(FakeProvider::new()));
        let cv = {
            let mut cv = cvportal_shared::CvData::default();
            cv.personal_info.name = Some("John Doe".into());
            cv.languages = vec![cvportal_shared::Language {
                language: "English".into(),
                proficiency: None,
            }];
            cv
        };
        let chunks = crate::ContentChunker::new().chunk(&cv);

        let embeddings = generator.generate_embeddings(&chunks, &fast_opts(1)).await.unwrap();

        assert_eq!(embeddings.len(), chunks.len());
        for (chunk, embedding) in chunks.iter().zip(&embeddings) {
            assert_eq!(embedding.content, chunk.content);
            assert_eq!(embedding.metadata.chunk_key, chunk.metadata.chunk_key);
            assert_eq!(embedding.tokens, estimate_tokens(&chunk.content));
        }
    }

    #[test]
    fn backoff_is_capped() {
        let opts = BatchOptions {
            retry_backoff: Duration::from_millis(10),
            ..BatchOptions::default()
        };
        assert_eq!(opts.backoff(0), Duration::from_millis(10));
        assert_eq!(opts.backoff(3), Duration::from_millis(80));
        assert_eq!(opts.backoff(12), Duration::from_millis(320));
    }
}
