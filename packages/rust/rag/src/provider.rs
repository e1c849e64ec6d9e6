//! Embedding provider seam and its HTTP implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use cvportal_shared::{EmbeddingProviderKind, EmbeddingSettings, PortalGenError, Result};

/// Turns a batch of texts into vectors, one per input, in input order.
///
/// Implementations make exactly one remote call per `embed_batch`. Retry and
/// pacing belong to [`crate::EmbeddingGenerator`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// OpenAI-compatible or Hugging Face feature-extraction endpoint.
pub struct HttpEmbeddingProvider {
    client: Client,
    kind: EmbeddingProviderKind,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Serialize)]
struct FeatureExtractionRequest<'a> {
    inputs: &'a [String],
    options: FeatureExtractionOptions,
}

#[derive(Serialize)]
struct FeatureExtractionOptions {
    wait_for_model: bool,
}

impl HttpEmbeddingProvider {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("cvportal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PortalGenError::Network(format!("failed to build HTTP client: {e}")))?;

        let base = settings.base_url.trim_end_matches('/');
        let endpoint = match settings.provider {
            EmbeddingProviderKind::OpenAi => format!("{base}/embeddings"),
            EmbeddingProviderKind::HuggingFace => {
                format!("{base}/pipeline/feature-extraction/{}", settings.model)
            }
        };

        Ok(Self {
            client,
            kind: settings.provider,
            endpoint,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            dimension: settings.dimension,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<B: Serialize + ?Sized>(&self, body: &B) -> Result<reqwest::Response> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            PortalGenError::EmbeddingProvider(format!("request to {} failed: {e}", self.endpoint))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortalGenError::EmbeddingProvider(format!(
                "provider returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    #[tracing::instrument(skip_all, fields(provider = self.kind.as_str(), batch = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match self.kind {
            EmbeddingProviderKind::OpenAi => {
                let response = self
                    .post(&OpenAiRequest {
                        model: &self.model,
                        input: texts,
                    })
                    .await?;
                let mut parsed: OpenAiResponse = response.json().await.map_err(|e| {
                    PortalGenError::EmbeddingProvider(format!("malformed embeddings response: {e}"))
                })?;
                parsed.data.sort_by_key(|d| d.index);
                Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
            }
            EmbeddingProviderKind::HuggingFace => {
                let response = self
                    .post(&FeatureExtractionRequest {
                        inputs: texts,
                        options: FeatureExtractionOptions {
                            wait_for_model: true,
                        },
                    })
                    .await?;
                response.json::<Vec<Vec<f32>>>().await.map_err(|e| {
                    PortalGenError::EmbeddingProvider(format!(
                        "malformed feature-extraction response: {e}"
                    ))
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(kind: EmbeddingProviderKind, base_url: String) -> EmbeddingSettings {
        EmbeddingSettings {
            provider: kind,
            base_url,
            model: "test-model".into(),
            dimension: 3,
            api_key: Some("sk-test".into()),
            batch_size: 2,
            rate_limit_delay: Duration::ZERO,
            max_retries: 1,
            retry_backoff: Duration::ZERO,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn openai_results_are_reordered_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"model": "test-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"embedding": [0.0, 1.0, 0.0], "index": 1},
                    {"embedding": [1.0, 0.0, 0.0], "index": 0}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpEmbeddingProvider::new(&settings(
            EmbeddingProviderKind::OpenAi,
            format!("{}/v1", server.uri()),
        ))
        .unwrap();
        let vectors = provider
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    }

    #[tokio::test]
    async fn huggingface_uses_feature_extraction_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pipeline/feature-extraction/test-model"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!([[0.5, 0.5, 0.0]])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider =
            HttpEmbeddingProvider::new(&settings(EmbeddingProviderKind::HuggingFace, server.uri()))
                .unwrap();
        let vectors = provider.embed_batch(&["hello".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.5, 0.0]]);
    }

    #[tokio::test]
    async fn non_success_status_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let provider =
            HttpEmbeddingProvider::new(&settings(EmbeddingProviderKind::OpenAi, server.uri()))
                .unwrap();
        let err = provider.embed_batch(&["a".to_string()]).await.unwrap_err();
        assert_eq!(err.code(), "EMBEDDING_PROVIDER_ERROR");
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        let provider = HttpEmbeddingProvider::new(&settings(
            EmbeddingProviderKind::OpenAi,
            "http://127.0.0.1:9".into(),
        ))
        .unwrap();
        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
    }
}
