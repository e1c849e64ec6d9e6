//! Grounded question answering over a portal's vector store.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use cvportal_shared::{ChatSettings, CvData, PortalGenError, RagSystemConfig, Result};

use crate::query::{ContextSource, RagQueryProcessor};
use crate::vector_store::VectorStore;

/// Answer returned when retrieval finds nothing relevant.
pub const INSUFFICIENT_INFORMATION: &str =
    "I don't have enough information in this CV to answer that question.";

/// Generates an answer from a system prompt, retrieved context and a question.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, system_prompt: &str, context: &str, query: &str) -> Result<String>;
}

/// Non-streaming OpenAI-compatible `/chat/completions` client.
pub struct HttpChatProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpChatProvider {
    pub fn new(settings: &ChatSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("cvportal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PortalGenError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    fn model(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, system_prompt: &str, context: &str, query: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: format!("{system_prompt}\n\nContext:\n{context}"),
                },
                ChatMessage {
                    role: "user",
                    content: query.to_string(),
                },
            ],
            temperature: 0.2,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| PortalGenError::Network(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PortalGenError::Network(format!(
                "chat provider returned {status}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PortalGenError::Serialization(format!("malformed chat response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| PortalGenError::Network("chat provider returned no content".into()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<ContextSource>,
    pub token_count: usize,
    /// False when the answer is the fixed insufficient-information reply.
    pub grounded: bool,
}

/// Answers questions about one candidate using retrieval plus a chat model.
pub struct ChatAssistant {
    processor: RagQueryProcessor,
    provider: Arc<dyn ChatProvider>,
    system: RagSystemConfig,
}

impl ChatAssistant {
    pub fn new(
        processor: RagQueryProcessor,
        provider: Arc<dyn ChatProvider>,
        system: RagSystemConfig,
    ) -> Self {
        Self {
            processor,
            provider,
            system,
        }
    }

    #[tracing::instrument(skip(self, store))]
    pub async fn answer(&self, query: &str, store: &VectorStore) -> Result<ChatAnswer> {
        let retrieved = self
            .processor
            .retrieve_context(query, store, self.system.query.max_context_tokens)
            .await;

        if retrieved.is_empty() {
            tracing::info!("no relevant context, returning fallback answer");
            return Ok(ChatAnswer {
                answer: INSUFFICIENT_INFORMATION.to_string(),
                sources: Vec::new(),
                token_count: 0,
                grounded: false,
            });
        }

        let answer = self
            .provider
            .complete(&self.system.system_prompt, &retrieved.context, query)
            .await?;

        Ok(ChatAnswer {
            answer,
            sources: retrieved.sources,
            token_count: retrieved.token_count,
            grounded: true,
        })
    }
}

/// System prompt for a candidate's portal assistant.
pub fn build_system_prompt(cv: &CvData) -> String {
    let name = cv.display_name().unwrap_or("the candidate");
    let mut prompt = format!(
        "You are a professional assistant answering questions about {name}'s career, \
         skills and experience on behalf of their CV portal."
    );
    if let Some(title) = cv.personal_info.title.as_deref().filter(|t| !t.trim().is_empty()) {
        prompt.push_str(&format!(" {name} currently works as {}.", title.trim()));
    }
    prompt.push_str(
        "\nAnswer only from the provided context. If the context does not contain the \
         answer, say that the CV does not mention it. Keep answers concise and factual, \
         and never invent employers, dates or qualifications.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::EmbeddingGenerator;
    use crate::vector_store::tests::embedding;
    use cvportal_shared::QuerySettings;
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct UnitProvider;

    #[async_trait]
    impl crate::EmbeddingProvider for UnitProvider {
        fn model(&self) -> &str {
            "unit"
        }
        fn dimension(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[derive(Default)]
    struct RecordingChat {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChatProvider for RecordingChat {
        fn model(&self) -> &str {
            "recording"
        }
        async fn complete(&self, _system: &str, context: &str, query: &str) -> Result<String> {
            self.seen
                .lock()
                .unwrap()
                .push((context.to_string(), query.to_string()));
            Ok("Yes, AWS Solutions Architect (2023).".into())
        }
    }

    fn system() -> RagSystemConfig {
        RagSystemConfig {
            system_prompt: "prompt".into(),
            embedding_model: "unit".into(),
            dimension: 2,
            chat_model: Some("recording".into()),
            query: QuerySettings::default(),
            indexed_chunks: 1,
        }
    }

    fn assistant(chat: Arc<RecordingChat>) -> ChatAssistant {
        let processor = RagQueryProcessor::new(
            EmbeddingGenerator::new(Arc::new(UnitProvider)),
            QuerySettings::default(),
        );
        ChatAssistant::new(processor, chat, system())
    }

    #[tokio::test]
    async fn grounded_answer_carries_sources() {
        let mut store = VectorStore::new(2, "unit");
        store
            .insert(embedding("cert", "AWS Certified Solutions Architect", 7, vec![0.9, 0.1]))
            .unwrap();
        let chat = Arc::new(RecordingChat::default());

        let answer = assistant(chat.clone())
            .answer("Any AWS certifications?", &store)
            .await
            .unwrap();

        assert!(answer.grounded);
        assert_eq!(answer.sources.len(), 1);
        let seen = chat.seen.lock().unwrap();
        assert_eq!(seen[0].0, "AWS Certified Solutions Architect");
    }

    #[tokio::test]
    async fn empty_context_skips_the_provider() {
        let mut store = VectorStore::new(2, "unit");
        store.insert(embedding("x", "Enjoys sailing", 4, vec![0.0, 1.0])).unwrap();
        let chat = Arc::new(RecordingChat::default());

        let answer = assistant(chat.clone()).answer("Salary?", &store).await.unwrap();

        assert!(!answer.grounded);
        assert_eq!(answer.answer, INSUFFICIENT_INFORMATION);
        assert!(chat.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn http_provider_reads_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": " Five years. "}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpChatProvider::new(&ChatSettings {
            base_url: format!("{}/v1", server.uri()),
            model: "gpt-4o-mini".into(),
            api_key: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        let answer = provider.complete("sys", "ctx", "How long?").await.unwrap();
        assert_eq!(answer, "Five years.");
    }

    #[test]
    fn prompt_names_the_candidate() {
        let mut cv = CvData::default();
        cv.personal_info.name = Some("John Doe".into());
        cv.personal_info.title = Some("Software Engineer".into());
        let prompt = build_system_prompt(&cv);
        assert!(prompt.contains("John Doe's career"));
        assert!(prompt.contains("works as Software Engineer"));
    }
}
