//! Question answering against a generated portal's stored knowledge base.

use std::sync::Arc;

use tracing::{info, instrument};

use cvportal_rag::{
    ChatAnswer, ChatAssistant, ChatProvider, EmbeddingGenerator, RagQueryProcessor, VectorStore,
};
use cvportal_shared::{PortalConfig, PortalGenError, RagSystemConfig, Result};
use cvportal_storage::Storage;

/// Load the portal for `job_id` and rebuild its vector store from storage.
pub async fn load_knowledge_base(
    storage: &Storage,
    job_id: &str,
) -> Result<(PortalConfig, RagSystemConfig, VectorStore)> {
    let config = storage
        .get_portal_config(job_id)
        .await?
        .ok_or_else(|| PortalGenError::validation(format!("no portal exists for job {job_id}")))?;

    let system = match (&config.rag_system, config.rag_config.enabled) {
        (Some(system), true) => system.clone(),
        _ => {
            return Err(PortalGenError::validation(format!(
                "chat is disabled for the portal of job {job_id}"
            )));
        }
    };

    let mut store = VectorStore::new(system.dimension, system.embedding_model.clone());
    store.extend(storage.list_embeddings(job_id).await?)?;
    Ok((config, system, store))
}

/// Answer `question` using the portal's retrieval settings.
#[instrument(skip(storage, generator, chat))]
pub async fn ask_portal(
    storage: &Storage,
    generator: EmbeddingGenerator,
    chat: Arc<dyn ChatProvider>,
    job_id: &str,
    question: &str,
) -> Result<ChatAnswer> {
    let question = question.trim();
    if question.is_empty() {
        return Err(PortalGenError::validation("question is empty"));
    }

    let (_, system, store) = load_knowledge_base(storage, job_id).await?;
    if generator.model() != system.embedding_model {
        return Err(PortalGenError::config(format!(
            "portal was indexed with '{}' but the configured embedding model is '{}'",
            system.embedding_model,
            generator.model()
        )));
    }

    let processor = RagQueryProcessor::new(generator, system.query.clone());
    let answer = ChatAssistant::new(processor, chat, system)
        .answer(question, &store)
        .await?;

    info!(
        grounded = answer.grounded,
        sources = answer.sources.len(),
        "question answered"
    );
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use cvportal_rag::{EmbeddingProvider, INSUFFICIENT_INFORMATION};
    use cvportal_shared::{
        ChunkMetadata, ContentType, EmbeddingProviderKind, PortalStatus, QuerySettings, RagConfig,
        RagEmbedding,
    };
    use uuid::Uuid;

    /// Maps a question onto a fixed axis so similarity is predictable.
    struct AxisProvider;

    #[async_trait]
    impl EmbeddingProvider for AxisProvider {
        fn model(&self) -> &str {
            "axis"
        }

        fn dimension(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.to_lowercase().contains("aws") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct EchoChat {
        contexts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatProvider for EchoChat {
        fn model(&self) -> &str {
            "echo"
        }

        async fn complete(&self, _system_prompt: &str, context: &str, _query: &str) -> Result<String> {
            self.contexts.lock().unwrap().push(context.to_string());
            Ok("John has five years of AWS experience.".into())
        }
    }

    fn embedding(key: &str, content: &str, vector: Vec<f32>) -> RagEmbedding {
        RagEmbedding {
            id: Uuid::now_v7().to_string(),
            content: content.into(),
            metadata: ChunkMetadata {
                section: "experience".into(),
                subsection: None,
                importance: 9,
                keywords: Vec::new(),
                content_type: ContentType::Experience,
                chunk_key: key.into(),
                content_hash: key.into(),
                extra: BTreeMap::new(),
            },
            vector,
            tokens: 10,
            created_at: Utc::now(),
        }
    }

    async fn seeded(rag_enabled: bool) -> Storage {
        let path = std::env::temp_dir().join(format!("cvp_ask_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&path).await.unwrap();

        let rag = RagConfig {
            enabled: rag_enabled,
            provider: EmbeddingProviderKind::OpenAi,
            model: "axis".into(),
            dimension: 2,
            indexed_chunks: 2,
        };
        let mut config = PortalConfig::new("job-1", "user-1", rag);
        config.transition(PortalStatus::Generating).unwrap();
        config.transition(PortalStatus::Completed).unwrap();
        if rag_enabled {
            config.rag_system = Some(RagSystemConfig {
                system_prompt: "Answer about John.".into(),
                embedding_model: "axis".into(),
                dimension: 2,
                chat_model: Some("echo".into()),
                query: QuerySettings::default(),
                indexed_chunks: 2,
            });
        }
        storage.save_portal_config(&config).await.unwrap();
        storage
            .upsert_embeddings(
                "job-1",
                &[
                    embedding("experience:0", "Built AWS landing zones at Acme.", vec![1.0, 0.0]),
                    embedding("education:0", "BSc Computer Science.", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn answers_from_relevant_chunks() {
        let storage = seeded(true).await;
        let chat = Arc::new(EchoChat::default());
        let generator = EmbeddingGenerator::new(Arc::new(AxisProvider));

        let answer = ask_portal(&storage, generator, chat.clone(), "job-1", "Does he know AWS?")
            .await
            .unwrap();

        assert!(answer.grounded);
        assert_eq!(answer.sources.len(), 1);
        assert!(chat.contexts.lock().unwrap()[0].contains("AWS landing zones"));
    }

    #[tokio::test]
    async fn disabled_chat_is_rejected() {
        let storage = seeded(false).await;
        let generator = EmbeddingGenerator::new(Arc::new(AxisProvider));
        let err = ask_portal(&storage, generator, Arc::new(EchoChat::default()), "job-1", "hi")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn fallback_answer_without_matches() {
        let storage = seeded(true).await;
        // Zero vectors score 0 against everything.
        struct Zero;
        #[async_trait]
        impl EmbeddingProvider for Zero {
            fn model(&self) -> &str {
                "axis"
            }
            fn dimension(&self) -> usize {
                2
            }
            async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![0.0, 0.0]).collect())
            }
        }
        let chat = Arc::new(EchoChat::default());
        let answer = ask_portal(
            &storage,
            EmbeddingGenerator::new(Arc::new(Zero)),
            chat.clone(),
            "job-1",
            "What is his favourite colour?",
        )
        .await
        .unwrap();

        assert_eq!(answer.answer, INSUFFICIENT_INFORMATION);
        assert!(!answer.grounded);
        assert!(chat.contexts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn model_mismatch_is_a_config_error() {
        let storage = seeded(true).await;
        struct Other;
        #[async_trait]
        impl EmbeddingProvider for Other {
            fn model(&self) -> &str {
                "other"
            }
            fn dimension(&self) -> usize {
                2
            }
            async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
        }
        let err = ask_portal(
            &storage,
            EmbeddingGenerator::new(Arc::new(Other)),
            Arc::new(EchoChat::default()),
            "job-1",
            "AWS?",
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
