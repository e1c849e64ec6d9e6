//! libSQL persistence layer.
//!
//! The [`Storage`] struct wraps a local libSQL database holding generation
//! jobs (the parsed profile plus its companion status document), portal
//! configuration documents keyed `portal-{jobId}`, and per-job chunk
//! embeddings.
//!
//! Writes are last-writer-wins; nothing here serializes concurrent
//! generations of the same job.

mod migrations;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use cvportal_shared::{ChunkMetadata, PortalConfig, PortalGenError, PortalUrls, RagEmbedding, Result};
use libsql::{Connection, Database, params};
use serde::{Deserialize, Serialize};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// A generation job as stored by the upstream parser.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub user_id: String,
    /// Raw profile document; validated and typed by the pipeline.
    pub profile: serde_json::Value,
    pub status: String,
    pub portal_data: Option<PortalData>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Companion job-status document updated as a portal is generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalData {
    pub urls: PortalUrls,
    pub status: String,
}

fn storage_err(e: impl std::fmt::Display) -> PortalGenError {
    PortalGenError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PortalGenError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    PortalGenError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PortalGenError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Job operations
    // -----------------------------------------------------------------------

    /// Insert (or replace) a job with its parsed profile document.
    pub async fn insert_job(
        &self,
        id: &str,
        user_id: &str,
        profile: &serde_json::Value,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let profile_json = serde_json::to_string(profile)?;
        self.conn
            .execute(
                "INSERT INTO jobs (id, user_id, profile_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                   user_id = excluded.user_id,
                   profile_json = excluded.profile_json,
                   updated_at = excluded.updated_at",
                params![id, user_id, profile_json, now.as_str(), now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, user_id, profile_json, status, portal_data_json, created_at, updated_at
                 FROM jobs WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let profile_json: String = row.get(2).map_err(storage_err)?;
                let portal_data = match row.get::<String>(4) {
                    Ok(json) => Some(serde_json::from_str(&json)?),
                    Err(_) => None,
                };
                Ok(Some(JobRecord {
                    id: row.get(0).map_err(storage_err)?,
                    user_id: row.get(1).map_err(storage_err)?,
                    profile: serde_json::from_str(&profile_json)?,
                    status: row.get(3).map_err(storage_err)?,
                    portal_data,
                    created_at: parse_timestamp(&row.get::<String>(5).map_err(storage_err)?)?,
                    updated_at: parse_timestamp(&row.get::<String>(6).map_err(storage_err)?)?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Replace the stored profile document of a job.
    pub async fn update_job_profile(&self, id: &str, profile: &serde_json::Value) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let profile_json = serde_json::to_string(profile)?;
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET profile_json = ?1, updated_at = ?2 WHERE id = ?3",
                params![profile_json, now.as_str(), id],
            )
            .await
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(PortalGenError::Storage(format!("job {id} not found")));
        }
        Ok(())
    }

    /// Update the job's companion `portalData` document.
    pub async fn update_portal_data(&self, id: &str, data: &PortalData) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let json = serde_json::to_string(data)?;
        self.conn
            .execute(
                "UPDATE jobs SET portal_data_json = ?1, updated_at = ?2 WHERE id = ?3",
                params![json, now.as_str(), id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Portal config operations
    // -----------------------------------------------------------------------

    /// Upsert a portal document at its `portal-{jobId}` key.
    pub async fn save_portal_config(&self, config: &PortalConfig) -> Result<()> {
        self.check_writable()?;
        let json = serde_json::to_string(config)?;
        self.conn
            .execute(
                "INSERT INTO portal_configs (id, job_id, status, config_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                   status = excluded.status,
                   config_json = excluded.config_json,
                   updated_at = excluded.updated_at",
                params![
                    config.id.as_str(),
                    config.job_id.as_str(),
                    config.status.as_str(),
                    json,
                    config.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Load the portal document for a job.
    pub async fn get_portal_config(&self, job_id: &str) -> Result<Option<PortalConfig>> {
        let mut rows = self
            .conn
            .query(
                "SELECT config_json FROM portal_configs WHERE id = ?1",
                params![PortalConfig::key_for(job_id)],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let json: String = row.get(0).map_err(storage_err)?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Delete the portal document for a job.
    pub async fn delete_portal_config(&self, job_id: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM portal_configs WHERE id = ?1",
                params![PortalConfig::key_for(job_id)],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Embedding operations
    // -----------------------------------------------------------------------

    /// Store embeddings for a job, replacing any with the same chunk key.
    ///
    /// The batch is written in one transaction: either every row lands or
    /// none do.
    pub async fn upsert_embeddings(&self, job_id: &str, embeddings: &[RagEmbedding]) -> Result<()> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(storage_err)?;
        for embedding in embeddings {
            if let Err(e) = write_embedding(&tx, job_id, embedding).await {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "embedding rollback failed");
                }
                return Err(e);
            }
        }
        tx.commit().await.map_err(storage_err)?;
        tracing::debug!(job_id, count = embeddings.len(), "stored embeddings");
        Ok(())
    }

    /// All embeddings of a job in insertion order.
    pub async fn list_embeddings(&self, job_id: &str) -> Result<Vec<RagEmbedding>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, content, metadata_json, vector_json, tokens, created_at
                 FROM embeddings WHERE job_id = ?1 ORDER BY rowid",
                params![job_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let metadata_json: String = row.get(2).map_err(storage_err)?;
            let vector_json: String = row.get(3).map_err(storage_err)?;
            let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)?;
            results.push(RagEmbedding {
                id: row.get(0).map_err(storage_err)?,
                content: row.get(1).map_err(storage_err)?,
                metadata,
                vector: serde_json::from_str(&vector_json)?,
                tokens: row.get::<i64>(4).map_err(storage_err)? as usize,
                created_at: parse_timestamp(&row.get::<String>(5).map_err(storage_err)?)?,
            });
        }
        Ok(results)
    }

    /// Chunk keys already embedded for a job, mapped to the content hash
    /// they were embedded from.
    pub async fn covered_chunks(&self, job_id: &str) -> Result<HashMap<String, String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT chunk_key, metadata_json FROM embeddings WHERE job_id = ?1",
                params![job_id],
            )
            .await
            .map_err(storage_err)?;

        let mut covered = HashMap::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let metadata_json: String = row.get(1).map_err(storage_err)?;
            let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)?;
            covered.insert(row.get::<String>(0).map_err(storage_err)?, metadata.content_hash);
        }
        Ok(covered)
    }

    /// Remove every stored embedding of a job.
    pub async fn clear_embeddings(&self, job_id: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM embeddings WHERE job_id = ?1", params![job_id])
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

async fn write_embedding(conn: &Connection, job_id: &str, embedding: &RagEmbedding) -> Result<()> {
    let metadata_json = serde_json::to_string(&embedding.metadata)?;
    let vector_json = serde_json::to_string(&embedding.vector)?;
    conn.execute(
        "INSERT INTO embeddings (id, job_id, chunk_key, content, metadata_json, vector_json, dimension, tokens, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(job_id, chunk_key) DO UPDATE SET
           id = excluded.id,
           content = excluded.content,
           metadata_json = excluded.metadata_json,
           vector_json = excluded.vector_json,
           dimension = excluded.dimension,
           tokens = excluded.tokens,
           created_at = excluded.created_at",
        params![
            embedding.id.as_str(),
            job_id,
            embedding.metadata.chunk_key.as_str(),
            embedding.content.as_str(),
            metadata_json,
            vector_json,
            embedding.vector.len() as i64,
            embedding.tokens as i64,
            embedding.created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(storage_err)?;
    Ok(())
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PortalGenError::Storage(format!("invalid date: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvportal_shared::{ContentType, EmbeddingProviderKind, PortalStatus, RagConfig};
    use serde_json::json;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("cvp_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn embedding(key: &str, vector: Vec<f32>) -> RagEmbedding {
        RagEmbedding {
            id: Uuid::now_v7().to_string(),
            content: format!("content for {key}"),
            metadata: ChunkMetadata {
                section: key.split(':').next().unwrap_or_default().into(),
                subsection: None,
                importance: 7,
                keywords: vec!["rust".into()],
                content_type: ContentType::Project,
                chunk_key: key.into(),
                content_hash: "hash".into(),
                extra: Default::default(),
            },
            vector,
            tokens: 4,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("cvp_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn job_crud() {
        let storage = test_storage().await;
        let profile = json!({"personalInfo": {"name": "John Doe"}});
        storage.insert_job("job-1", "user-1", &profile).await.expect("insert job");

        let job = storage.get_job("job-1").await.expect("get job").expect("exists");
        assert_eq!(job.user_id, "user-1");
        assert_eq!(job.profile["personalInfo"]["name"], "John Doe");
        assert!(job.portal_data.is_none());

        let data = PortalData {
            urls: PortalUrls {
                portal: "https://john-doe-cv-portal.hf.space".into(),
                ..Default::default()
            },
            status: "completed".into(),
        };
        storage.update_portal_data("job-1", &data).await.expect("update portal data");
        let job = storage.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.portal_data, Some(data));

        assert!(storage.get_job("missing").await.unwrap().is_none());
        assert!(storage.update_job_profile("missing", &profile).await.is_err());
    }

    #[tokio::test]
    async fn portal_config_upsert_and_delete() {
        let storage = test_storage().await;
        let rag = RagConfig {
            enabled: true,
            provider: EmbeddingProviderKind::OpenAi,
            model: "m".into(),
            dimension: 3,
            indexed_chunks: 0,
        };
        let mut config = PortalConfig::new("job-7", "user-7", rag);
        storage.save_portal_config(&config).await.expect("save");

        config.transition(PortalStatus::Generating).unwrap();
        config.transition(PortalStatus::Completed).unwrap();
        storage.save_portal_config(&config).await.expect("save again");

        let loaded = storage.get_portal_config("job-7").await.unwrap().expect("exists");
        assert_eq!(loaded.id, "portal-job-7");
        assert_eq!(loaded.status, PortalStatus::Completed);

        storage.delete_portal_config("job-7").await.expect("delete");
        assert!(storage.get_portal_config("job-7").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn embeddings_keep_insertion_order_and_keys() {
        let storage = test_storage().await;
        let batch = vec![
            embedding("personal:0", vec![1.0, 0.0]),
            embedding("projects:0", vec![0.0, 1.0]),
            embedding("projects:1", vec![0.5, 0.5]),
        ];
        storage.upsert_embeddings("job-1", &batch).await.expect("upsert");

        // Re-upserting an existing key replaces it in place.
        let replaced = embedding("projects:0", vec![0.1, 0.9]);
        storage
            .upsert_embeddings("job-1", std::slice::from_ref(&replaced))
            .await
            .unwrap();

        let stored = storage.list_embeddings("job-1").await.expect("list");
        let keys: Vec<&str> = stored.iter().map(|e| e.metadata.chunk_key.as_str()).collect();
        assert_eq!(keys, vec!["personal:0", "projects:0", "projects:1"]);
        assert_eq!(stored[1].vector, vec![0.1, 0.9]);

        let covered = storage.covered_chunks("job-1").await.unwrap();
        assert_eq!(covered.len(), 3);
        assert_eq!(covered.get("projects:1").map(String::as_str), Some("hash"));

        storage.clear_embeddings("job-1").await.unwrap();
        assert!(storage.list_embeddings("job-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_batch_stores_nothing() {
        let storage = test_storage().await;
        let first = embedding("experience:0", vec![1.0, 0.0]);
        // Same primary key under a different chunk key violates the id constraint.
        let mut clash = embedding("experience:1", vec![0.0, 1.0]);
        clash.id = first.id.clone();
        let tail = embedding("experience:2", vec![0.5, 0.5]);

        let result = storage.upsert_embeddings("job-1", &[first, clash, tail]).await;
        assert!(result.is_err());
        assert!(storage.list_embeddings("job-1").await.unwrap().is_empty());
        assert!(storage.covered_chunks("job-1").await.unwrap().is_empty());

        // The connection is usable again after the rollback.
        storage
            .upsert_embeddings("job-1", &[embedding("experience:0", vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(storage.list_embeddings("job-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("cvp_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_job("job-1", "user-1", &json!({})).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let result = ro.insert_job("job-2", "user-2", &json!({})).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
        assert!(ro.get_job("job-1").await.unwrap().is_some());
    }
}
