//! Core domain types for portal generation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PortalGenError, Result};

// ---------------------------------------------------------------------------
// PortalGenerationStep
// ---------------------------------------------------------------------------

/// Ordered pipeline steps. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortalGenerationStep {
    ValidateInput,
    ExtractCvData,
    ConfigureUrls,
    GenerateTemplate,
    CustomizeDesign,
    CreateEmbeddings,
    SetupVectorDb,
    BuildRagSystem,
    DeployToHuggingface,
    UpdateCvDocument,
    GenerateQrCodes,
    FinalizePortal,
}

impl PortalGenerationStep {
    /// All steps in execution order.
    pub const ALL: [PortalGenerationStep; 12] = [
        Self::ValidateInput,
        Self::ExtractCvData,
        Self::ConfigureUrls,
        Self::GenerateTemplate,
        Self::CustomizeDesign,
        Self::CreateEmbeddings,
        Self::SetupVectorDb,
        Self::BuildRagSystem,
        Self::DeployToHuggingface,
        Self::UpdateCvDocument,
        Self::GenerateQrCodes,
        Self::FinalizePortal,
    ];

    /// Whether a failure of this step aborts the whole pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ValidateInput
                | Self::ExtractCvData
                | Self::ConfigureUrls
                | Self::GenerateTemplate
                | Self::FinalizePortal
        )
    }

    /// The RAG steps, which degrade together.
    pub fn is_rag_step(&self) -> bool {
        matches!(
            self,
            Self::CreateEmbeddings | Self::SetupVectorDb | Self::BuildRagSystem
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidateInput => "VALIDATE_INPUT",
            Self::ExtractCvData => "EXTRACT_CV_DATA",
            Self::ConfigureUrls => "CONFIGURE_URLS",
            Self::GenerateTemplate => "GENERATE_TEMPLATE",
            Self::CustomizeDesign => "CUSTOMIZE_DESIGN",
            Self::CreateEmbeddings => "CREATE_EMBEDDINGS",
            Self::SetupVectorDb => "SETUP_VECTOR_DB",
            Self::BuildRagSystem => "BUILD_RAG_SYSTEM",
            Self::DeployToHuggingface => "DEPLOY_TO_HUGGINGFACE",
            Self::UpdateCvDocument => "UPDATE_CV_DOCUMENT",
            Self::GenerateQrCodes => "GENERATE_QR_CODES",
            Self::FinalizePortal => "FINALIZE_PORTAL",
        }
    }
}

impl fmt::Display for PortalGenerationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortalGenerationStep {
    type Err = PortalGenError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('-', "_").to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == wanted)
            .ok_or_else(|| PortalGenError::validation(format!("unknown pipeline step '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// PortalStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a [`PortalConfig`]: PENDING → GENERATING → COMPLETED | FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortalStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl PortalStatus {
    pub fn can_transition_to(&self, next: PortalStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Generating)
                | (Self::Generating, Self::Completed)
                | (Self::Generating, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Portal configuration
// ---------------------------------------------------------------------------

/// Visual template for the generated portal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortalTemplate {
    #[default]
    Professional,
    Minimal,
    Creative,
    Technical,
}

impl PortalTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Professional => "professional",
            Self::Minimal => "minimal",
            Self::Creative => "creative",
            Self::Technical => "technical",
        }
    }
}

impl FromStr for PortalTemplate {
    type Err = PortalGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "professional" => Ok(Self::Professional),
            "minimal" => Ok(Self::Minimal),
            "creative" => Ok(Self::Creative),
            "technical" => Ok(Self::Technical),
            other => Err(PortalGenError::validation(format!(
                "unknown portal template '{other}'"
            ))),
        }
    }
}

/// Caller-supplied customization payload. Unset fields fall back to the
/// template's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_order: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_css: Option<String>,
}

/// Fully resolved design, produced by the customization step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignTheme {
    pub primary_color: String,
    pub secondary_color: String,
    pub background_color: String,
    pub font_family: String,
    pub section_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_css: Option<String>,
}

/// Which embedding API shape to speak.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    OpenAi,
    HuggingFace,
}

impl EmbeddingProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::HuggingFace => "huggingface",
        }
    }
}

/// RAG settings for one job. `enabled` drops to false when a RAG step fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagConfig {
    pub enabled: bool,
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub dimension: usize,
    #[serde(default)]
    pub indexed_chunks: usize,
}

/// Most sources a single answer may cite.
pub const MAX_CONTEXT_SOURCES: usize = 3;

/// Retrieval parameters used by the query processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySettings {
    pub top_k: usize,
    pub min_score: f32,
    pub max_sources: usize,
    pub max_context_tokens: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: 0.7,
            max_sources: 3,
            max_context_tokens: 1500,
        }
    }
}

/// The assembled chat system for a portal, stored once RAG is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagSystemConfig {
    pub system_prompt: String,
    pub embedding_model: String,
    pub dimension: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_model: Option<String>,
    pub query: QuerySettings,
    pub indexed_chunks: usize,
}

/// Where the portal is deployed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTarget {
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Filled in by the URL configuration step when empty.
    #[serde(default)]
    pub space_name: String,
    pub sdk: String,
    pub hardware: String,
    pub private: bool,
}

impl Default for DeploymentTarget {
    fn default() -> Self {
        Self {
            platform: "huggingface".into(),
            namespace: None,
            space_name: String::new(),
            sdk: "gradio".into(),
            hardware: "cpu-basic".into(),
            private: false,
        }
    }
}

impl DeploymentTarget {
    /// `namespace/space_name`, or just the space name without a namespace.
    pub fn space_id(&self) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => format!("{ns}/{}", self.space_name),
            _ => self.space_name.clone(),
        }
    }
}

/// Public URLs of the portal. Placeholders until a deployment succeeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalUrls {
    pub portal: String,
    pub chat: String,
    pub api: String,
    #[serde(default)]
    pub deployed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalAnalytics {
    pub views: u64,
    pub chat_interactions: u64,
    pub downloads: u64,
    pub qr_scans: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacySettings {
    pub public: bool,
    pub show_contact_info: bool,
    pub allow_chat: bool,
    pub analytics_enabled: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            public: true,
            show_contact_info: true,
            allow_chat: true,
            analytics_enabled: true,
        }
    }
}

/// A trackable link produced for one distribution channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrAsset {
    pub channel: String,
    pub target_url: String,
    pub tracking_url: String,
}

/// One portal per generation job, stored at key `portal-{jobId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalConfig {
    pub id: String,
    pub job_id: String,
    pub user_id: String,
    pub template: PortalTemplate,
    #[serde(default)]
    pub customization: Customization,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<DesignTheme>,
    pub rag_config: RagConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_system: Option<RagSystemConfig>,
    pub deployment: DeploymentTarget,
    pub status: PortalStatus,
    #[serde(default)]
    pub urls: PortalUrls,
    #[serde(default)]
    pub analytics: PortalAnalytics,
    #[serde(default)]
    pub privacy: PrivacySettings,
    #[serde(default)]
    pub qr_codes: Vec<QrAsset>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PortalConfig {
    /// Storage key for a job's portal.
    pub fn key_for(job_id: &str) -> String {
        format!("portal-{job_id}")
    }

    /// Create a fresh PENDING config.
    pub fn new(job_id: &str, user_id: &str, rag_config: RagConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Self::key_for(job_id),
            job_id: job_id.to_string(),
            user_id: user_id.to_string(),
            template: PortalTemplate::default(),
            customization: Customization::default(),
            design: None,
            rag_config,
            rag_system: None,
            deployment: DeploymentTarget::default(),
            status: PortalStatus::Pending,
            urls: PortalUrls::default(),
            analytics: PortalAnalytics::default(),
            privacy: PrivacySettings::default(),
            qr_codes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting any transition outside the lifecycle.
    pub fn transition(&mut self, next: PortalStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PortalGenError::Internal(format!(
                "invalid portal status transition {:?} -> {:?}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Turn off chat for this portal.
    pub fn disable_rag(&mut self) {
        self.rag_config.enabled = false;
        self.rag_config.indexed_chunks = 0;
        self.rag_system = None;
    }
}

// ---------------------------------------------------------------------------
// Chunks and embeddings
// ---------------------------------------------------------------------------

/// Kind of profile content a chunk was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Personal,
    Experience,
    Education,
    Skills,
    Project,
    Certification,
    Languages,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub section: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsection: Option<String>,
    /// 1..=10, higher wins ties in search.
    pub importance: u8,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub content_type: ContentType,
    /// `{section}:{index}` identity used to detect already-covered content.
    pub chunk_key: String,
    pub content_hash: String,
    /// Chunk-specific fields (company, dates, issuer...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// A tagged span of profile text. Transient; never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// An embedded chunk. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagEmbedding {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub vector: Vec<f32>,
    pub tokens: usize,
    pub created_at: DateTime<Utc>,
}

/// Rough token count used for context budgeting: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
