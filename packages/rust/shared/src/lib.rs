//! Shared types, error model, and configuration for cvportal.
//!
//! This crate is the foundation depended on by all other cvportal crates.
//! It provides:
//! - [`PortalGenError`]: the unified error type, and [`PortalError`] for the
//!   pipeline boundary
//! - Domain types ([`CvData`], [`PortalConfig`], [`PortalGenerationStep`],
//!   [`TextChunk`], [`RagEmbedding`])
//! - Configuration ([`AppConfig`] and the runtime settings derived from it)

pub mod config;
pub mod error;
pub mod profile;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ChatSettings, DeploymentSettings, EmbeddingSettings, PipelineSettings,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{ErrorCategory, PortalError, PortalGenError, Result};
pub use profile::{
    Certification, CustomSection, CvData, Education, Experience, Language, PersonalInfo,
    Project, Skill,
};
pub use types::{
    ChunkMetadata, ContentType, Customization, DeploymentTarget, DesignTheme,
    EmbeddingProviderKind, MAX_CONTEXT_SOURCES, PortalAnalytics, PortalConfig, PortalGenerationStep, PortalStatus,
    PortalTemplate, PortalUrls, PrivacySettings, QrAsset, QuerySettings, RagConfig,
    RagEmbedding, RagSystemConfig, TextChunk, estimate_tokens,
};
