//! Portal generation orchestration for cvportal.
//!
//! This crate ties together profile validation, naming, design resolution,
//! the RAG index, deployment and post-deployment assets into one pipeline
//! ([`PipelineOrchestrator::generate_portal`]), plus question answering
//! against a finished portal ([`ask_portal`]).

pub mod ask;
pub mod assets;
pub mod design;
pub mod pipeline;
pub mod urls;

pub use ask::{ask_portal, load_knowledge_base};
pub use assets::{QR_CHANNELS, QrCodeService, TrackedLinkQrService, update_cv_document};
pub use design::{MAX_CUSTOM_CSS_BYTES, resolve_theme};
pub use pipeline::{
    GenerateOptions, OrchestratorSettings, PipelineOrchestrator, PortalGenerationResult,
    PortalOverrides, ProgressReporter, SilentProgress, StepOutcome,
};
