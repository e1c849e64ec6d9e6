//! Error types for cvportal.
//!
//! Library crates use [`PortalGenError`] via `thiserror`.
//! At the pipeline boundary every failure is converted to a structured
//! [`PortalError`]; the CLI wraps errors with `color-eyre`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::PortalGenerationStep;

/// Top-level error type for all cvportal operations.
#[derive(Debug, thiserror::Error)]
pub enum PortalGenError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Missing or malformed required input.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The embedding provider failed or returned an unusable response.
    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    /// Vector store consistency violated (dimension mismatch, bad snapshot).
    #[error("vector store error: {0}")]
    VectorStore(String),

    /// A remote deployment step failed.
    #[error("deployment error: {0}")]
    Deployment(String),

    /// CV document update or QR asset generation failed.
    #[error("asset update error: {0}")]
    QrUpdate(String),

    /// An operation exceeded its time budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Generic HTTP/transport error.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Catch-all for unexpected failures.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PortalGenError>;

impl PortalGenError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::EmbeddingProvider(_) => "EMBEDDING_PROVIDER_ERROR",
            Self::VectorStore(_) => "VECTOR_STORE_ERROR",
            Self::Deployment(_) => "DEPLOYMENT_ERROR",
            Self::QrUpdate(_) => "QR_UPDATE_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Io { .. } | Self::Serialization(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Coarse category used for grouping in reports.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config { .. } | Self::Validation { .. } => ErrorCategory::Validation,
            Self::EmbeddingProvider(_) | Self::VectorStore(_) => ErrorCategory::Rag,
            Self::Deployment(_) | Self::Network(_) => ErrorCategory::Deployment,
            Self::QrUpdate(_) => ErrorCategory::Assets,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Io { .. } | Self::Serialization(_) | Self::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }
}

impl From<serde_json::Error> for PortalGenError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// PortalError (pipeline boundary)
// ---------------------------------------------------------------------------

/// Error category reported alongside a [`PortalError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Rag,
    Deployment,
    Assets,
    Timeout,
    Storage,
    Internal,
}

/// Structured error surfaced by `generate_portal`. Never a raw error value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalError {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
    pub category: ErrorCategory,
    pub timestamp: DateTime<Utc>,
}

impl PortalError {
    /// Build a boundary error for a failure raised while running `step`.
    ///
    /// Recoverability follows the step's classification: non-fatal steps
    /// produce recoverable errors, fatal steps do not.
    pub fn at_step(step: PortalGenerationStep, err: &PortalGenError) -> Self {
        Self {
            code: err.code().to_string(),
            message: format!("{step}: {err}"),
            recoverable: !step.is_fatal(),
            category: err.category(),
            timestamp: Utc::now(),
        }
    }

    /// Error for the overall wall-clock budget expiring.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            code: "TIMEOUT".into(),
            message: message.into(),
            recoverable: false,
            category: ErrorCategory::Timeout,
            timestamp: Utc::now(),
        }
    }

    /// Build a non-step error (e.g. a failure creating the portal config).
    pub fn fatal(err: &PortalGenError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            recoverable: false,
            category: err.category(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PortalGenError::validation("personalInfo.name is required");
        assert_eq!(
            err.to_string(),
            "validation error: personalInfo.name is required"
        );
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn recoverability_comes_from_the_step() {
        let err = PortalGenError::EmbeddingProvider("HTTP 500".into());
        let portal_err = PortalError::at_step(PortalGenerationStep::CreateEmbeddings, &err);
        assert!(portal_err.recoverable);
        assert_eq!(portal_err.code, "EMBEDDING_PROVIDER_ERROR");
        assert_eq!(portal_err.category, ErrorCategory::Rag);

        // The same error raised at a fatal step is not recoverable.
        let portal_err = PortalError::at_step(PortalGenerationStep::FinalizePortal, &err);
        assert!(!portal_err.recoverable);
    }

    #[test]
    fn timeout_error_shape() {
        let err = PortalError::timeout("budget of 50ms exhausted");
        assert_eq!(err.code, "TIMEOUT");
        assert_eq!(err.category, ErrorCategory::Timeout);
        assert!(!err.recoverable);
    }
}
