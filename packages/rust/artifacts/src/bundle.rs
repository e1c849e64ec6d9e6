//! The set of files uploaded to a portal space.

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use cvportal_shared::{CvData, PortalConfig, QuerySettings, Result};

use crate::theme::{default_theme, render_css};

/// Entrypoint and README produced by the template step.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTemplate {
    pub app_entrypoint: String,
    pub readme: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpaceFile {
    /// Path inside the space repository.
    pub path: String,
    pub contents: Vec<u8>,
}

impl SpaceFile {
    pub fn text(path: &str, contents: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            contents: contents.into().into_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    pub path: String,
    pub bytes: usize,
    pub sha256: String,
}

/// Files plus a manifest describing them, in upload order.
#[derive(Debug, Clone, PartialEq)]
pub struct SpaceBundle {
    pub files: Vec<SpaceFile>,
    pub manifest: Vec<ManifestEntry>,
}

impl SpaceBundle {
    pub fn new(files: Vec<SpaceFile>) -> Self {
        let manifest = files
            .iter()
            .map(|f| ManifestEntry {
                path: f.path.clone(),
                bytes: f.contents.len(),
                sha256: sha256_hex(&f.contents),
            })
            .collect();
        Self { files, manifest }
    }

    pub fn total_bytes(&self) -> usize {
        self.manifest.iter().map(|m| m.bytes).sum()
    }

    pub fn file(&self, path: &str) -> Option<&SpaceFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// The public document the deployed app renders from.
///
/// Contact details are removed from the profile when the privacy settings
/// hide them.
pub fn portal_document(config: &PortalConfig, cv: &CvData) -> Result<serde_json::Value> {
    let mut profile = cv.clone();
    if !config.privacy.show_contact_info {
        profile.personal_info.email = None;
        profile.personal_info.phone = None;
    }

    let design = config
        .design
        .clone()
        .unwrap_or_else(|| default_theme(config.template));

    let (system_prompt, query) = match &config.rag_system {
        Some(system) => (system.system_prompt.clone(), system.query.clone()),
        None => (String::new(), QuerySettings::default()),
    };
    let chat_enabled = config.rag_config.enabled && config.privacy.allow_chat;

    Ok(json!({
        "id": config.id,
        "jobId": config.job_id,
        "template": config.template,
        "design": design,
        "urls": config.urls,
        "privacy": config.privacy,
        "rag": {
            "enabled": chat_enabled,
            "model": config.rag_config.model,
            "dimension": config.rag_config.dimension,
            "systemPrompt": system_prompt,
            "query": query,
        },
        "profile": serde_json::to_value(&profile)?,
    }))
}

/// Assemble every file the space needs.
///
/// `vector_store_json` is only uploaded when chat is enabled for the portal.
pub fn build_space_bundle(
    config: &PortalConfig,
    cv: &CvData,
    rendered: &RenderedTemplate,
    requirements: &str,
    vector_store_json: Option<&str>,
) -> Result<SpaceBundle> {
    let design = config
        .design
        .clone()
        .unwrap_or_else(|| default_theme(config.template));
    let document = portal_document(config, cv)?;

    let mut files = vec![
        SpaceFile::text("app.py", rendered.app_entrypoint.clone()),
        SpaceFile::text("requirements.txt", requirements),
        SpaceFile::text("README.md", rendered.readme.clone()),
        SpaceFile::text("portal_config.json", serde_json::to_string_pretty(&document)?),
        SpaceFile::text("style.css", render_css(&design)),
    ];

    if config.rag_config.enabled {
        if let Some(store) = vector_store_json {
            files.push(SpaceFile::text("vector_store.json", store));
        }
    }

    let bundle = SpaceBundle::new(files);
    for entry in &bundle.manifest {
        debug!(path = %entry.path, bytes = entry.bytes, sha256 = %entry.sha256, "bundle file");
    }
    info!(
        files = bundle.files.len(),
        bytes = bundle.total_bytes(),
        "space bundle assembled"
    );
    Ok(bundle)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvportal_shared::{EmbeddingProviderKind, RagConfig};

    fn config(rag_enabled: bool) -> PortalConfig {
        PortalConfig::new(
            "job-1",
            "user-1",
            RagConfig {
                enabled: rag_enabled,
                provider: EmbeddingProviderKind::OpenAi,
                model: "text-embedding-3-small".into(),
                dimension: 1536,
                indexed_chunks: 0,
            },
        )
    }

    fn cv() -> CvData {
        let mut cv = CvData::default();
        cv.personal_info.name = Some("John Doe".into());
        cv.personal_info.email = Some("john@example.com".into());
        cv
    }

    fn rendered() -> RenderedTemplate {
        RenderedTemplate {
            app_entrypoint: "print('hi')\n".into(),
            readme: "---\n---\n".into(),
        }
    }

    #[test]
    fn manifest_describes_each_file() {
        let bundle =
            build_space_bundle(&config(true), &cv(), &rendered(), "gradio\n", Some("{}")).unwrap();
        let paths: Vec<&str> = bundle.manifest.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "app.py",
                "requirements.txt",
                "README.md",
                "portal_config.json",
                "style.css",
                "vector_store.json"
            ]
        );
        let app = &bundle.manifest[0];
        assert_eq!(app.bytes, "print('hi')\n".len());
        assert_eq!(app.sha256.len(), 64);
    }

    #[test]
    fn vector_store_omitted_when_rag_disabled() {
        let bundle =
            build_space_bundle(&config(false), &cv(), &rendered(), "gradio\n", Some("{}")).unwrap();
        assert!(bundle.file("vector_store.json").is_none());
        let doc: serde_json::Value =
            serde_json::from_slice(&bundle.file("portal_config.json").unwrap().contents).unwrap();
        assert_eq!(doc["rag"]["enabled"], false);
    }

    #[test]
    fn hidden_contact_info_is_stripped() {
        let mut config = config(true);
        config.privacy.show_contact_info = false;
        let doc = portal_document(&config, &cv()).unwrap();
        assert!(doc["profile"]["personalInfo"].get("email").is_none_or(|v| v.is_null()));
        assert_eq!(doc["profile"]["personalInfo"]["name"], "John Doe");
        assert_eq!(doc["design"]["fontFamily"], "Inter");
        assert_eq!(doc["rag"]["query"]["topK"], 10);
    }
}
