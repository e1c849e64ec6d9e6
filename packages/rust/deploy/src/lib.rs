//! Best-effort deployment of a portal bundle to a Spaces-style host.
//!
//! A deployment is four sequential stages, each of which can fail on its own:
//! create the space, upload every bundle file, set environment variables,
//! and poll the runtime until it reports `RUNNING`. Re-deploying to an
//! existing space overwrites its files. Failures are reported in the
//! returned [`DeploymentResult`], never as an error, so a failed deployment
//! cannot invalidate anything already persisted.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use cvportal_artifacts::SpaceBundle;
use cvportal_shared::{DeploymentSettings, DeploymentTarget, PortalConfig, PortalGenError, Result};

/// Deploys a portal; implemented by [`DeploymentStager`] and test fakes.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, config: &PortalConfig, bundle: &SpaceBundle) -> DeploymentResult;
}

/// Which stage of a deployment failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStage {
    CreateSpace,
    UploadFiles,
    ConfigureVariables,
    PollStatus,
}

impl fmt::Display for DeployStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CreateSpace => "create space",
            Self::UploadFiles => "upload files",
            Self::ConfigureVariables => "configure variables",
            Self::PollStatus => "poll status",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<DeployStage>,
}

impl DeploymentResult {
    pub fn deployed(space_url: String) -> Self {
        let api_url = format!("{space_url}/api");
        Self {
            success: true,
            space_url: Some(space_url),
            api_url: Some(api_url),
            error: None,
            failed_stage: None,
        }
    }

    pub fn failed(stage: DeployStage, err: &PortalGenError) -> Self {
        Self {
            success: false,
            space_url: None,
            api_url: None,
            error: Some(format!("{stage}: {err}")),
            failed_stage: Some(stage),
        }
    }
}

#[derive(Serialize)]
struct CreateSpaceRequest<'a> {
    #[serde(rename = "type")]
    repo_type: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
    private: bool,
    sdk: &'a str,
    hardware: &'a str,
}

#[derive(Serialize)]
struct VariableRequest<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct RuntimeResponse {
    stage: String,
    #[serde(default)]
    domains: Vec<RuntimeDomain>,
}

#[derive(Debug, Deserialize)]
struct RuntimeDomain {
    domain: String,
}

/// Environment variables every portal space receives.
pub fn space_variables(config: &PortalConfig) -> Vec<(String, String)> {
    let mut vars = vec![
        ("PORTAL_JOB_ID".to_string(), config.job_id.clone()),
        ("PORTAL_TEMPLATE".to_string(), config.template.as_str().to_string()),
        ("RAG_ENABLED".to_string(), config.rag_config.enabled.to_string()),
    ];
    if config.rag_config.enabled {
        vars.push(("EMBEDDING_MODEL".to_string(), config.rag_config.model.clone()));
        if let Some(chat_model) = config.rag_system.as_ref().and_then(|s| s.chat_model.clone()) {
            vars.push(("CHAT_MODEL".to_string(), chat_model));
        }
    }
    vars
}

/// Default public URL for a space: `https://{namespace}-{name}.hf.space`.
pub fn default_space_url(target: &DeploymentTarget) -> String {
    let host = target.space_id().to_lowercase().replace(['/', '_', '.'], "-");
    format!("https://{host}.hf.space")
}

/// HTTP implementation of [`Deployer`].
pub struct DeploymentStager {
    client: Client,
    api_base: Url,
    settings: DeploymentSettings,
    extra_variables: Vec<(String, String)>,
}

impl DeploymentStager {
    pub fn new(settings: DeploymentSettings) -> Result<Self> {
        let api_base = Url::parse(&settings.api_base).map_err(|e| {
            PortalGenError::config(format!("invalid deployment api_base '{}': {e}", settings.api_base))
        })?;
        let client = Client::builder()
            .user_agent(concat!("cvportal/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()
            .map_err(|e| PortalGenError::Network(format!("client build: {e}")))?;

        Ok(Self {
            client,
            api_base,
            settings,
            extra_variables: Vec::new(),
        })
    }

    /// Additional variables set on every deployed space.
    pub fn with_variables(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.extra_variables.extend(vars);
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| PortalGenError::config("deployment api_base cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments.iter().flat_map(|s| s.split('/')));
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    #[instrument(skip_all, fields(space = %target.space_id()))]
    pub async fn create_space(&self, target: &DeploymentTarget) -> Result<()> {
        let url = self.endpoint(&["api", "repos", "create"])?;
        let body = CreateSpaceRequest {
            repo_type: "space",
            name: &target.space_name,
            organization: target.namespace.as_deref(),
            private: target.private,
            sdk: &target.sdk,
            hardware: &target.hardware,
        };

        let response = self
            .authorized(self.client.post(url).json(&body))
            .send()
            .await
            .map_err(|e| PortalGenError::Deployment(format!("create request failed: {e}")))?;

        match response.status() {
            s if s.is_success() => {
                info!("space created");
                Ok(())
            }
            StatusCode::CONFLICT => {
                info!("space already exists, reusing");
                Ok(())
            }
            s => Err(PortalGenError::Deployment(format!(
                "create returned HTTP {s}: {}",
                error_body(response).await
            ))),
        }
    }

    #[instrument(skip_all, fields(space = %target.space_id(), files = bundle.files.len()))]
    pub async fn upload_files(&self, target: &DeploymentTarget, bundle: &SpaceBundle) -> Result<()> {
        let space_id = target.space_id();
        for file in &bundle.files {
            let url = self.endpoint(&["api", "spaces", &space_id, "files", &file.path])?;
            let response = self
                .authorized(self.client.put(url).body(file.contents.clone()))
                .send()
                .await
                .map_err(|e| {
                    PortalGenError::Deployment(format!("upload of {} failed: {e}", file.path))
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(PortalGenError::Deployment(format!(
                    "upload of {} returned HTTP {status}: {}",
                    file.path,
                    error_body(response).await
                )));
            }
            debug!(path = %file.path, bytes = file.contents.len(), "uploaded");
        }
        Ok(())
    }

    #[instrument(skip_all, fields(space = %target.space_id(), count = vars.len()))]
    pub async fn configure_variables(
        &self,
        target: &DeploymentTarget,
        vars: &[(String, String)],
    ) -> Result<()> {
        let space_id = target.space_id();
        let url = self.endpoint(&["api", "spaces", &space_id, "variables"])?;
        for (key, value) in vars {
            let response = self
                .authorized(self.client.post(url.clone()).json(&VariableRequest { key, value }))
                .send()
                .await
                .map_err(|e| PortalGenError::Deployment(format!("setting {key} failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(PortalGenError::Deployment(format!(
                    "setting {key} returned HTTP {status}"
                )));
            }
        }
        Ok(())
    }

    /// Poll the runtime until it is running. Returns the public URL.
    #[instrument(skip_all, fields(space = %target.space_id()))]
    pub async fn wait_until_running(&self, target: &DeploymentTarget) -> Result<String> {
        let space_id = target.space_id();
        let url = self.endpoint(&["api", "spaces", &space_id, "runtime"])?;
        let attempts = self.settings.max_poll_attempts.max(1);

        for attempt in 1..=attempts {
            match self.fetch_runtime(url.clone()).await {
                Ok(runtime) if runtime.stage == "RUNNING" => {
                    info!(attempt, "space is running");
                    let space_url = runtime
                        .domains
                        .first()
                        .map(|d| format!("https://{}", d.domain))
                        .unwrap_or_else(|| default_space_url(target));
                    return Ok(space_url);
                }
                Ok(runtime) if is_error_stage(&runtime.stage) => {
                    return Err(PortalGenError::Deployment(format!(
                        "space entered {} stage",
                        runtime.stage
                    )));
                }
                Ok(runtime) => debug!(attempt, stage = %runtime.stage, "space not ready"),
                Err(e) => warn!(attempt, error = %e, "runtime poll failed"),
            }

            if attempt < attempts {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }

        Err(PortalGenError::Deployment(format!(
            "space not ready after {attempts} poll attempts"
        )))
    }

    async fn fetch_runtime(&self, url: Url) -> Result<RuntimeResponse> {
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| PortalGenError::Network(format!("runtime request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PortalGenError::Network(format!("runtime returned HTTP {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| PortalGenError::Serialization(format!("runtime response: {e}")))
    }
}

#[async_trait]
impl Deployer for DeploymentStager {
    #[instrument(skip_all, fields(job_id = %config.job_id, space = %config.deployment.space_id()))]
    async fn deploy(&self, config: &PortalConfig, bundle: &SpaceBundle) -> DeploymentResult {
        let target = &config.deployment;
        if target.space_name.is_empty() {
            return DeploymentResult::failed(
                DeployStage::CreateSpace,
                &PortalGenError::validation("deployment target has no space name"),
            );
        }

        if let Err(e) = self.create_space(target).await {
            return DeploymentResult::failed(DeployStage::CreateSpace, &e);
        }
        if let Err(e) = self.upload_files(target, bundle).await {
            return DeploymentResult::failed(DeployStage::UploadFiles, &e);
        }

        let mut vars = space_variables(config);
        vars.extend(self.extra_variables.iter().cloned());
        if let Err(e) = self.configure_variables(target, &vars).await {
            return DeploymentResult::failed(DeployStage::ConfigureVariables, &e);
        }

        match self.wait_until_running(target).await {
            Ok(space_url) => {
                info!(%space_url, "deployment complete");
                DeploymentResult::deployed(space_url)
            }
            Err(e) => DeploymentResult::failed(DeployStage::PollStatus, &e),
        }
    }
}

fn is_error_stage(stage: &str) -> bool {
    stage.ends_with("_ERROR") || matches!(stage, "NO_APP_FILE" | "STOPPED" | "PAUSED")
}

async fn error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvportal_artifacts::SpaceFile;
    use cvportal_shared::{EmbeddingProviderKind, RagConfig};
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(api_base: String) -> DeploymentSettings {
        DeploymentSettings {
            api_base,
            namespace: Some("cvportal".into()),
            token: Some("hf_test".into()),
            sdk: "gradio".into(),
            hardware: "cpu-basic".into(),
            private: false,
            max_poll_attempts: 3,
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    fn portal() -> PortalConfig {
        let mut config = PortalConfig::new(
            "job-1",
            "user-1",
            RagConfig {
                enabled: true,
                provider: EmbeddingProviderKind::OpenAi,
                model: "text-embedding-3-small".into(),
                dimension: 1536,
                indexed_chunks: 4,
            },
        );
        config.deployment.namespace = Some("cvportal".into());
        config.deployment.space_name = "john-doe-job1-cv-portal".into();
        config
    }

    fn bundle() -> SpaceBundle {
        SpaceBundle::new(vec![
            SpaceFile::text("app.py", "print('hi')"),
            SpaceFile::text("README.md", "---\n---\n"),
        ])
    }

    async fn mount_happy_create_upload_vars(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/repos/create"))
            .and(header("authorization", "Bearer hf_test"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/spaces/cvportal/john-doe-job1-cv-portal/files/app.py"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/spaces/cvportal/john-doe-job1-cv-portal/files/README.md"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spaces/cvportal/john-doe-job1-cv-portal/variables"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn deploys_and_waits_for_running() {
        let server = MockServer::start().await;
        mount_happy_create_upload_vars(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/spaces/cvportal/john-doe-job1-cv-portal/runtime"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"stage": "BUILDING"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/spaces/cvportal/john-doe-job1-cv-portal/runtime"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "stage": "RUNNING",
                "domains": [{"domain": "cvportal-john-doe-job1-cv-portal.hf.space"}]
            })))
            .mount(&server)
            .await;

        let stager = DeploymentStager::new(settings(server.uri())).unwrap();
        let result = stager.deploy(&portal(), &bundle()).await;

        assert!(result.success, "{result:?}");
        assert_eq!(
            result.space_url.as_deref(),
            Some("https://cvportal-john-doe-job1-cv-portal.hf.space")
        );
        assert_eq!(
            result.api_url.as_deref(),
            Some("https://cvportal-john-doe-job1-cv-portal.hf.space/api")
        );
    }

    #[tokio::test]
    async fn existing_space_is_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/repos/create"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spaces/cvportal/john-doe-job1-cv-portal/variables"))
            .and(body_json(serde_json::json!({"key": "PORTAL_JOB_ID", "value": "job-1"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spaces/cvportal/john-doe-job1-cv-portal/variables"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"stage": "RUNNING"})),
            )
            .mount(&server)
            .await;

        let stager = DeploymentStager::new(settings(server.uri())).unwrap();
        let result = stager.deploy(&portal(), &bundle()).await;

        assert!(result.success);
        assert_eq!(
            result.space_url.as_deref(),
            Some("https://cvportal-john-doe-job1-cv-portal.hf.space")
        );
    }

    #[tokio::test]
    async fn upload_failure_stops_before_variables() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/repos/create"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spaces/cvportal/john-doe-job1-cv-portal/variables"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let stager = DeploymentStager::new(settings(server.uri())).unwrap();
        let result = stager.deploy(&portal(), &bundle()).await;

        assert!(!result.success);
        assert_eq!(result.failed_stage, Some(DeployStage::UploadFiles));
        let error = result.error.unwrap();
        assert!(error.contains("app.py"));
        assert!(error.contains("disk full"));
    }

    #[tokio::test]
    async fn build_error_stage_fails_fast() {
        let server = MockServer::start().await;
        mount_happy_create_upload_vars(&server).await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"stage": "BUILD_ERROR"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let stager = DeploymentStager::new(settings(server.uri())).unwrap();
        let result = stager.deploy(&portal(), &bundle()).await;

        assert!(!result.success);
        assert_eq!(result.failed_stage, Some(DeployStage::PollStatus));
        assert!(result.error.unwrap().contains("BUILD_ERROR"));
    }

    #[tokio::test]
    async fn polling_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        mount_happy_create_upload_vars(&server).await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"stage": "BUILDING"})),
            )
            .expect(3)
            .mount(&server)
            .await;

        let stager = DeploymentStager::new(settings(server.uri())).unwrap();
        let result = stager.deploy(&portal(), &bundle()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("not ready after 3 poll attempts"));
    }

    #[tokio::test]
    async fn create_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/repos/create"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let stager = DeploymentStager::new(settings(server.uri())).unwrap();
        let result = stager.deploy(&portal(), &bundle()).await;

        assert_eq!(result.failed_stage, Some(DeployStage::CreateSpace));
        assert!(result.error.unwrap().contains("401"));
    }

    #[test]
    fn variables_reflect_rag_state() {
        let mut config = portal();
        let keys: Vec<String> = space_variables(&config).into_iter().map(|(k, _)| k).collect();
        assert!(keys.contains(&"EMBEDDING_MODEL".to_string()));

        config.disable_rag();
        let vars = space_variables(&config);
        assert!(vars.contains(&("RAG_ENABLED".to_string(), "false".to_string())));
        assert!(vars.iter().all(|(k, _)| k != "EMBEDDING_MODEL"));
    }
}
