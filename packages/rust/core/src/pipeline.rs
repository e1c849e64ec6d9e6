//! Portal generation pipeline: job → validated profile → URLs → template →
//! design → embeddings → vector store → RAG system → deployment → CV links
//! → QR assets → persisted PortalConfig.
//!
//! Steps run strictly in [`PortalGenerationStep::ALL`] order. A fatal step
//! failure aborts the run with `success = false`; a non-fatal failure adds a
//! warning, degrades the matching feature and the run continues.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use cvportal_artifacts::{
    ReadmeContext, RenderedTemplate, build_space_bundle, default_theme, generate_requirements,
    render_template,
};
use cvportal_deploy::{Deployer, DeploymentResult};
use cvportal_rag::{BatchOptions, ContentChunker, EmbeddingGenerator, VectorStore, build_system_prompt};
use cvportal_shared::{
    AppConfig, Customization, CvData, DeploymentSettings, DeploymentTarget, EmbeddingSettings,
    PipelineSettings, PortalConfig, PortalError, PortalGenError, PortalGenerationStep,
    PortalStatus, PortalTemplate, PortalUrls, PrivacySettings, QuerySettings, RagConfig,
    RagSystemConfig, Result,
};
use cvportal_storage::{JobRecord, PortalData, Storage};

use crate::assets::{QrCodeService, update_cv_document};
use crate::design::resolve_theme;
use crate::urls;

type Step = PortalGenerationStep;

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Caller overrides applied to the fresh PortalConfig.
#[derive(Debug, Clone, Default)]
pub struct PortalOverrides {
    pub template: Option<PortalTemplate>,
    pub customization: Option<Customization>,
    pub privacy: Option<PrivacySettings>,
    /// `Some(false)` builds a portal without chat.
    pub rag_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Regenerate even when a completed portal exists; also clears stored
    /// embeddings so every chunk is embedded again.
    pub force_regenerate: bool,
    /// Non-fatal steps to omit. Fatal steps listed here are ignored.
    pub skip_steps: Vec<PortalGenerationStep>,
    /// Wall-clock budget, checked between steps. Falls back to the pipeline
    /// settings.
    pub timeout: Option<Duration>,
    /// Log per-step timing at info level.
    pub debug_mode: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalGenerationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portal_config: Option<PortalConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<PortalUrls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PortalError>,
    pub processing_time_ms: u64,
    pub steps_completed: Vec<PortalGenerationStep>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Skipped,
    Failed,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called before a step runs. `index` is 1-based.
    fn step_started(&self, step: PortalGenerationStep, index: usize, total: usize);
    fn step_finished(&self, step: PortalGenerationStep, outcome: StepOutcome);
    fn warning(&self, message: &str);
    fn done(&self, result: &PortalGenerationResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn step_started(&self, _step: PortalGenerationStep, _index: usize, _total: usize) {}
    fn step_finished(&self, _step: PortalGenerationStep, _outcome: StepOutcome) {}
    fn warning(&self, _message: &str) {}
    fn done(&self, _result: &PortalGenerationResult) {}
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Everything the orchestrator reads from configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub embedding: EmbeddingSettings,
    pub query: QuerySettings,
    pub deployment: DeploymentSettings,
    pub pipeline: PipelineSettings,
    pub default_template: PortalTemplate,
    pub chat_model: Option<String>,
}

impl OrchestratorSettings {
    pub fn from_app_config(app: &AppConfig) -> Result<Self> {
        Ok(Self {
            embedding: EmbeddingSettings::from(app),
            query: QuerySettings::try_from(app)?,
            deployment: DeploymentSettings::from(app),
            pipeline: PipelineSettings::from(app),
            default_template: app.defaults.template.parse()?,
            chat_model: Some(app.chat.model.clone()),
        })
    }

    fn deployment_target(&self) -> DeploymentTarget {
        DeploymentTarget {
            namespace: self.deployment.namespace.clone(),
            sdk: self.deployment.sdk.clone(),
            hardware: self.deployment.hardware.clone(),
            private: self.deployment.private,
            ..DeploymentTarget::default()
        }
    }
}

/// Drives one portal generation per call. Collaborators are injected so
/// tests can substitute fakes.
pub struct PipelineOrchestrator {
    storage: Arc<Storage>,
    generator: EmbeddingGenerator,
    deployer: Arc<dyn Deployer>,
    qr: Arc<dyn QrCodeService>,
    settings: OrchestratorSettings,
}

/// Mutable state threaded through one run.
struct RunState {
    job_id: String,
    job: Option<JobRecord>,
    cv: Option<CvData>,
    config: Option<PortalConfig>,
    rendered: Option<RenderedTemplate>,
    store: Option<VectorStore>,
    deployment: Option<DeploymentResult>,
    rag_active: bool,
    warnings: Vec<String>,
    steps_completed: Vec<Step>,
}

impl RunState {
    fn cv(&self) -> Result<&CvData> {
        self.cv
            .as_ref()
            .ok_or_else(|| PortalGenError::Internal("profile not extracted".into()))
    }

    fn config(&self) -> Result<&PortalConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| PortalGenError::Internal("portal config not created".into()))
    }

    fn config_mut(&mut self) -> Result<&mut PortalConfig> {
        self.config
            .as_mut()
            .ok_or_else(|| PortalGenError::Internal("portal config not created".into()))
    }
}

impl PipelineOrchestrator {
    pub fn new(
        storage: Arc<Storage>,
        generator: EmbeddingGenerator,
        deployer: Arc<dyn Deployer>,
        qr: Arc<dyn QrCodeService>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            storage,
            generator,
            deployer,
            qr,
            settings,
        }
    }

    /// Run the full pipeline for `job_id`.
    ///
    /// Never returns an error: every failure is reported through
    /// [`PortalGenerationResult::error`] and `warnings`.
    #[instrument(skip_all, fields(job_id = %job_id, force = options.force_regenerate))]
    pub async fn generate_portal(
        &self,
        job_id: &str,
        overrides: Option<PortalOverrides>,
        options: GenerateOptions,
        progress: &dyn ProgressReporter,
    ) -> PortalGenerationResult {
        let start = Instant::now();
        let deadline = options
            .timeout
            .or(self.settings.pipeline.timeout)
            .map(|budget| start + budget);

        info!("starting portal generation");

        if !options.force_regenerate {
            match self.storage.get_portal_config(job_id).await {
                Ok(Some(existing)) if existing.status == PortalStatus::Completed => {
                    let message = format!(
                        "portal already exists for job {job_id}; use force to regenerate"
                    );
                    progress.warning(&message);
                    let result = PortalGenerationResult {
                        success: true,
                        urls: Some(existing.urls.clone()),
                        portal_config: Some(existing),
                        error: None,
                        processing_time_ms: elapsed_ms(start),
                        steps_completed: Vec::new(),
                        warnings: vec![message],
                        deployment: None,
                    };
                    progress.done(&result);
                    return result;
                }
                Ok(_) => {}
                Err(e) => {
                    let result = PortalGenerationResult {
                        success: false,
                        portal_config: None,
                        urls: None,
                        error: Some(PortalError::fatal(&e)),
                        processing_time_ms: elapsed_ms(start),
                        steps_completed: Vec::new(),
                        warnings: Vec::new(),
                        deployment: None,
                    };
                    progress.done(&result);
                    return result;
                }
            }
        }

        let mut state = RunState {
            job_id: job_id.to_string(),
            job: None,
            cv: None,
            config: None,
            rendered: None,
            store: None,
            deployment: None,
            rag_active: overrides
                .as_ref()
                .and_then(|o| o.rag_enabled)
                .unwrap_or(true),
            warnings: Vec::new(),
            steps_completed: Vec::new(),
        };

        let skipped = self.resolve_skips(&options.skip_steps, &mut state, progress);
        let overrides = overrides.unwrap_or_default();
        let total = Step::ALL.len();

        for (i, step) in Step::ALL.into_iter().enumerate() {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    warn!(%step, "generation budget exhausted");
                    let err = PortalError::timeout(format!(
                        "generation exceeded its time budget before {step}"
                    ));
                    return self.abort(state, err, start, progress).await;
                }
            }

            if skipped.contains(&step) || (step.is_rag_step() && !state.rag_active) {
                debug!(%step, "step omitted");
                progress.step_finished(step, StepOutcome::Skipped);
                continue;
            }

            progress.step_started(step, i + 1, total);
            let step_start = Instant::now();
            let outcome = bounded(
                step,
                self.settings.pipeline.step_timeout,
                self.run_step(step, &mut state, &overrides, &options),
            )
            .await;
            let step_ms = step_start.elapsed().as_millis() as u64;

            match outcome {
                Ok(()) => {
                    if options.debug_mode {
                        info!(%step, step_ms, "step completed");
                    } else {
                        debug!(%step, step_ms, "step completed");
                    }
                    state.steps_completed.push(step);
                    progress.step_finished(step, StepOutcome::Completed);
                }
                Err(e) if step.is_fatal() => {
                    warn!(%step, error = %e, "fatal step failed");
                    progress.step_finished(step, StepOutcome::Failed);
                    let err = PortalError::at_step(step, &e);
                    return self.abort(state, err, start, progress).await;
                }
                Err(e) => {
                    let message = format!("{step} failed: {e}");
                    warn!(%step, error = %e, "step degraded");
                    progress.step_finished(step, StepOutcome::Failed);
                    progress.warning(&message);
                    state.warnings.push(message);
                    self.degrade(step, &mut state);
                }
            }
        }

        let config = state.config;
        let result = PortalGenerationResult {
            success: true,
            urls: config.as_ref().map(|c| c.urls.clone()),
            portal_config: config,
            error: None,
            processing_time_ms: elapsed_ms(start),
            steps_completed: state.steps_completed,
            warnings: state.warnings,
            deployment: state.deployment,
        };

        info!(
            steps = result.steps_completed.len(),
            warnings = result.warnings.len(),
            elapsed_ms = result.processing_time_ms,
            "portal generation complete"
        );
        progress.done(&result);
        result
    }

    /// Turn the requested skip list into the effective set. Fatal steps are
    /// never skipped; skipping any RAG step turns chat off for the run.
    fn resolve_skips(
        &self,
        requested: &[Step],
        state: &mut RunState,
        progress: &dyn ProgressReporter,
    ) -> BTreeSet<Step> {
        let mut skipped = BTreeSet::new();
        for &step in requested {
            if step.is_fatal() {
                let message = format!("{step} is required and cannot be skipped; ignoring");
                progress.warning(&message);
                state.warnings.push(message);
                continue;
            }
            if step.is_rag_step() {
                state.rag_active = false;
            }
            skipped.insert(step);
        }
        skipped
    }

    /// Apply the degraded state for a failed non-fatal step.
    fn degrade(&self, step: Step, state: &mut RunState) {
        match step {
            Step::CreateEmbeddings | Step::SetupVectorDb | Step::BuildRagSystem => {
                state.rag_active = false;
                state.store = None;
                if let Some(config) = state.config.as_mut() {
                    config.disable_rag();
                }
                // The README advertises chat; render it again without.
                if state.rendered.is_some() {
                    if let Err(e) = generate_template(state) {
                        warn!(error = %e, "could not re-render template without chat");
                    }
                }
            }
            Step::CustomizeDesign => {
                if let Some(config) = state.config.as_mut() {
                    config.design = Some(default_theme(config.template));
                }
            }
            // URLs stay as placeholders; links and QR assets are simply absent.
            _ => {}
        }
    }

    /// Finish a run that cannot produce a usable portal.
    async fn abort(
        &self,
        mut state: RunState,
        error: PortalError,
        start: Instant,
        progress: &dyn ProgressReporter,
    ) -> PortalGenerationResult {
        // Validation failures leave no trace in storage.
        if state.config.is_some() {
            if let Some(config) = state.config.as_mut() {
                if config.status == PortalStatus::Generating {
                    let _ = config.transition(PortalStatus::Failed);
                }
                if let Err(e) = self.storage.save_portal_config(config).await {
                    warn!(error = %e, "could not persist failed portal config");
                }
            }
            let data = PortalData {
                urls: state
                    .config
                    .as_ref()
                    .map(|c| c.urls.clone())
                    .unwrap_or_default(),
                status: PortalStatus::Failed.as_str().to_string(),
            };
            if let Err(e) = self.storage.update_portal_data(&state.job_id, &data).await {
                warn!(error = %e, "could not record failed status on job");
            }
        }

        let result = PortalGenerationResult {
            success: false,
            portal_config: None,
            urls: None,
            error: Some(error),
            processing_time_ms: elapsed_ms(start),
            steps_completed: state.steps_completed,
            warnings: state.warnings,
            deployment: state.deployment,
        };
        progress.done(&result);
        result
    }

    async fn run_step(
        &self,
        step: Step,
        state: &mut RunState,
        overrides: &PortalOverrides,
        options: &GenerateOptions,
    ) -> Result<()> {
        match step {
            Step::ValidateInput => self.validate_input(state).await,
            Step::ExtractCvData => self.extract_cv_data(state, overrides).await,
            Step::ConfigureUrls => configure_urls(state),
            Step::GenerateTemplate => generate_template(state),
            Step::CustomizeDesign => customize_design(state),
            Step::CreateEmbeddings => self.create_embeddings(state, options).await,
            Step::SetupVectorDb => self.setup_vector_db(state).await,
            Step::BuildRagSystem => self.build_rag_system(state),
            Step::DeployToHuggingface => self.deploy(state).await,
            Step::UpdateCvDocument => {
                let config = state.config()?;
                update_cv_document(
                    &self.storage,
                    &state.job_id,
                    &config.urls,
                    PortalStatus::Generating.as_str(),
                )
                .await
            }
            Step::GenerateQrCodes => {
                let urls = state.config()?.urls.clone();
                let assets = self.qr.generate(&state.job_id, &urls).await?;
                state.config_mut()?.qr_codes = assets;
                Ok(())
            }
            Step::FinalizePortal => self.finalize(state).await,
        }
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    async fn validate_input(&self, state: &mut RunState) -> Result<()> {
        let job = self
            .storage
            .get_job(&state.job_id)
            .await?
            .ok_or_else(|| PortalGenError::validation(format!("job {} not found", state.job_id)))?;

        let cv: CvData = serde_json::from_value(job.profile.clone())
            .map_err(|e| PortalGenError::validation(format!("malformed profile: {e}")))?;
        if cv.display_name().is_none() {
            return Err(PortalGenError::validation(
                "profile is missing personalInfo.name",
            ));
        }

        state.job = Some(job);
        state.cv = Some(cv);
        Ok(())
    }

    /// Normalize the profile, then create the PENDING portal config and move
    /// it to GENERATING.
    async fn extract_cv_data(&self, state: &mut RunState, overrides: &PortalOverrides) -> Result<()> {
        let cv = normalize_profile(state.cv()?.clone());
        let job = state
            .job
            .as_ref()
            .ok_or_else(|| PortalGenError::Internal("job not loaded".into()))?;

        info!(
            experience = cv.experience.len(),
            skills = cv.skills.len(),
            projects = cv.projects.len(),
            "profile extracted"
        );

        let rag_config = RagConfig {
            enabled: state.rag_active,
            provider: self.settings.embedding.provider,
            model: self.generator.model().to_string(),
            dimension: self.generator.dimension(),
            indexed_chunks: 0,
        };
        let mut config = PortalConfig::new(&state.job_id, &job.user_id, rag_config);
        config.template = overrides.template.unwrap_or(self.settings.default_template);
        if let Some(custom) = &overrides.customization {
            config.customization = custom.clone();
        }
        if let Some(privacy) = &overrides.privacy {
            config.privacy = privacy.clone();
        }
        config.deployment = self.settings.deployment_target();
        config.transition(PortalStatus::Generating)?;

        self.storage
            .update_portal_data(
                &state.job_id,
                &PortalData {
                    urls: PortalUrls::default(),
                    status: PortalStatus::Generating.as_str().to_string(),
                },
            )
            .await?;

        state.cv = Some(cv);
        state.config = Some(config);
        Ok(())
    }

    async fn create_embeddings(&self, state: &mut RunState, options: &GenerateOptions) -> Result<()> {
        if options.force_regenerate {
            self.storage.clear_embeddings(&state.job_id).await?;
        }
        let covered = self.storage.covered_chunks(&state.job_id).await?;
        let already_indexed = covered.len();

        let chunks = ContentChunker::new().with_covered(covered).chunk(state.cv()?);
        if chunks.is_empty() {
            if already_indexed == 0 {
                return Err(PortalGenError::EmbeddingProvider(
                    "profile produced no indexable content".into(),
                ));
            }
            info!(already_indexed, "all chunks already embedded");
            return Ok(());
        }

        let opts = BatchOptions::from(&self.settings.embedding);
        let embeddings = self.generator.generate_embeddings(&chunks, &opts).await?;
        // Persist only once every batch succeeded.
        self.storage.upsert_embeddings(&state.job_id, &embeddings).await?;

        info!(new = embeddings.len(), already_indexed, "embeddings created");
        Ok(())
    }

    async fn setup_vector_db(&self, state: &mut RunState) -> Result<()> {
        let stored = self.storage.list_embeddings(&state.job_id).await?;
        let mut store = VectorStore::new(self.generator.dimension(), self.generator.model());
        store.extend(stored)?;
        if store.is_empty() {
            return Err(PortalGenError::VectorStore("no embeddings to index".into()));
        }

        state.config_mut()?.rag_config.indexed_chunks = store.len();
        info!(indexed = store.len(), "vector store ready");
        state.store = Some(store);
        Ok(())
    }

    fn build_rag_system(&self, state: &mut RunState) -> Result<()> {
        let indexed = state
            .store
            .as_ref()
            .map(VectorStore::len)
            .ok_or_else(|| PortalGenError::VectorStore("vector store not built".into()))?;

        let system = RagSystemConfig {
            system_prompt: build_system_prompt(state.cv()?),
            embedding_model: self.generator.model().to_string(),
            dimension: self.generator.dimension(),
            chat_model: self.settings.chat_model.clone(),
            query: self.settings.query.clone(),
            indexed_chunks: indexed,
        };
        state.config_mut()?.rag_system = Some(system);
        Ok(())
    }

    async fn deploy(&self, state: &mut RunState) -> Result<()> {
        let rendered = state
            .rendered
            .as_ref()
            .ok_or_else(|| PortalGenError::Internal("template not rendered".into()))?;
        let vector_json = match (&state.store, state.rag_active) {
            (Some(store), true) => Some(store.to_json()?),
            _ => None,
        };
        let bundle = build_space_bundle(
            state.config()?,
            state.cv()?,
            rendered,
            &generate_requirements(),
            vector_json.as_deref(),
        )?;

        let result = self.deployer.deploy(state.config()?, &bundle).await;
        if !result.success {
            let message = result
                .error
                .clone()
                .unwrap_or_else(|| "deployment failed".to_string());
            state.deployment = Some(result);
            return Err(PortalGenError::Deployment(message));
        }

        if let Some(space_url) = result.space_url.as_deref() {
            state.config_mut()?.urls = urls::deployed_urls(space_url, result.api_url.as_deref());
        }
        state.deployment = Some(result);
        Ok(())
    }

    /// The run's config only becomes `Completed` once both writes land,
    /// so a failure here still aborts into `Failed`.
    async fn finalize(&self, state: &mut RunState) -> Result<()> {
        let mut completed = state.config()?.clone();
        completed.transition(PortalStatus::Completed)?;
        let data = PortalData {
            urls: completed.urls.clone(),
            status: PortalStatus::Completed.as_str().to_string(),
        };

        self.storage.save_portal_config(&completed).await?;
        self.storage.update_portal_data(&state.job_id, &data).await?;
        state.config = Some(completed);
        Ok(())
    }
}

fn configure_urls(state: &mut RunState) -> Result<()> {
    let name = state
        .cv()?
        .display_name()
        .ok_or_else(|| PortalGenError::validation("profile is missing personalInfo.name"))?
        .to_string();
    let slug = urls::portal_slug(&name, &state.job_id)?;

    let config = state.config_mut()?;
    config.deployment.space_name = urls::space_name(&slug);
    config.urls = urls::placeholder_urls(&slug);
    debug!(%slug, portal = %config.urls.portal, "urls configured");
    Ok(())
}

fn generate_template(state: &mut RunState) -> Result<()> {
    let cv = state.cv()?;
    let config = state.config()?;
    let name = cv
        .display_name()
        .ok_or_else(|| PortalGenError::validation("profile is missing personalInfo.name"))?;

    let rendered = render_template(&ReadmeContext {
        display_name: name,
        headline: cv.personal_info.title.as_deref(),
        template: config.template,
        sdk: &config.deployment.sdk,
        urls: &config.urls,
        rag_enabled: config.rag_config.enabled,
    });
    state.rendered = Some(rendered);
    Ok(())
}

fn customize_design(state: &mut RunState) -> Result<()> {
    let config = state.config_mut()?;
    let theme = resolve_theme(config.template, &config.customization)?;
    config.design = Some(theme);
    Ok(())
}

/// Trim identity fields and drop list entries with no usable content.
fn normalize_profile(mut cv: CvData) -> CvData {
    if let Some(name) = cv.personal_info.name.as_mut() {
        *name = name.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    cv.experience
        .retain(|e| !e.title.trim().is_empty() || !e.company.trim().is_empty());
    cv.education
        .retain(|e| !e.degree.trim().is_empty() || !e.institution.trim().is_empty());
    cv.skills.retain(|s| !s.name.trim().is_empty());
    cv.projects.retain(|p| !p.name.trim().is_empty());
    cv.certifications.retain(|c| !c.name.trim().is_empty());
    cv.languages.retain(|l| !l.language.trim().is_empty());
    cv
}

/// Run one step under its time limit; overrunning is a `Timeout` error.
async fn bounded<F>(step: Step, limit: Duration, fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(outcome) => outcome,
        Err(_) => Err(PortalGenError::Timeout(format!("{step} exceeded {limit:?}"))),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
