//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use cvportal_core::{
    GenerateOptions, OrchestratorSettings, PipelineOrchestrator, PortalGenerationResult,
    PortalOverrides, ProgressReporter, StepOutcome, TrackedLinkQrService, ask_portal,
};
use cvportal_deploy::DeploymentStager;
use cvportal_rag::{EmbeddingGenerator, HttpChatProvider, HttpEmbeddingProvider};
use cvportal_shared::{
    AppConfig, ChatSettings, Customization, CvData, DeploymentSettings, EmbeddingSettings,
    PortalGenerationStep, PortalTemplate, init_config, load_config, load_config_from,
    validate_api_key,
};
use cvportal_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// cvportal: turn a parsed CV into a deployed portal with a chat assistant.
#[derive(Parser)]
#[command(
    name = "cvportal",
    version,
    about = "Generate and deploy CV portals with a retrieval-backed chat assistant.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.cvportal/cvportal.toml.
    #[arg(long, env = "CVPORTAL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Database path, overriding `[defaults] database_path`.
    #[arg(long, env = "CVPORTAL_DATABASE", global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Store a parsed profile as a generation job.
    Import {
        /// Job identifier.
        #[arg(long)]
        job: String,

        /// Owning user identifier.
        #[arg(long)]
        user: String,

        /// Profile JSON document (camelCase fields).
        #[arg(long)]
        profile: PathBuf,
    },

    /// Generate (and deploy) the portal for a job.
    Generate {
        #[arg(long)]
        job: String,

        /// Regenerate even if a completed portal exists.
        #[arg(long)]
        force: bool,

        /// Step to skip, e.g. GENERATE_QR_CODES (repeatable).
        #[arg(long = "skip")]
        skip: Vec<String>,

        /// Wall-clock budget for the whole run.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Log per-step timings.
        #[arg(long)]
        debug: bool,

        /// professional, minimal, creative or technical.
        #[arg(long)]
        template: Option<String>,

        /// Customization JSON (colours, font, section order, custom CSS).
        #[arg(long)]
        customization: Option<PathBuf>,

        /// Build the portal without a chat assistant.
        #[arg(long)]
        no_chat: bool,
    },

    /// Ask a question against a generated portal.
    Ask {
        #[arg(long)]
        job: String,

        question: String,
    },

    /// Show the stored portal and job status.
    Status {
        #[arg(long)]
        job: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "cvportal=info",
        1 => "cvportal=debug",
        _ => "cvportal=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let db_path = cli
        .database
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.defaults.database_path));

    match cli.command {
        Command::Import { job, user, profile } => {
            cmd_import(&db_path, &job, &user, &profile).await
        }
        Command::Generate {
            job,
            force,
            skip,
            timeout_secs,
            debug,
            template,
            customization,
            no_chat,
        } => {
            let overrides = build_overrides(template.as_deref(), customization.as_deref(), no_chat)?;
            let options = GenerateOptions {
                force_regenerate: force,
                skip_steps: parse_steps(&skip)?,
                timeout: timeout_secs.map(Duration::from_secs),
                debug_mode: debug,
            };
            cmd_generate(&config, &db_path, &job, overrides, options).await
        }
        Command::Ask { job, question } => cmd_ask(&config, &db_path, &job, &question).await,
        Command::Status { job } => cmd_status(&db_path, &job).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

fn parse_steps(raw: &[String]) -> Result<Vec<PortalGenerationStep>> {
    raw.iter()
        .map(|s| Ok(s.parse::<PortalGenerationStep>()?))
        .collect()
}

fn build_overrides(
    template: Option<&str>,
    customization: Option<&Path>,
    no_chat: bool,
) -> Result<PortalOverrides> {
    let template = template.map(str::parse::<PortalTemplate>).transpose()?;
    let customization = match customization {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("reading {}", path.display()))?;
            Some(
                serde_json::from_str::<Customization>(&raw)
                    .wrap_err_with(|| format!("parsing {}", path.display()))?,
            )
        }
        None => None,
    };
    Ok(PortalOverrides {
        template,
        customization,
        privacy: None,
        rag_enabled: no_chat.then_some(false),
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_import(db_path: &Path, job: &str, user: &str, profile: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(profile)
        .wrap_err_with(|| format!("reading {}", profile.display()))?;
    let document: serde_json::Value =
        serde_json::from_str(&raw).wrap_err_with(|| format!("parsing {}", profile.display()))?;

    // Reject documents the pipeline could never load.
    let cv: CvData = serde_json::from_value(document.clone())
        .wrap_err("profile does not match the CV document shape")?;
    if cv.display_name().is_none() {
        warn!("profile has no personalInfo.name; generation will fail validation");
    }

    let storage = Storage::open(db_path).await?;
    storage.insert_job(job, user, &document).await?;
    info!(job, user, "profile imported");

    println!("  Imported job {job} for user {user}");
    Ok(())
}

async fn cmd_generate(
    config: &AppConfig,
    db_path: &Path,
    job: &str,
    overrides: PortalOverrides,
    options: GenerateOptions,
) -> Result<()> {
    let chat_wanted = overrides.rag_enabled != Some(false);
    if chat_wanted {
        validate_api_key(&config.embedding.api_key_env, "Embedding")?;
    }
    if validate_api_key(&config.deployment.token_env, "Deployment").is_err() {
        warn!(
            env = %config.deployment.token_env,
            "no deployment token set; the space API may reject requests"
        );
    }

    let storage = Arc::new(Storage::open(db_path).await?);
    let provider = Arc::new(HttpEmbeddingProvider::new(&EmbeddingSettings::from(config))?);
    let stager = DeploymentStager::new(DeploymentSettings::from(config))?.with_variables([
        ("EMBEDDING_BASE_URL".to_string(), config.embedding.base_url.clone()),
        ("CHAT_BASE_URL".to_string(), config.chat.base_url.clone()),
    ]);

    let orchestrator = PipelineOrchestrator::new(
        storage,
        EmbeddingGenerator::new(provider),
        Arc::new(stager),
        Arc::new(TrackedLinkQrService::default()),
        OrchestratorSettings::from_app_config(config)?,
    );

    info!(job, force = options.force_regenerate, "generating portal");
    let reporter = CliProgress::new();
    let result = orchestrator
        .generate_portal(job, Some(overrides), options, &reporter)
        .await;

    print_summary(&result);
    match result.error {
        Some(err) if !result.success => Err(eyre!("{}: {}", err.code, err.message)),
        _ => Ok(()),
    }
}

fn print_summary(result: &PortalGenerationResult) {
    println!();
    if result.success {
        println!("  Portal generated!");
    } else {
        println!("  Portal generation failed.");
    }
    if let Some(urls) = &result.urls {
        let state = if urls.deployed { "" } else { " (not deployed)" };
        println!("  Portal: {}{state}", urls.portal);
        println!("  Chat:   {}", urls.chat);
    }
    if let Some(config) = &result.portal_config {
        println!("  Template: {}", config.template.as_str());
        if config.rag_config.enabled {
            println!("  Chat index: {} chunks", config.rag_config.indexed_chunks);
        } else {
            println!("  Chat: disabled");
        }
    }
    println!(
        "  Steps: {}/{}",
        result.steps_completed.len(),
        PortalGenerationStep::ALL.len()
    );
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    println!("  Time:  {:.1}s", result.processing_time_ms as f64 / 1000.0);
    println!();
}

async fn cmd_ask(config: &AppConfig, db_path: &Path, job: &str, question: &str) -> Result<()> {
    validate_api_key(&config.embedding.api_key_env, "Embedding")?;
    validate_api_key(&config.chat.api_key_env, "Chat")?;

    let storage = Storage::open_readonly(db_path).await?;
    let provider = Arc::new(HttpEmbeddingProvider::new(&EmbeddingSettings::from(config))?);
    let chat = Arc::new(HttpChatProvider::new(&ChatSettings::from(config))?);

    let answer = ask_portal(
        &storage,
        EmbeddingGenerator::new(provider),
        chat,
        job,
        question,
    )
    .await?;

    println!();
    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        for source in &answer.sources {
            println!("  [{:.2}] {}", source.similarity, source.section);
        }
    }
    println!();
    Ok(())
}

async fn cmd_status(db_path: &Path, job: &str) -> Result<()> {
    let storage = Storage::open_readonly(db_path).await?;
    let record = storage
        .get_job(job)
        .await?
        .ok_or_else(|| eyre!("no job '{job}' in {}", db_path.display()))?;

    println!("  Job:    {} (user {})", record.id, record.user_id);
    println!("  Status: {}", record.status);
    match &record.portal_data {
        Some(data) => println!("  Portal: {} [{}]", data.urls.portal, data.status),
        None => println!("  Portal: none"),
    }

    if let Some(portal) = storage.get_portal_config(job).await? {
        println!();
        println!("{}", serde_json::to_string_pretty(&portal)?);
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn step_started(&self, step: PortalGenerationStep, index: usize, total: usize) {
        self.spinner.set_message(format!("[{index}/{total}] {step}"));
    }

    fn step_finished(&self, step: PortalGenerationStep, outcome: StepOutcome) {
        let mark = match outcome {
            StepOutcome::Completed => "ok",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Failed => "failed",
        };
        self.spinner.println(format!("  {:<24} {mark}", step.as_str()));
    }

    fn warning(&self, message: &str) {
        self.spinner.println(format!("  warning: {message}"));
    }

    fn done(&self, _result: &PortalGenerationResult) {
        self.spinner.finish_and_clear();
    }
}
