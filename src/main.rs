use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use scholarguard::audit::AuditLog;
use scholarguard::config::{self, AppConfig, ConfigError};
use scholarguard::pipeline::annotation::PubTatorClient;
use scholarguard::pipeline::caption::OllamaCaptioner;
use scholarguard::pipeline::extraction::{ExtractionError, PdfiumExtractor};
use scholarguard::pipeline::model::{OllamaClient, OllamaLoader, TextCapability};
use scholarguard::pipeline::ocr::TesseractCli;
use scholarguard::pipeline::{AnalysisPipeline, AnalysisRequest, DocumentSource, PipelineError};
use scholarguard::report::{AnalysisReport, ReportVariant};
use scholarguard::session::Session;
use scholarguard::store::StoreError;

#[derive(Parser, Debug)]
#[command(name = "scholarguard", version, about = "Confidential analysis of sensitive research documents")]
struct Cli {
    /// User recorded in the audit trail.
    #[arg(long, global = true, env = "SCHOLARGUARD_USER", default_value = "anonymous")]
    user: String,

    /// Artifact encryption secret. Prefer the environment variable; without a
    /// secret, artifacts are written as plain JSON.
    #[arg(long, global = true, env = "SCHOLARGUARD_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Data directory holding the audit log (default ~/ScholarGuard).
    #[arg(long, global = true, env = "SCHOLARGUARD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze a document and print the report as JSON.
    Analyze(AnalyzeArgs),
    /// Print a persisted report.
    Load {
        /// Artifact path without the `.enc` suffix.
        artifact: PathBuf,
    },
    /// Securely delete a persisted report (plain and encrypted forms).
    Shred {
        artifact: PathBuf,
    },
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Local path or http(s) URL.
    source: String,

    #[arg(long, value_enum, default_value_t = VariantArg::Full)]
    variant: VariantArg,

    /// Question to ask; repeat for several. Defaults to the research set.
    #[arg(long = "question")]
    questions: Vec<String>,

    /// Persist the report into this directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    no_ocr: bool,

    #[arg(long)]
    no_captions: bool,

    /// Text model to prefer over the baseline.
    #[arg(long, env = "SCHOLARGUARD_MODEL")]
    model: Option<String>,

    /// Loopback model endpoint tried before the default one.
    #[arg(long, env = "SCHOLARGUARD_MODEL_ENDPOINT")]
    model_endpoint: Option<String>,

    /// Vision model used for captions.
    #[arg(long, env = "SCHOLARGUARD_VISION_MODEL")]
    vision_model: Option<String>,

    /// PDFium library file to load instead of searching for one.
    #[arg(long, env = "PDFIUM_DYNAMIC_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Worker threads for per-image and per-question work.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Idle timeout for the analysis session.
    #[arg(long, env = "SCHOLARGUARD_SESSION_TIMEOUT_SECS")]
    session_timeout_secs: Option<u64>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VariantArg {
    Full,
    Summary,
    Qa,
    Annotation,
}

impl From<VariantArg> for ReportVariant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Full => ReportVariant::Full,
            VariantArg::Summary => ReportVariant::SummaryOnly,
            VariantArg::Qa => ReportVariant::QaOnly,
            VariantArg::Annotation => ReportVariant::AnnotationOnly,
        }
    }
}

#[derive(Error, Debug)]
enum CliError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Could not render report: {0}")]
    Render(#[from] serde_json::Error),

    #[error("No artifact found at {0}")]
    NotFound(PathBuf),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut config = match &cli.data_dir {
        Some(dir) => AppConfig::with_data_dir(dir.clone()),
        None => AppConfig::default(),
    };
    if let Command::Analyze(args) = &cli.command {
        apply_overrides(&mut config, args);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);

    let result = match cli.command {
        Command::Analyze(args) => analyze(config, &cli.user, cli.secret, args),
        Command::Load { artifact } => load(config, &cli.user, cli.secret, artifact),
        Command::Shred { artifact } => shred(config, &cli.user, cli.secret, artifact),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let retryable = matches!(&e, CliError::Pipeline(p) if p.is_retryable());
            tracing::error!(retryable, "{e}");
            eprintln!("error: {e}");
            if retryable {
                eprintln!("hint: this failure may succeed if retried");
            }
            ExitCode::FAILURE
        }
    }
}

fn apply_overrides(config: &mut AppConfig, args: &AnalyzeArgs) {
    config.ocr_enabled = !args.no_ocr;
    config.captioning_enabled = !args.no_captions;
    config.workers = args.workers;
    if let Some(model) = &args.model {
        config.model.preferred_model = model.clone();
    }
    if let Some(endpoint) = &args.model_endpoint {
        config.model.preferred_endpoint = Some(endpoint.clone());
    }
    if let Some(vision) = &args.vision_model {
        config.model.vision_model = vision.clone();
    }
    if let Some(lib) = &args.pdfium_lib {
        config.pdfium_library = Some(lib.clone());
    }
    if let Some(secs) = args.session_timeout_secs {
        config.session_timeout = Duration::from_secs(secs);
    }
}

fn open_session(config: &AppConfig, user: &str, secret: Option<String>) -> Session {
    let audit = Arc::new(AuditLog::open(&config.audit_log_path));
    Session::open(user, secret, config, audit)
}

fn analyze(
    config: AppConfig,
    user: &str,
    secret: Option<String>,
    args: AnalyzeArgs,
) -> Result<(), CliError> {
    config.validate()?;
    let variant = ReportVariant::from(args.variant);

    let extractor = PdfiumExtractor::new(config.pdfium_library.clone())?;
    let text = TextCapability::resolve(&OllamaLoader::new(&config.model), &config.model);
    if let TextCapability::Unavailable { reason } = &text {
        tracing::warn!("Text model unavailable, summaries and answers will carry markers: {reason}");
    }

    let mut pipeline = AnalysisPipeline::new(config.clone(), Arc::new(extractor), text)?
        .with_ocr(Arc::new(TesseractCli::new()));
    if variant.needs_images() && config.captioning_enabled {
        match OllamaClient::new(&config.model.default_endpoint, config.model.request_timeout) {
            Ok(client) => {
                pipeline = pipeline.with_captioner(Arc::new(OllamaCaptioner::new(
                    client,
                    &config.model.vision_model,
                )));
            }
            Err(e) => tracing::warn!("Captioning disabled: {e}"),
        }
    }
    if variant.needs_annotation() {
        match PubTatorClient::new(&config.annotation) {
            Ok(client) => pipeline = pipeline.with_annotation(Arc::new(client)),
            Err(e) => tracing::warn!("Annotation client unavailable: {e}"),
        }
    }

    tracing::info!(
        variant = %variant,
        model = pipeline.text_capability().model_name().unwrap_or("unavailable"),
        "Pipeline ready"
    );

    let mut request = AnalysisRequest::new(DocumentSource::parse(&args.source), variant)
        .with_questions(args.questions);
    if let Some(dir) = args.output_dir {
        request = request.persist_to(dir);
    }

    let mut session = open_session(&config, user, secret);
    let result = pipeline.run(&mut session, request);
    session.cleanup();
    let outcome = result?;

    if let Some(saved) = &outcome.saved {
        tracing::info!(
            path = %saved.path.display(),
            encrypted = saved.encrypted,
            fallback = saved.used_fallback,
            "Report saved"
        );
    }
    if let Some(error) = &outcome.save_error {
        tracing::warn!("Report was not persisted: {error}");
    }
    println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    Ok(())
}

fn load(
    config: AppConfig,
    user: &str,
    secret: Option<String>,
    artifact: PathBuf,
) -> Result<(), CliError> {
    let session = open_session(&config, user, secret);
    let report: AnalysisReport = session
        .store()
        .load(&artifact)?
        .ok_or_else(|| CliError::NotFound(artifact.clone()))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn shred(
    config: AppConfig,
    user: &str,
    secret: Option<String>,
    artifact: PathBuf,
) -> Result<(), CliError> {
    let session = open_session(&config, user, secret);
    let outcome = session.store().secure_delete(&artifact)?;
    if !outcome.removed_any() {
        return Err(CliError::NotFound(artifact));
    }
    tracing::info!(
        plain = outcome.plain_removed,
        encrypted = outcome.encrypted_removed,
        "Artifact shredded"
    );
    Ok(())
}
