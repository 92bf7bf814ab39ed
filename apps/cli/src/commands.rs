//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{info, warn};

use sitesort_classifier::OpenAiClassifier;
use sitesort_core::{
    BatchSummary, CancellationToken, Collaborators, Framing, Pipeline, ProgressEvent,
    forward_events,
};
use sitesort_extract::PageExtractorFactory;
use sitesort_fetcher::{BrowserFetcher, Fetcher, HttpFetcher};
use sitesort_shared::{
    AppConfig, BatchId, ClassificationLabel, ExtractionMethod, PipelineSettings,
    ProcessingConfig, config_file_path, init_config, load_config, load_config_from,
    resolve_provider,
};
use sitesort_storage::{ResultFilter, Storage, export_results_csv};

use crate::output;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// sitesort: classify websites as Marketing, Portal or Other.
#[derive(Parser)]
#[command(
    name = "sitesort",
    version,
    about = "Classify websites in bulk as Marketing, Portal or Other using an AI provider.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.sitesort/sitesort.toml).
    #[arg(long, global = true, env = "SITESORT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Results database (overrides `storage.database_path`).
    #[arg(long, global = true, env = "SITESORT_DB")]
    pub db: Option<PathBuf>,

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
    /// Classify a list of domains.
    Classify(ClassifyArgs),

    /// Query stored results.
    Results(ResultsArgs),

    /// Result counts by label.
    Stats {
        /// Restrict to one batch.
        #[arg(long)]
        batch: Option<String>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// List batch runs, newest first.
    Batches {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Delete a batch and its results.
    DeleteBatch {
        /// Batch ID (e.g. batch_0192...).
        id: String,
    },

    /// Database maintenance.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check provider credentials, OCR engine and database.
    Doctor,
}

#[derive(Args)]
pub(crate) struct ClassifyArgs {
    /// Domains or URLs to classify.
    pub domains: Vec<String>,

    /// Read additional domains from a file, one per line (`#` starts a comment).
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Extraction method: HTML, OCR or BOTH.
    #[arg(short, long)]
    pub method: Option<ExtractionMethod>,

    /// Run the browser with a visible window (limits concurrency to 2).
    #[arg(long)]
    pub headful: bool,

    /// Send browser-like request headers.
    #[arg(long)]
    pub anti_detection: bool,

    /// Number of concurrent workers.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Reprocess domains that already have a stored result.
    #[arg(long)]
    pub overwrite: bool,

    /// Output: progress bar + summary, final JSON, or an NDJSON/SSE event stream.
    #[arg(short, long, value_enum, default_value = "summary")]
    pub output: OutputFormat,

    /// Also write the batch results to a CSV file (summary and json output only).
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    Summary,
    Json,
    Ndjson,
    Sse,
}

#[derive(Args)]
pub(crate) struct ResultsArgs {
    /// Substring match on the domain.
    #[arg(long)]
    pub domain: Option<String>,

    /// Only this label (Marketing, Portal, Other, Error).
    #[arg(long)]
    pub label: Option<ClassificationLabel>,

    /// Only results of this batch.
    #[arg(long)]
    pub batch: Option<String>,

    /// Minimum confidence in [0, 1].
    #[arg(long)]
    pub min_confidence: Option<f64>,

    /// Maximum rows to print (ignored with --csv).
    #[arg(long, default_value = "100")]
    pub limit: u64,

    #[arg(long, default_value = "0")]
    pub offset: u64,

    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,

    /// Write the matching results to a CSV file instead of printing them.
    #[arg(long, value_name = "FILE", conflicts_with = "json")]
    pub csv: Option<PathBuf>,
}

/// Database subcommands.
#[derive(Subcommand)]
pub(crate) enum DbAction {
    /// Show file size, row counts and schema version.
    Info,
    /// Compact the database file.
    Vacuum,
    /// Delete every result and batch.
    Clear {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
    /// Keep only the newest result per domain.
    Dedupe,
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

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sitesort=info",
        1 => "sitesort=debug",
        _ => "sitesort=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Loaded configuration plus resolved paths.
struct Context {
    config: AppConfig,
    db_path: PathBuf,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self> {
        let config = match &cli.config {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        };
        let db_path = cli
            .db
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.storage.database_path));
        Ok(Self { config, db_path })
    }

    async fn storage(&self) -> Result<Storage> {
        Ok(Storage::open(&self.db_path).await?)
    }

    async fn storage_readonly(&self) -> Result<Storage> {
        Ok(Storage::open_readonly(&self.db_path).await?)
    }
}

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let ctx = Context::load(&cli)?;

    match cli.command {
        Command::Classify(args) => cmd_classify(&ctx, args).await,
        Command::Results(args) => cmd_results(&ctx, args).await,
        Command::Stats { batch, json } => cmd_stats(&ctx, batch, json).await,
        Command::Batches { json } => cmd_batches(&ctx, json).await,
        Command::DeleteBatch { id } => cmd_delete_batch(&ctx, id).await,
        Command::Db { action } => match action {
            DbAction::Info => cmd_db_info(&ctx).await,
            DbAction::Vacuum => cmd_db_vacuum(&ctx).await,
            DbAction::Clear { yes } => cmd_db_clear(&ctx, yes).await,
            DbAction::Dedupe => cmd_db_dedupe(&ctx).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&ctx).await,
        },
        Command::Doctor => cmd_doctor(&ctx).await,
    }
}

// ---------------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------------

async fn cmd_classify(ctx: &Context, args: ClassifyArgs) -> Result<()> {
    let mut raw = args.domains.clone();
    if let Some(path) = &args.file {
        raw.extend(read_domain_file(path)?);
    }
    if raw.is_empty() {
        return Err(eyre!("no domains given: pass them as arguments or with --file"));
    }
    if args.csv.is_some() && matches!(args.output, OutputFormat::Ndjson | OutputFormat::Sse) {
        return Err(eyre!("--csv needs --output summary or json"));
    }

    let processing = processing_config(&ctx.config, &args);
    let pipeline = build_pipeline(ctx, &processing).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing in-flight domains");
            on_interrupt.cancel();
        }
    });

    info!(
        entries = raw.len(),
        method = %processing.method,
        workers = processing.workers,
        mode = %processing.processing_mode(),
        db = %ctx.db_path.display(),
        "classifying domains"
    );

    match args.output {
        OutputFormat::Json => {
            let summary = pipeline.run_to_completion(raw, processing, cancel).await?;
            write_csv(args.csv.as_deref(), &summary)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Ndjson | OutputFormat::Sse => {
            let framing = match args.output {
                OutputFormat::Sse => Framing::Sse,
                _ => Framing::Ndjson,
            };
            let rx = pipeline.run_streaming(raw, processing, cancel);
            let mut stdout = tokio::io::stdout();
            forward_events(rx, &mut stdout, framing).await?;
        }
        OutputFormat::Summary => {
            let rx = pipeline.run_streaming(raw, processing, cancel);
            let summary = CliProgress::new()?.drive(rx).await?;
            output::print_batch_summary(&summary);
            write_csv(args.csv.as_deref(), &summary)?;
        }
    }

    Ok(())
}

fn write_csv(path: Option<&Path>, summary: &BatchSummary) -> Result<()> {
    if let Some(path) = path {
        let rows = export_results_csv(&summary.results, path)?;
        eprintln!("Wrote {rows} results to {}", path.display());
    }
    Ok(())
}

/// Config file defaults overridden by command-line flags.
fn processing_config(config: &AppConfig, args: &ClassifyArgs) -> ProcessingConfig {
    let mut processing = ProcessingConfig::from(config);
    if let Some(method) = args.method {
        processing.method = method;
    }
    if args.headful {
        processing.headless = false;
    }
    if args.anti_detection {
        processing.anti_detection = true;
    }
    if let Some(workers) = args.workers {
        processing.workers = workers;
    }
    if args.overwrite {
        processing.overwrite = true;
    }
    processing
}

fn read_domain_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| eyre!("cannot read domain file {}: {e}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

/// Browser rendering is only needed for screenshots or a visible window.
fn needs_browser(processing: &ProcessingConfig) -> bool {
    processing.method.needs_screenshot() || !processing.headless
}

async fn build_pipeline(ctx: &Context, processing: &ProcessingConfig) -> Result<Pipeline> {
    let provider = resolve_provider(&ctx.config.classifier)?;
    info!(provider = provider.name(), model = provider.model(), "resolved AI provider");

    let classifier = OpenAiClassifier::new(provider)?
        .with_max_input_chars(ctx.config.classifier.max_input_chars);
    let storage = ctx.storage().await?;

    let fetcher: Arc<dyn Fetcher> = if needs_browser(processing) {
        info!(headless = processing.headless, "using browser fetcher");
        Arc::new(BrowserFetcher::new())
    } else {
        Arc::new(HttpFetcher::new()?)
    };

    let collaborators = Collaborators {
        fetcher,
        extractors: Arc::new(PageExtractorFactory::new(ctx.config.ocr.clone())),
        classifier: Arc::new(classifier),
        store: Arc::new(storage),
    };
    Ok(Pipeline::new(
        collaborators,
        PipelineSettings::from(&ctx.config),
    ))
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Renders the progress stream as an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        bar.set_message("Starting batch");
        Ok(Self { bar })
    }

    /// Consume events until the batch completes or aborts.
    async fn drive(self, mut rx: mpsc::Receiver<ProgressEvent>) -> Result<BatchSummary> {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Progress {
                    processed,
                    total,
                    message,
                    ..
                } => {
                    self.bar.set_length(total as u64);
                    self.bar.set_position(processed as u64);
                    self.bar.set_message(message);
                }
                ProgressEvent::Result { result, .. } => {
                    if result.is_error() {
                        self.bar
                            .println(format!("  ✗ {}: {}", result.domain, result.summary));
                    }
                }
                ProgressEvent::Complete(summary) => {
                    self.bar.finish_and_clear();
                    return Ok(summary);
                }
                ProgressEvent::Error { message } => {
                    self.bar.abandon();
                    return Err(eyre!(message));
                }
            }
        }
        self.bar.abandon();
        Err(eyre!("batch ended without a completion event"))
    }
}

// ---------------------------------------------------------------------------
// Reporting commands
// ---------------------------------------------------------------------------

async fn cmd_results(ctx: &Context, args: ResultsArgs) -> Result<()> {
    let storage = ctx.storage_readonly().await?;
    let filter = ResultFilter {
        domain: args.domain,
        label: args.label,
        batch_id: args.batch.map(BatchId::from),
        min_confidence: args.min_confidence,
        // Exports cover every matching row.
        limit: args.csv.is_none().then_some(args.limit),
        offset: args.offset,
    };
    if let Some(path) = &args.csv {
        let rows = storage.export_csv(&filter, path).await?;
        println!("Wrote {rows} results to {}", path.display());
        return Ok(());
    }

    let results = storage.get_results(&filter).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        output::print_results(&results);
    }
    Ok(())
}

async fn cmd_stats(ctx: &Context, batch: Option<String>, json: bool) -> Result<()> {
    let storage = ctx.storage_readonly().await?;
    let batch_id = batch.map(BatchId::from);
    let stats = storage.get_statistics(batch_id.as_ref()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        output::print_statistics(&stats, batch_id.as_ref());
    }
    Ok(())
}

async fn cmd_batches(ctx: &Context, json: bool) -> Result<()> {
    let storage = ctx.storage_readonly().await?;
    let batches = storage.list_batches().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&batches)?);
    } else {
        output::print_batches(&batches);
    }
    Ok(())
}

async fn cmd_delete_batch(ctx: &Context, id: String) -> Result<()> {
    let storage = ctx.storage().await?;
    let batch_id = BatchId::from(id);
    let removed = storage.delete_batch(&batch_id).await?;
    println!("Deleted batch {batch_id} ({removed} results)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Database maintenance
// ---------------------------------------------------------------------------

async fn cmd_db_info(ctx: &Context) -> Result<()> {
    let storage = ctx.storage_readonly().await?;
    let info = storage.database_info().await?;
    output::print_database_info(&info);
    Ok(())
}

async fn cmd_db_vacuum(ctx: &Context) -> Result<()> {
    let storage = ctx.storage().await?;
    let before = storage.database_info().await?.size_bytes;
    storage.vacuum().await?;
    let after = storage.database_info().await?.size_bytes;
    println!(
        "Vacuumed {}: {} -> {}",
        ctx.db_path.display(),
        output::format_bytes(before),
        output::format_bytes(after)
    );
    Ok(())
}

async fn cmd_db_clear(ctx: &Context, yes: bool) -> Result<()> {
    if !yes {
        return Err(eyre!(
            "refusing to delete all results without --yes (database: {})",
            ctx.db_path.display()
        ));
    }
    let storage = ctx.storage().await?;
    let cleared = storage.clear_all().await?;
    println!(
        "Cleared {} results and {} batches",
        cleared.results, cleared.batches
    );
    Ok(())
}

async fn cmd_db_dedupe(ctx: &Context) -> Result<()> {
    let storage = ctx.storage().await?;
    let removed = storage.remove_duplicate_results().await?;
    println!("Removed {removed} duplicate results");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config and diagnostics
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(ctx: &Context) -> Result<()> {
    let toml_str = toml::to_string_pretty(&ctx.config)?;
    println!("{toml_str}");
    Ok(())
}

async fn cmd_doctor(ctx: &Context) -> Result<()> {
    match config_file_path() {
        Ok(path) if path.exists() => println!("  config    {}", path.display()),
        Ok(path) => println!("  config    {} (not found, using defaults)", path.display()),
        Err(e) => println!("  config    {e}"),
    }

    match resolve_provider(&ctx.config.classifier) {
        Ok(provider) => {
            println!("  provider  {} ({})", provider.name(), provider.model());
            let classifier = OpenAiClassifier::new(provider)?;
            match classifier.ping().await {
                Ok(reply) => println!("  ping      ok: {reply}"),
                Err(e) => println!("  ping      failed: {e}"),
            }
        }
        Err(e) => println!("  provider  {e}"),
    }

    let tesseract = &ctx.config.ocr.tesseract_cmd;
    match std::process::Command::new(tesseract).arg("--version").output() {
        Ok(out) if out.status.success() => {
            let version = String::from_utf8_lossy(&out.stdout);
            let first = version.lines().next().unwrap_or_default();
            println!("  ocr       {first}");
        }
        _ => println!("  ocr       '{tesseract}' not found (OCR and BOTH methods unavailable)"),
    }

    if ctx.db_path.exists() {
        let storage = ctx.storage_readonly().await?;
        let info = storage.database_info().await?;
        println!(
            "  database  {} ({} results, {} batches, schema v{})",
            info.path.display(),
            info.total_results,
            info.total_batches,
            info.schema_version
        );
    } else {
        println!("  database  {} (not created yet)", ctx.db_path.display());
    }

    Ok(())
}
