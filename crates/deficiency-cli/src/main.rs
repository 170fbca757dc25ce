mod display;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use deficiency_ai::{ClassificationModel, HeuristicModel, HttpModel};
use deficiency_core::{Classification, ItemRevision};
use deficiency_engine::{AnalysisOrchestrator, EngineConfig};
use deficiency_store::{
    HttpIndex, HttpReranker, JsonFileReportStore, MemoryIndex, MemoryReportStore, ReportStore,
    VectorIndex,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deficiency", version, about = "Discovery deficiency analysis")]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyse an RTP against a production and its written response.
    Analyze(AnalyzeArgs),
    /// Print a stored report.
    Show {
        /// Report directory.
        #[arg(long)]
        out: PathBuf,
        report_id: String,
    },
    /// Append a reviewer revision to one item of a stored report.
    Revise {
        #[arg(long)]
        out: PathBuf,
        report_id: String,
        request_number: String,
        /// Replacement classification, e.g. partially_produced.
        #[arg(long)]
        classification: Option<String>,
        #[arg(long)]
        notes: String,
        #[arg(long, env = "USER")]
        by: String,
    },
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Request to Produce text file.
    #[arg(long)]
    rtp: PathBuf,
    /// Opposing counsel's written response text file.
    #[arg(long)]
    response: Option<PathBuf>,
    #[arg(long)]
    production: String,

    /// JSON array of chunks to index in memory.
    #[arg(long, conflicts_with = "index_url", required_unless_present = "index_url")]
    chunks: Option<PathBuf>,
    /// Remote chunk index service.
    #[arg(long)]
    index_url: Option<String>,
    #[arg(long)]
    reranker_url: Option<String>,

    /// Generation endpoint for the classification model.
    #[arg(long, conflicts_with = "offline", required_unless_present = "offline")]
    model_url: Option<String>,
    #[arg(long, env = "DEFICIENCY_MODEL_API_KEY", hide_env_values = true)]
    model_api_key: Option<String>,
    /// Classify with the evidence-coverage heuristic instead of a model.
    #[arg(long)]
    offline: bool,

    /// Directory to persist the report in.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Print the report as JSON instead of a card.
    #[arg(long)]
    json: bool,

    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    retrieval_limit: Option<usize>,
    #[arg(long)]
    max_attempts: Option<u32>,
    #[arg(long)]
    model_timeout_secs: Option<u64>,
}

impl AnalyzeArgs {
    /// Environment defaults overlaid with explicit flags.
    fn config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = EngineConfig::from_env()?;
        if let Some(v) = self.concurrency {
            config.concurrency = v;
        }
        if let Some(v) = self.retrieval_limit {
            config.retrieval_limit = v;
        }
        if let Some(v) = self.max_attempts {
            config.retry.max_attempts = v;
        }
        if let Some(v) = self.model_timeout_secs {
            config.model_timeout = Duration::from_secs(v);
        }
        config.validate()?;
        Ok(config)
    }
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

async fn open_store(out: Option<&Path>) -> anyhow::Result<Arc<dyn ReportStore>> {
    Ok(match out {
        Some(dir) => Arc::new(
            JsonFileReportStore::open(dir)
                .await
                .with_context(|| format!("opening report directory {}", dir.display()))?,
        ),
        None => Arc::new(MemoryReportStore::new()),
    })
}

async fn analyze(args: AnalyzeArgs) -> anyhow::Result<()> {
    let config = args.config()?;
    let rtp = read_text(&args.rtp)?;
    let response = match &args.response {
        Some(path) => read_text(path)?,
        None => String::new(),
    };

    let index: Arc<dyn VectorIndex> = match (&args.chunks, &args.index_url) {
        (Some(path), _) => {
            let index = MemoryIndex::new();
            let count = index
                .load_json_file(&args.production, path)
                .await
                .with_context(|| format!("loading chunks from {}", path.display()))?;
            eprintln!("  Indexed {count} chunks for {}", args.production);
            Arc::new(index)
        }
        (None, Some(url)) => Arc::new(HttpIndex::new(url, config.retrieval_timeout)?),
        (None, None) => bail!("either --chunks or --index-url is required"),
    };

    let model: Arc<dyn ClassificationModel> = match (&args.model_url, args.offline) {
        (_, true) => Arc::new(HeuristicModel::new()),
        (Some(url), false) => {
            let mut model = HttpModel::new(url, config.model_timeout)?;
            if let Some(key) = &args.model_api_key {
                model = model.with_api_key(key.clone());
            }
            Arc::new(model)
        }
        (None, false) => bail!("either --model-url or --offline is required"),
    };

    let store = open_store(args.out.as_deref()).await?;
    let reranker_timeout = config.retrieval_timeout;
    let mut builder = AnalysisOrchestrator::builder(index, model, store).config(config);
    if let Some(url) = &args.reranker_url {
        builder = builder.reranker(Arc::new(HttpReranker::new(url, reranker_timeout)?));
    }
    let orchestrator = builder.build()?;

    let mut handle = orchestrator.start(&args.production, &rtp, &response)?;
    let mut events = handle
        .take_events()
        .context("event stream already taken")?;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = display::event_line(&event) {
                eprintln!("{line}");
            }
        }
    });

    // Ctrl-C cancels the session; the partial report is still printed.
    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });
    let report = handle.join().await?;
    printer.await.context("event printer failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        display::print_report(&report);
    }
    if let Some(dir) = &args.out {
        eprintln!("  Report saved to {}", dir.display());
    }
    Ok(())
}

async fn show(out: &Path, report_id: &str) -> anyhow::Result<()> {
    let store = JsonFileReportStore::open(out).await?;
    let report = store
        .load(report_id)
        .await
        .with_context(|| format!("loading report {report_id}"))?;
    display::print_report(&report);
    Ok(())
}

async fn revise(
    out: &Path,
    report_id: &str,
    request_number: &str,
    classification: Option<&str>,
    notes: &str,
    by: &str,
) -> anyhow::Result<()> {
    let classification = classification
        .map(str::parse::<Classification>)
        .transpose()?;
    let store = JsonFileReportStore::open(out).await?;
    let revision = ItemRevision::new(classification, notes, by);
    let report = store
        .append_revision(report_id, request_number, revision)
        .await?;
    if let Some(item) = report.item(request_number) {
        eprintln!(
            "  Request {request_number} now {} ({} revisions)",
            item.effective_classification(),
            item.revisions.len()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!("deficiency v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Analyze(args) => analyze(args).await,
        Command::Show { out, report_id } => show(&out, &report_id).await,
        Command::Revise {
            out,
            report_id,
            request_number,
            classification,
            notes,
            by,
        } => {
            revise(
                &out,
                &report_id,
                &request_number,
                classification.as_deref(),
                &notes,
                &by,
            )
            .await
        }
    }
}
