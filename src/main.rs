use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use datagenesis::ClientError;
use datagenesis::api::{BackendApi, HttpBackend};
use datagenesis::auth::SessionStore;
use datagenesis::config::ClientConfig;
use datagenesis::export::{ExportFormat, export, save};
use datagenesis::fallback::{infer_schema, parse_upload};
use datagenesis::model::{DataSource, GenerationParams, GenerationRequest, GenerationResult, Origin};
use datagenesis::net::{ConnectionManager, MessageRouter};
use datagenesis::orchestrator::Orchestrator;
use datagenesis::progress_log::{EventLog, ProgressEntry, spawn_log_sink};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{}", .0.user_message())]
    Client(#[from] ClientError),
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("waiting for ctrl-c failed: {0}")]
    Signal(std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "datagenesis", about = "DataGenesis synthetic data client")]
struct Cli {
    /// Backend origin; the duplex address is derived from it.
    #[arg(long, env = "DATAGENESIS_API_URL")]
    api_url: Option<String>,

    /// Surface backend failures instead of switching to the local engine.
    #[arg(long, env = "DATAGENESIS_NO_FALLBACK", default_value_t = false)]
    no_fallback: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Health,
    Schema(SchemaArgs),
    Generate(GenerateArgs),
    /// Parse a CSV/JSON file and print its rows and inferred schema.
    Parse {
        file: PathBuf,
    },
    Jobs,
    Metrics,
    Agents,
    /// Stream progress from the duplex channel until ctrl-c.
    Watch,
    Logout,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    #[arg(long)]
    description: String,

    #[arg(long)]
    domain: String,

    #[arg(long)]
    data_type: String,
}

#[derive(Args, Debug)]
#[command(group = clap::ArgGroup::new("source").required(true).args(["description", "input"]))]
struct GenerateArgs {
    #[arg(long)]
    description: Option<String>,

    #[arg(long, help = "CSV or JSON file to seed generation from")]
    input: Option<PathBuf>,

    #[arg(long)]
    domain: String,

    #[arg(long)]
    data_type: String,

    #[arg(long, default_value_t = 1000)]
    rows: u32,

    #[arg(long, default_value = "high")]
    quality: String,

    #[arg(long, default_value = "maximum")]
    privacy: String,

    #[arg(long, help = "Write the dataset here instead of printing it")]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = FormatArg::Csv)]
    format: FormatArg,

    #[arg(long, default_value_t = false)]
    watch: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum FormatArg {
    Csv,
    Json,
    Excel,
}

impl From<FormatArg> for ExportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Csv => Self::Csv,
            FormatArg::Json => Self::Json,
            FormatArg::Excel => Self::Excel,
        }
    }
}

struct CliContext {
    config: ClientConfig,
    session: Arc<SessionStore>,
    api: Arc<HttpBackend>,
    fallback: bool,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = &cli.api_url {
        let explicit_ws = std::env::var("DATAGENESIS_WS_URL").is_ok_and(|v| !v.is_empty());
        let endpoints = ClientConfig::new(url, explicit_ws.then_some(config.ws_url.as_str()))?;
        config.api_url = endpoints.api_url;
        config.ws_url = endpoints.ws_url;
    }
    let session = Arc::new(SessionStore::open(&config.session_file, config.guest_mode));
    let api = Arc::new(HttpBackend::new(&config, session.clone())?);
    let ctx = CliContext { config, session, api, fallback: !cli.no_fallback };

    match cli.command {
        Command::Health => print_json(&ctx.api.health().await?),
        Command::Schema(args) => run_schema(&ctx, args).await,
        Command::Generate(args) => run_generate(&ctx, args).await,
        Command::Parse { file } => run_parse(&file),
        Command::Jobs => print_json(&ctx.api.list_jobs().await?),
        Command::Metrics => print_json(&ctx.api.metrics().await?),
        Command::Agents => print_json(&ctx.api.agents_status().await?),
        Command::Watch => run_watch(&ctx).await,
        Command::Logout => {
            ctx.session.clear()?;
            println!("signed out");
            Ok(())
        }
    }
}

fn orchestrator(ctx: &CliContext, router: Arc<MessageRouter>, log: Arc<Mutex<EventLog>>) -> Orchestrator {
    let api: Arc<dyn BackendApi> = ctx.api.clone();
    Orchestrator::new(api, router, log, ctx.config.timeouts.generation).with_fallback(ctx.fallback)
}

async fn run_schema(ctx: &CliContext, args: SchemaArgs) -> Result<(), CliError> {
    let router = Arc::new(MessageRouter::new());
    let log = Arc::new(Mutex::new(EventLog::new()));
    let mut orchestrator = orchestrator(ctx, router, log);

    let resolved = orchestrator.request_schema(&args.description, &args.domain, &args.data_type).await?;
    print_json(&json!({
        "origin": resolved.origin.label(),
        "result": serde_json::to_value(&resolved.result)?,
    }))
}

async fn run_generate(ctx: &CliContext, args: GenerateArgs) -> Result<(), CliError> {
    let router = Arc::new(MessageRouter::new());
    let log = Arc::new(Mutex::new(EventLog::new()));
    let sink = spawn_log_sink(&router, log.clone());
    let printer = args.watch.then(|| spawn_printer(&router));

    let connection = ConnectionManager::websocket(router.clone(), ctx.config.connection);
    if let Err(e) = connection.connect(&ctx.config.ws_url, &ctx.session.correlation_id()).await {
        tracing::warn!(error = %e, "progress channel unavailable; continuing without live updates");
    }

    let mut orchestrator = orchestrator(ctx, router, log.clone());
    let outcome = generate(&mut orchestrator, &args).await;

    connection.disconnect();
    sink.abort();
    if let Some(printer) = &printer {
        printer.abort();
    }
    let result = outcome?;

    if printer.is_none() || result.origin == Origin::Local {
        let log = log.lock().unwrap_or_else(PoisonError::into_inner);
        log.entries().for_each(print_entry);
    }
    eprintln!(
        "{} rows from {} engine (quality {:.0}, privacy {:.0}, bias {:.0})",
        result.data.len(),
        result.origin.label(),
        result.scores.quality_score,
        result.scores.privacy_score,
        result.scores.bias_score,
    );

    match &args.output {
        Some(output) => {
            let base = output.file_stem().and_then(|s| s.to_str()).unwrap_or("synthetic_data");
            let dir = output.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let blob = export(&result.data, args.format.into(), base)?;
            let path = save(&blob, dir)?;
            println!("{}", path.display());
            Ok(())
        }
        None => print_json(&result.data.to_json()),
    }
}

async fn generate(orchestrator: &mut Orchestrator, args: &GenerateArgs) -> Result<GenerationResult, CliError> {
    let source = match (&args.input, &args.description) {
        (Some(path), _) => {
            let contents = read_file(path)?;
            let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
            orchestrator.load_upload(file_name, &contents, &args.domain)?;
            DataSource::Uploaded(orchestrator.uploaded().cloned().unwrap_or_default())
        }
        (None, description) => {
            let description = description.clone().unwrap_or_default();
            let resolved = orchestrator.request_schema(&description, &args.domain, &args.data_type).await?;
            eprintln!("schema: {} fields ({})", resolved.result.schema.len(), resolved.origin.label());
            DataSource::Description(description)
        }
    };

    let request = GenerationRequest {
        domain: args.domain.clone(),
        data_type: args.data_type.clone(),
        source,
        params: GenerationParams {
            row_count: args.rows,
            quality_level: args.quality.clone(),
            privacy_level: args.privacy.clone(),
        },
    };
    Ok(orchestrator.generate(request).await?)
}

fn run_parse(file: &Path) -> Result<(), CliError> {
    let contents = read_file(file)?;
    let file_name = file.file_name().and_then(|s| s.to_str()).unwrap_or_default();
    let dataset = parse_upload(file_name, &contents)?;
    print_json(&json!({
        "columns": dataset.columns,
        "row_count": dataset.len(),
        "schema": serde_json::to_value(infer_schema(&dataset))?,
        "rows": dataset.to_json(),
    }))
}

async fn run_watch(ctx: &CliContext) -> Result<(), CliError> {
    let router = Arc::new(MessageRouter::new());
    let printer = spawn_printer(&router);
    let connection = ConnectionManager::websocket(router, ctx.config.connection);
    connection.connect(&ctx.config.ws_url, &ctx.session.correlation_id()).await?;
    eprintln!("watching {} (ctrl-c to stop)", ctx.config.ws_url);

    let waited = tokio::signal::ctrl_c().await;
    connection.disconnect();
    printer.abort();
    waited.map_err(CliError::Signal)
}

/// Print every routed progress update as it arrives.
fn spawn_printer(router: &MessageRouter) -> JoinHandle<()> {
    let mut events = router.subscribe_events();
    tokio::spawn(async move {
        let mut view = EventLog::with_capacity(1);
        loop {
            match events.recv().await {
                Ok(update) => print_entry(view.record(&update)),
                Err(RecvError::Lagged(skipped)) => eprintln!("... {skipped} updates skipped"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_entry(entry: &ProgressEntry) {
    let progress = entry.progress.map(|p| format!(" {p:>3}%")).unwrap_or_default();
    eprintln!("[{}]{progress} {}", entry.display_time(), entry.text);
}

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read { path: path.to_owned(), source })
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
