//! Weather field processor.
//!
//! Processes one model run, or keeps following the latest run:
//! - Fetches GRIB2 containers from ordered mirrors
//! - Stages them per forecast step
//! - Extracts, derives and renders every requested field
//! - Skips steps whose artifacts already exist

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use derived::FunctionLibrary;
use extraction::{Grib2Backend, RawExtractor, Wgrib2Runner};
use field_config::FieldRegistry;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wx_common::RunKey;

use processor::availability::{latest_available_cycle, max_forecast_hour};
use processor::{
    load_model_configs, parse_hours, resolve_request, BuiltinStyles, FieldPipeline, HttpTransport,
    ModelConfig, OutputLayout, PngRenderer, Renderer, RunOptions, RunOrchestrator, RunSummary,
    SourceFetcher, StagingLayout, Transport,
};

#[derive(Parser, Debug)]
#[command(name = "processor")]
#[command(about = "Fetch a model run and render its weather fields")]
struct Args {
    /// Configuration directory (contains fields/ and models/)
    #[arg(long, env = "CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Model to process
    #[arg(short, long, default_value = "hrrr")]
    model: String,

    /// Cycle as YYYYMMDDHH (default: latest available)
    #[arg(long)]
    cycle: Option<String>,

    /// Forecast hours, as a range (0-18) or a list (0,3,6)
    #[arg(long)]
    hours: Option<String>,

    /// Fields to produce
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Field categories to produce
    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,

    /// Process a single run and exit
    #[arg(long, conflicts_with = "watch")]
    once: bool,

    /// Keep following the latest run until interrupted
    #[arg(long)]
    watch: bool,

    /// Seconds between checks in watch mode
    #[arg(long, default_value = "30")]
    check_interval: u64,

    /// Skip fetching and use already staged containers
    #[arg(long)]
    compute_only: bool,

    /// Recompute fields that already have artifacts
    #[arg(long)]
    force: bool,

    /// Directory for rendered artifacts
    #[arg(long, env = "OUTPUT_DIR", default_value = "outputs")]
    output_dir: PathBuf,

    /// Directory for downloaded and staged containers
    #[arg(long, env = "STAGING_DIR", default_value = "grib_files")]
    staging_dir: PathBuf,

    /// Steps fetched ahead of compute
    #[arg(long, default_value = "2")]
    prefetch: usize,

    /// Concurrent container downloads
    #[arg(long, default_value = "2")]
    fetch_workers: usize,

    /// Concurrent step computations (default: CPU count)
    #[arg(long)]
    compute_workers: Option<usize>,

    /// Seconds allowed per mirror attempt
    #[arg(long, default_value = "600")]
    attempt_timeout: u64,

    /// Path to the wgrib2 binary used as an extraction fallback
    #[arg(long, env = "WGRIB2")]
    wgrib2: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!(model = %args.model, "Starting field processor");

    let model = load_model_configs(&args.config_dir)?
        .into_iter()
        .find(|m| m.model == args.model)
        .ok_or_else(|| anyhow!("no configuration for model '{}'", args.model))?;
    let model = Arc::new(model);

    let functions = FunctionLibrary::builtin();
    let registry = FieldRegistry::from_dir(args.config_dir.join("fields"))?
        .with_known_functions(functions.names());
    let loaded = registry.load_all().context("Failed to load field configurations")?;
    for rejected in registry.rejected()? {
        warn!(field = %rejected.name, reason = %rejected.reason, "Field rejected");
    }
    info!(fields = loaded, "Loaded field configurations");
    let registry = Arc::new(registry);

    let fields = resolve_request(&registry, &args.fields, &args.categories)?;
    if fields.is_empty() {
        bail!("no fields selected");
    }

    let attempt_timeout = Duration::from_secs(args.attempt_timeout);
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(attempt_timeout)?);
    let fetcher = SourceFetcher::new(transport.clone(), model.clone())
        .with_attempt_timeout(attempt_timeout);

    let backend = Grib2Backend::new(Arc::new(model.grib_tables.to_tables()));
    let mut extractor = RawExtractor::new(Arc::new(backend));
    if let Some(binary) = &args.wgrib2 {
        extractor = extractor.with_utility(Wgrib2Runner::new(binary));
    }

    let renderer: Arc<dyn Renderer> = Arc::new(PngRenderer::new(Arc::new(BuiltinStyles::default())));
    let pipeline = FieldPipeline::new(
        registry.clone(),
        extractor,
        renderer,
        OutputLayout::new(&args.output_dir),
        model.processing.category_file_types.clone(),
    );

    let cancel = CancellationToken::new();
    let mut orchestrator = RunOrchestrator::new(
        model.clone(),
        fetcher,
        pipeline,
        StagingLayout::new(&args.staging_dir),
    )
    .with_fetch_workers(args.fetch_workers)
    .with_cancellation(cancel.clone());
    if let Some(n) = args.compute_workers {
        orchestrator = orchestrator.with_compute_workers(n);
    }

    let options = RunOptions {
        fields,
        force: args.force,
        compute_only: args.compute_only,
        prefetch: args.prefetch,
    };

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            cancel.cancel();
            shutdown_tx.send(()).ok();
        });
    }

    if args.watch && !args.once {
        info!(interval = args.check_interval, "Following latest runs");
        return watch(&orchestrator, transport.as_ref(), &args, &options, shutdown_rx).await;
    }

    let run = match &args.cycle {
        Some(cycle) => RunKey::parse(model.model.clone(), cycle)?,
        None => latest_available_cycle(transport.as_ref(), &model, Utc::now())
            .await
            .ok_or_else(|| anyhow!("no available cycle for {}", model.model))?,
    };
    let summary = process_run(&orchestrator, &model, &run, args.hours.as_deref(), &options).await?;
    if !summary.is_success() {
        bail!("run {} produced no output", run);
    }
    Ok(())
}

async fn process_run(
    orchestrator: &RunOrchestrator,
    model: &ModelConfig,
    run: &RunKey,
    hours: Option<&str>,
    options: &RunOptions,
) -> Result<RunSummary> {
    let max = max_forecast_hour(model, run);
    let hours = match hours {
        Some(spec) => parse_hours(spec, max)?,
        None => (0..=max).collect(),
    };
    info!(run = %run, hours = hours.len(), fields = options.fields.len(), "Processing run");

    let summary = orchestrator.run(run, &hours, options).await;
    for step in &summary.steps {
        if let processor::StepOutcome::Failed(reason) = &step.outcome {
            warn!(step = %step.step, reason = %reason, "Step failed");
        }
    }
    Ok(summary)
}

/// Process the latest run every `check_interval` seconds. Finished steps are
/// skipped, so repeated passes only pick up newly published hours.
async fn watch(
    orchestrator: &RunOrchestrator,
    transport: &dyn Transport,
    args: &Args,
    options: &RunOptions,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let interval = Duration::from_secs(args.check_interval);

    loop {
        match latest_available_cycle(transport, orchestrator.model(), Utc::now()).await {
            Some(run) => {
                if let Err(e) =
                    process_run(orchestrator, orchestrator.model(), &run, args.hours.as_deref(), options)
                        .await
                {
                    error!(run = %run, error = %e, "Run failed");
                }
            }
            None => warn!("No available cycle yet"),
        }

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutting down processor");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }

    Ok(())
}
