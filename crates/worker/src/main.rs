use anyhow::{Context, Result};
use clap::Parser;
use rig_core::{
    ClientConfig, DispatchEngine, DispatchStats, DispatchSummary, ExportRequest,
    ExportSubmitter, HttpJsonSubmitter, MockSubmitter,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "worker")]
#[command(about = "Metrics load worker - replays an export payload against an ingestion endpoint")]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config/worker.toml")]
    config: PathBuf,

    /// Payload file (overrides run.payload_path)
    #[arg(long)]
    payload: Option<PathBuf>,

    /// Run duration in milliseconds (overrides run.duration_ms)
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Maximum in-flight calls (overrides target.concurrency)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Stop after this many calls (overrides run.total_requests)
    #[arg(long)]
    total_requests: Option<u64>,

    /// Submission mode: mock or http
    #[arg(long, default_value = "http")]
    mode: String,

    /// Worker ID (overrides config)
    #[arg(long)]
    worker_id: Option<String>,

    /// Print stats every N milliseconds
    #[arg(long, default_value = "1000")]
    print_every_ms: u64,

    /// Directory for the JSON run log
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkerResult {
    worker_id: String,
    timestamp: String,
    endpoint: String,
    mode: String,
    concurrency: usize,
    remote_version: Option<String>,
    #[serde(flatten)]
    summary: DispatchSummary,
    achieved_cps: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration
    let mut config = ClientConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    apply_overrides(&mut config, &args);

    info!(
        "Starting worker '{}' in {} mode against {}",
        config.worker.id, args.mode, config.target.endpoint
    );

    let payload = ExportRequest::from_file(&config.run.payload_path).with_context(|| {
        format!("Failed to load payload from {:?}", config.run.payload_path)
    })?;
    info!(
        "Loaded payload {:?}: {} resource groups, {} metric records",
        config.run.payload_path,
        payload.resource_metrics.len(),
        payload.metric_count()
    );

    // Create submitter based on mode
    let submitter: Arc<dyn ExportSubmitter> = match args.mode.as_str() {
        "mock" => Arc::new(MockSubmitter::new(5)), // 5ms simulated latency
        "http" => Arc::new(
            HttpJsonSubmitter::new(
                &config.target.endpoint,
                config.target.timeout_ms,
                config.tls.as_ref(),
            )
            .context("Failed to create HTTP submitter")?,
        ),
        _ => anyhow::bail!("Invalid mode: {}, must be 'mock' or 'http'", args.mode),
    };

    info!("Using submitter: {}", submitter.name());

    let remote_version = match submitter.version().await {
        Ok(version) => {
            info!(
                "Endpoint build: commit={} built_at={}",
                version.git_commit_sha, version.build_timestamp
            );
            Some(version.git_commit_sha)
        }
        Err(e) => {
            warn!("Failed to query endpoint version: {:#}", e);
            None
        }
    };

    let cancel = CancellationToken::new();
    spawn_interrupt_listener(cancel.clone());

    let stats = Arc::new(DispatchStats::new());
    let mut engine = DispatchEngine::new(
        Arc::clone(&submitter),
        config.target.concurrency,
        Arc::clone(&stats),
    )?;
    if let Some(total) = config.run.total_requests {
        engine = engine.with_max_calls(total);
    }

    let progress_stop = CancellationToken::new();
    let progress = spawn_progress_reporter(
        Arc::clone(&stats),
        progress_stop.clone(),
        args.print_every_ms,
    );

    let summary = engine
        .run(
            Arc::new(payload),
            cancel,
            config.run.duration_ms.map(Duration::from_millis),
        )
        .await?;

    progress_stop.cancel();
    let _ = progress.await;

    let result = WorkerResult {
        worker_id: config.worker.id.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        endpoint: config.target.endpoint.clone(),
        mode: args.mode.clone(),
        concurrency: config.target.concurrency,
        remote_version,
        achieved_cps: calls_per_second(&summary),
        summary,
    };

    // Write results to file
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let output_path = args
        .results_dir
        .join(format!("worker_{}_{}.json", config.worker.id, timestamp));

    match write_result(&args.results_dir, &output_path, &result) {
        Ok(()) => info!("Results written to {:?}", output_path),
        Err(e) => warn!("Failed to write run log {:?}: {:#}", output_path, e),
    }
    print_summary(&result);

    Ok(())
}

fn apply_overrides(config: &mut ClientConfig, args: &Args) {
    if let Some(worker_id) = &args.worker_id {
        config.worker.id = worker_id.clone();
    }
    if let Some(payload) = &args.payload {
        config.run.payload_path = payload.clone();
    }
    if let Some(duration_ms) = args.duration_ms {
        config.run.duration_ms = Some(duration_ms);
    }
    if let Some(total) = args.total_requests {
        config.run.total_requests = Some(total);
    }
    if let Some(concurrency) = args.concurrency {
        config.target.concurrency = concurrency;
    }
}

/// Route Ctrl-C into the run's cancellation token.
fn spawn_interrupt_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping dispatch");
                cancel.cancel();
            }
            Err(e) => warn!("Failed to listen for interrupt: {}", e),
        }
    });
}

fn spawn_progress_reporter(
    stats: Arc<DispatchStats>,
    stop: CancellationToken,
    print_every_ms: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(print_every_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = interval.tick() => print_progress(&stats.snapshot()),
            }
        }
    })
}

fn calls_per_second(summary: &DispatchSummary) -> u64 {
    if summary.duration_ms > 0 {
        (summary.issued * 1000) / summary.duration_ms
    } else {
        0
    }
}

fn write_result(dir: &std::path::Path, path: &std::path::Path, result: &WorkerResult) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let result_json = serde_json::to_string_pretty(result)?;
    std::fs::write(path, result_json)?;
    Ok(())
}

fn print_progress(summary: &DispatchSummary) {
    info!(
        "Progress: issued={} succeeded={} failed={} partial_responses={} transport_errors={} cps={} p50={}ms p95={}ms p99={}ms",
        summary.issued,
        summary.succeeded,
        summary.failed,
        summary.partial_responses,
        summary.transport_errors,
        calls_per_second(summary),
        summary.latency_p50_ms,
        summary.latency_p95_ms,
        summary.latency_p99_ms
    );
}

fn print_summary(result: &WorkerResult) {
    let summary = &result.summary;
    println!("\n=== Worker {} Summary ===", result.worker_id);
    println!("Endpoint: {}", result.endpoint);
    if let Some(version) = &result.remote_version {
        println!("Endpoint commit: {}", version);
    }
    println!("Duration: {}ms", summary.duration_ms);
    println!("Total issued: {}", summary.issued);
    println!("Succeeded: {}", summary.succeeded);
    println!("Failed: {}", summary.failed);
    println!(
        "Calls: ok={} partial={} error={}",
        summary.ok_calls, summary.partial_responses, summary.transport_errors
    );
    println!("Achieved calls/s: {}", result.achieved_cps);
    println!("Latency p50: {}ms", summary.latency_p50_ms);
    println!("Latency p95: {}ms", summary.latency_p95_ms);
    println!("Latency p99: {}ms", summary.latency_p99_ms);
    println!(
        "First failure: {}",
        summary.first_failure.as_deref().unwrap_or("-")
    );
    println!(
        "Last failure: {}",
        summary.last_failure.as_deref().unwrap_or("-")
    );
    println!();
}
