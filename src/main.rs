//! resilient-fetch
//!
//! Command-line driver for the resilience primitives.
//!
//! ```text
//! simulate      → N fetches against a FlakyService
//!                 through CancellableThreadPool → ResilientCall (breaker + retry)
//!                 → summary (text or JSON)
//! check-config  → load + validate a TOML config, print the effective values
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use serde::Serialize;

use resilient_fetch::config::{load_config, ConfigError, ResilienceConfig};
use resilient_fetch::observability::{logging, metrics};
use resilient_fetch::resilience::{BreakerRegistry, BreakerSnapshot, ResilientCall, RetryPolicy};
use resilient_fetch::sim::{FaultProfile, FlakyService, ServiceStats};
use resilient_fetch::{CancellableThreadPool, PoolOptions};

#[derive(Parser)]
#[command(name = "resilient-fetch")]
#[command(about = "Retry, circuit breaking and bounded concurrency for unreliable fetches", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run simulated fetches against a flaky service
    Simulate(SimulateArgs),
    /// Validate a configuration file and print the effective configuration
    CheckConfig {
        /// Path to the TOML configuration file
        path: PathBuf,
    },
}

#[derive(clap::Args)]
struct SimulateArgs {
    /// Configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of fetches to run
    #[arg(short, long, default_value_t = 50)]
    tasks: usize,

    /// Override the configured worker count
    #[arg(short, long)]
    workers: Option<usize>,

    /// Name of the simulated service
    #[arg(long, default_value = "tile_server")]
    service: String,

    /// Probability that a single call fails
    #[arg(long, default_value_t = 0.3)]
    failure_rate: f64,

    /// Status code reported by failing calls
    #[arg(long, default_value_t = 503)]
    failure_status: u16,

    /// Latency added to every call, in milliseconds
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,

    /// Override the configured retry budget
    #[arg(long)]
    max_retries: Option<u32>,

    /// Override the configured initial backoff delay, in milliseconds
    #[arg(long)]
    initial_delay_ms: Option<u64>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct SimulationSummary {
    service: String,
    tasks: usize,
    succeeded: usize,
    failed: usize,
    failures_by_kind: BTreeMap<String, usize>,
    hints: BTreeMap<String, String>,
    elapsed_ms: u64,
    upstream: ServiceStats,
    breakers: Vec<BreakerSnapshot>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate(args) => simulate(args),
        Commands::CheckConfig { path } => check_config(path),
    }
}

fn simulate(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ResilienceConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?);
    }

    let mut policy = RetryPolicy::from(&config.retry);
    if let Some(max_retries) = args.max_retries {
        policy = policy.with_max_retries(max_retries);
    }
    if let Some(ms) = args.initial_delay_ms {
        policy.initial_delay = Duration::from_millis(ms);
        policy.max_delay = policy.max_delay.max(policy.initial_delay);
    }

    let mut options = PoolOptions::from(&config.pool);
    if let Some(workers) = args.workers {
        options.workers = workers;
    }

    let registry = Arc::new(BreakerRegistry::from_config(&config));
    let service = Arc::new(FlakyService::new(
        args.service.clone(),
        FaultProfile {
            failure_rate: args.failure_rate,
            latency: Duration::from_millis(args.latency_ms),
            failure_status: args.failure_status,
            outage: None,
        },
    ));
    let call = ResilientCall::for_service(&registry, &args.service, policy);

    tracing::info!(
        service = %args.service,
        tasks = args.tasks,
        workers = options.workers,
        failure_rate = args.failure_rate,
        "Starting simulation"
    );

    let pool = CancellableThreadPool::new(options);
    for index in 0..args.tasks {
        let call = call.clone();
        let service = service.clone();
        let key = format!("tile-{index}");
        pool.submit(move || call.call(|| service.fetch(&key)));
    }

    let started = Instant::now();
    let report = pool.wait_completion(|completed, total| {
        tracing::debug!(completed, total, "Progress");
    })?;

    let mut failures_by_kind = BTreeMap::new();
    let mut hints = BTreeMap::new();
    for failure in &report.failures {
        let kind = failure.kind().to_string();
        hints
            .entry(kind.clone())
            .or_insert_with(|| failure.remediation().hint().to_string());
        *failures_by_kind.entry(kind).or_insert(0) += 1;
    }

    let summary = SimulationSummary {
        service: args.service,
        tasks: args.tasks,
        succeeded: report.results.len(),
        failed: report.failures.len(),
        failures_by_kind,
        hints,
        elapsed_ms: started.elapsed().as_millis() as u64,
        upstream: service.stats(),
        breakers: registry.snapshot(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &SimulationSummary) {
    println!(
        "{}: {}/{} succeeded in {}ms ({} upstream calls, {} upstream failures)",
        summary.service,
        summary.succeeded,
        summary.tasks,
        summary.elapsed_ms,
        summary.upstream.calls,
        summary.upstream.failures
    );
    for (kind, count) in &summary.failures_by_kind {
        let hint = summary.hints.get(kind).map(String::as_str).unwrap_or_default();
        println!("  {kind}: {count}  {hint}");
    }
    for breaker in &summary.breakers {
        println!(
            "  breaker {}: {} ({}/{} failures)",
            breaker.name,
            breaker.state.as_str(),
            breaker.failure_count,
            breaker.failure_threshold
        );
    }
}

fn check_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match load_config(&path) {
        Ok(config) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Err(ConfigError::Validation(errors)) => {
            eprintln!("Configuration invalid: {}", path.display());
            for error in &errors {
                eprintln!("  - {error}");
            }
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
