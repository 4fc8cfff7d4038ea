//! `orchestrator` - run queries through the decompose / route / execute pipeline.
//!
//! Results go to stdout as pretty JSON; logs go to stderr.

mod config;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use orchestration::{
    CapabilityRouter, Context, Decomposer, HeuristicDecomposer, OrchestrationCoordinator,
    Requirements, Router,
};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; `ORCH_*` environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// OpenAI-compatible chat completions URL. Without it answers are built offline
    #[arg(long, global = true)]
    executor_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline for one query
    Process {
        query: String,
        /// Context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },
    /// Show the routing decision only
    Route {
        query: String,
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        max_response_time_ms: Option<u64>,
        #[arg(long)]
        min_quality: Option<f64>,
    },
    /// Show the decomposition only
    Decompose {
        query: String,
        #[arg(long)]
        context: Option<String>,
    },
    /// Print the health report of a fresh coordinator
    Health,
    /// Drive a mixed workload and report metrics, router metrics and health
    Bench {
        #[arg(long, default_value_t = 100)]
        iterations: usize,
    },
}

const BENCH_QUERIES: &[(&str, &str)] = &[
    ("Analyze quarterly revenue trends by region", r#"{"data": true, "domain": "sales"}"#),
    ("Summarize the meeting notes into a brief recap", r#"{}"#),
    (
        "Explain the legal compliance requirements for this contract",
        r#"{"domain": "legal", "complexity": "high"}"#,
    ),
    (
        "Schedule a meeting with the project team and assign owners",
        r#"{"stakeholders": ["pm", "eng"]}"#,
    ),
    ("Verify and audit the expense entries for errors", r#"{"urgency": "high"}"#),
    ("", r#"{}"#),
];

#[derive(Serialize)]
struct BenchReport {
    iterations: usize,
    errors: usize,
    wall_time_ms: f64,
    metrics: orchestration::CoordinatorMetrics,
    router_metrics: Option<orchestration::RouterMetrics>,
    health: orchestration::HealthStatus,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_coordinator(args: &Args) -> Result<OrchestrationCoordinator> {
    let config = config::load(args.config.as_deref())?;
    let executor = config::executor(args.executor_url.as_deref())?;
    Ok(OrchestrationCoordinator::with_defaults(config).with_executor(executor))
}

async fn bench(coordinator: &OrchestrationCoordinator, iterations: usize) -> Result<BenchReport> {
    let started = Instant::now();
    let mut errors = 0;
    for i in 0..iterations {
        let (query, raw) = BENCH_QUERIES[i % BENCH_QUERIES.len()];
        let context = config::parse_context(Some(raw))?;
        if let Err(e) = coordinator.process_query(query, &context).await {
            warn!(iteration = i, error = %e, "bench request failed");
            errors += 1;
        }
    }
    Ok(BenchReport {
        iterations,
        errors,
        wall_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        metrics: coordinator.get_metrics(),
        router_metrics: coordinator.get_router_metrics(),
        health: coordinator.get_health_status(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match &args.command {
        Command::Process { query, context } => {
            let coordinator = build_coordinator(&args)?;
            let context = config::parse_context(context.as_deref())?;
            let result = coordinator
                .process_query(query, &context)
                .await
                .context("query processing failed")?;
            print_json(&result)?;
        }
        Command::Route {
            query,
            context,
            max_response_time_ms,
            min_quality,
        } => {
            let config = config::load(args.config.as_deref())?;
            let router = CapabilityRouter::new(config.router);
            let context = Context::from_value(&config::parse_context(context.as_deref())?);
            let requirements = Requirements {
                max_response_time_ms: *max_response_time_ms,
                min_quality: *min_quality,
            };
            let requirements = (!requirements.is_empty()).then_some(requirements);
            let decision = router
                .route(query, &context, requirements.as_ref())
                .context("routing failed")?;
            print_json(&decision)?;
        }
        Command::Decompose { query, context } => {
            let config = config::load(args.config.as_deref())?;
            let decomposer = HeuristicDecomposer::new(config.decomposer);
            let context = Context::from_value(&config::parse_context(context.as_deref())?);
            let decomposition = decomposer
                .decompose(query, &context)
                .context("decomposition failed")?;
            print_json(&decomposition)?;
        }
        Command::Health => {
            let coordinator = build_coordinator(&args)?;
            print_json(&coordinator.get_health_status())?;
        }
        Command::Bench { iterations } => {
            let coordinator = build_coordinator(&args)?;
            info!(iterations, "starting bench workload");
            let report = bench(&coordinator, *iterations).await?;
            info!(
                errors = report.errors,
                wall_time_ms = report.wall_time_ms,
                stability = report.metrics.stability_score,
                "bench complete"
            );
            print_json(&report)?;
        }
    }

    Ok(())
}
