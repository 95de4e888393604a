//! # Web Framework Sweep - Main Entry Point
//!
//! Drives a matrix of HTTP load tests against a subject server binary and
//! records the latency distribution and throughput of every combination.
//!
//! ## Architecture Overview
//!
//! The main function performs these key operations:
//! 1. **Initialize logging**: colourised console output, optional log file
//! 2. **Parse and validate arguments**: builds the sweep dimensions
//! 3. **Check the environment**: required utilities and NUMA layout
//! 4. **Plan CPUs**: splits usable cores between subject and load generator
//! 5. **Run the sweep**: one trial per combination, strictly sequential
//! 6. **Persist results**: writes the nested JSON result tree
//!
//! ## Error Handling
//!
//! A missing utility is reported and the process exits with status 1 before
//! any trial runs. Configuration and persistence errors propagate through
//! `anyhow::Result`. Per-trial problems are logged and never stop the sweep.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use web_framework_sweep::{
    capability,
    cli::{Args, SweepConfiguration},
    cpu, logging,
    results::{ResultsManager, SweepResults, SystemInfo},
    sweep::{run_sweep, SweepPlan},
    trial::{concurrency_env, LaunchConfig, PipelineScript, TrialRunner},
    utils::{format_core_list, format_duration},
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Held until the end of main so the file writer flushes on exit.
    let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

    info!("Starting Web Framework Sweep v{}", web_framework_sweep::VERSION);
    debug!("Configuration: {:?}", args);

    let config = SweepConfiguration::from_args(&args)?;

    let required = capability::required_utilities(&args.loadgen_bin_name, args.enable_cpu_affinity);
    if let Err(e) = capability::require(required.as_slice()) {
        error!("{}", e);
        std::process::exit(1);
    }

    let numa_multi_node = capability::numa_is_multi_node();
    if numa_multi_node {
        warn!(
            "This host has more than one NUMA node. Results may vary with memory placement; \
             consider --enable-cpu-affinity with caps that fit in a single node"
        );
    }

    let cores = cpu::usable_core_ids();
    let allocation = cpu::plan_on_cores(
        &cores,
        args.subject_max_cpus,
        args.loadgen_max_cpus,
        args.enable_cpu_affinity,
    )
    .context("Invalid CPU caps")?;

    info!("Total usable cores: {}", cores.len());
    info!("Usable core list: {}", format_core_list(&cores, " "));
    info!(
        "Subject max procs: {} (cpus: {})",
        allocation.subject_max_procs,
        describe_cpus(&allocation.subject_cpus)
    );
    info!(
        "Load generator max procs: {} (cpus: {})",
        allocation.loadgen_max_procs,
        describe_cpus(&allocation.loadgen_cpus)
    );

    let launch = LaunchConfig {
        subject_program: absolute(&args.server_bin_name)?,
        subject_env: concurrency_env(&args.concurrency_env_var, allocation.subject_max_procs),
        inherit_subject_output: args.verbose,
        loadgen_program: resolve(&args.loadgen_bin_name),
        affinity_program: resolve(capability::AFFINITY_UTILITY),
        allocation: allocation.clone(),
        endpoint: config.endpoint.clone(),
        duration: config.test_duration,
        max_rps: args.stress_rps,
        pipeline: if config.pipelining_enabled {
            Some(PipelineScript {
                script: absolute(&args.pipeline_script)?,
                request_path: args.pipeline_request_path.clone(),
            })
        } else {
            None
        },
        extra_loadgen_args: args.extra_loadgen_args.clone(),
        readiness_retries: args.readiness_retries,
    };

    let plan = SweepPlan {
        frameworks: config.frameworks.clone(),
        connections: config.connections.clone(),
        processing_times: config.processing_times.clone(),
        pipelines: config.pipelines.clone(),
        cool_down: config.cool_down,
        loadgen_threads: allocation.loadgen_threads(),
    };

    info!("Total trials: {}", plan.total_trials());
    info!(
        "Estimated time to run all tests: {}",
        format_duration(plan.estimated_duration(config.test_duration))
    );

    let results = SweepResults::new(SystemInfo::collect(cores.len(), numa_multi_node), allocation);
    let runner = TrialRunner::new(launch)?;
    let results = run_sweep(&plan, &runner, results).await?;

    ResultsManager::new(&args.output_file).write(&results)?;

    info!("Web Framework Sweep completed successfully");
    Ok(())
}

fn describe_cpus(cpus: &[usize]) -> String {
    if cpus.is_empty() {
        "unpinned".to_string()
    } else {
        format_core_list(cpus, " ")
    }
}

/// Resolve a program on `PATH`, keeping the bare name if it cannot be found.
fn resolve(program: &str) -> PathBuf {
    capability::which(program).unwrap_or_else(|| PathBuf::from(program))
}

/// Anchor a relative path to the current directory.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}
