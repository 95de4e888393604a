use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::results::RESERVED_KEYS;
use crate::trial::ProcessingTime;

/// Web framework benchmark sweep - drives wrk2 against every combination
/// of framework, connection count, mocked processing time and pipeline depth
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Web frameworks to test (comma separated)
    #[clap(long, value_delimiter = ',', default_values_t = crate::defaults::frameworks(), help_heading = "Sweep Dimensions")]
    pub test_frameworks: Vec<String>,

    /// Load generator connection counts to simulate (comma separated)
    #[clap(long, value_delimiter = ',', default_values_t = vec![1u32, 100, 500, 5000], help_heading = "Sweep Dimensions")]
    pub wrk_connections: Vec<u32>,

    /// Processing times to mock in the subject, in ms (comma separated).
    /// -1 selects CPU-bound mode
    #[clap(long, value_delimiter = ',', default_values_t = vec![0i64, 10, 30, 100, 500, -1], allow_hyphen_values = true, help_heading = "Sweep Dimensions")]
    pub processing_time_ms: Vec<i64>,

    /// Pipeline depths to test (comma separated)
    #[clap(long, value_delimiter = ',', default_values_t = vec![1u32, 5, 10, 20], help_heading = "Sweep Dimensions")]
    pub pipeline_sizes: Vec<u32>,

    /// Skip pipelining entirely; every trial runs at depth 1 without the helper script
    #[clap(long, default_value_t = false, help_heading = "Sweep Dimensions")]
    pub disable_test_pipeline: bool,

    /// CPUs for the subject. 0 derives it from --loadgen-max-cpus and the core count
    #[clap(long, default_value_t = 0, help_heading = "CPU Placement")]
    pub subject_max_cpus: usize,

    /// CPUs for the load generator. 0 derives it from --subject-max-cpus and the core count
    #[clap(long, default_value_t = 0, help_heading = "CPU Placement")]
    pub loadgen_max_cpus: usize,

    /// Pin the subject and the load generator to disjoint cores with taskset
    #[clap(long, default_value_t = false, help_heading = "CPU Placement")]
    pub enable_cpu_affinity: bool,

    /// Environment variable that carries the subject's CPU cap (empty to disable)
    #[clap(long, default_value = "GOMAXPROCS", help_heading = "CPU Placement")]
    pub concurrency_env_var: String,

    /// Duration of each trial in seconds
    #[clap(long, default_value_t = crate::defaults::TEST_DURATION_SECS)]
    pub test_duration_secs: u64,

    /// Pause after each trial in seconds
    #[clap(long, default_value_t = crate::defaults::COOL_DOWN_SECS)]
    pub sleep_between_runs_secs: u64,

    /// Request rate ceiling passed to the load generator. Must be unreachable
    #[clap(long, default_value_t = crate::defaults::STRESS_RPS)]
    pub stress_rps: u64,

    /// Readiness probes (100 ms apart) before load is applied anyway
    #[clap(long, default_value_t = crate::defaults::READINESS_RETRIES)]
    pub readiness_retries: u32,

    /// Subject server binary
    #[clap(long, default_value = "gowebbenchmark", help_heading = "External Tools")]
    pub server_bin_name: PathBuf,

    /// Load generator binary, resolved on PATH
    #[clap(long, default_value = "wrk", help_heading = "External Tools")]
    pub loadgen_bin_name: String,

    /// Lua helper that makes the load generator pipeline requests
    #[clap(long, default_value = "pipeline.lua", help_heading = "External Tools")]
    pub pipeline_script: PathBuf,

    /// Request path the pipelining helper issues
    #[clap(long, default_value = "/hello", help_heading = "External Tools")]
    pub pipeline_request_path: String,

    /// Endpoint the subject listens on
    #[clap(long, default_value = "http://127.0.0.1:8080")]
    pub endpoint: String,

    /// Output file for results (JSON format)
    #[clap(short = 'o', long, default_value = crate::defaults::OUTPUT_FILE)]
    pub output_file: PathBuf,

    /// Also write logs to this file
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Verbose output; also forwards the subject's own output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,

    /// Extra arguments passed verbatim to the load generator (after --)
    #[clap(last = true)]
    pub extra_loadgen_args: Vec<String>,
}

/// Validated settings derived from [`Args`].
#[derive(Clone, Debug)]
pub struct SweepConfiguration {
    pub frameworks: Vec<String>,
    pub connections: Vec<u32>,
    pub processing_times: Vec<ProcessingTime>,
    pub pipelines: Vec<u32>,
    pub pipelining_enabled: bool,
    pub test_duration: Duration,
    pub cool_down: Duration,
    pub endpoint: Endpoint,
}

impl SweepConfiguration {
    /// Check the arguments and normalise the sweep dimensions.
    pub fn from_args(args: &Args) -> Result<Self> {
        let frameworks: Vec<String> = args
            .test_frameworks
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        if frameworks.is_empty() {
            bail!("At least one framework must be given");
        }
        if let Some(clash) = frameworks.iter().find(|f| RESERVED_KEYS.contains(&f.as_str())) {
            bail!("Framework name '{}' collides with a reserved result key", clash);
        }

        if args.wrk_connections.is_empty() || args.wrk_connections.contains(&0) {
            bail!("Connection counts must be a non-empty list of positive integers");
        }
        if args.processing_time_ms.is_empty() {
            bail!("At least one processing time must be given");
        }
        if let Some(bad) = args.processing_time_ms.iter().find(|&&ms| ms < -1) {
            bail!("Processing time {} is invalid (use -1 for CPU-bound mode)", bad);
        }

        let pipelines = if args.disable_test_pipeline {
            vec![1]
        } else {
            if args.pipeline_sizes.is_empty() || args.pipeline_sizes.contains(&0) {
                bail!("Pipeline sizes must be a non-empty list of positive integers");
            }
            args.pipeline_sizes.clone()
        };

        if args.test_duration_secs == 0 {
            bail!("Test duration must be at least one second");
        }

        let endpoint = args
            .endpoint
            .parse::<Endpoint>()
            .context("Invalid --endpoint")?;

        Ok(Self {
            frameworks,
            connections: args.wrk_connections.clone(),
            processing_times: args
                .processing_time_ms
                .iter()
                .copied()
                .map(ProcessingTime)
                .collect(),
            pipelines,
            pipelining_enabled: !args.disable_test_pipeline,
            test_duration: Duration::from_secs(args.test_duration_secs),
            cool_down: Duration::from_secs(args.sleep_between_runs_secs),
            endpoint,
        })
    }
}
