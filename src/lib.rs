//! # Web Framework Sweep Library
//!
//! Orchestrates HTTP load-test sweeps against a subject server binary using
//! an external wrk2-style load generator. Every combination of framework,
//! connection count, mocked processing time and pipeline depth is run as a
//! separate trial, and the latency histograms and throughput of all trials
//! are collected into one nested result tree.
//!
//! ## Architecture Overview
//!
//! The library is organized as a one-directional pipeline:
//!
//! - `capability`: required utility lookup and NUMA detection
//! - `cpu`: splitting cores between the subject and the load generator
//! - `readiness`: polling the subject until it answers HTTP
//! - `trial`: launching, probing and tearing down the two processes of a trial
//! - `report`: parsing the load generator's text report
//! - `sweep`: enumerating the test matrix and sequencing trials
//! - `results`: the typed result tree and its JSON persistence
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use std::time::Duration;
//! use web_framework_sweep::{
//!     cpu, results::{SweepResults, SystemInfo}, sweep::{run_sweep, SweepPlan},
//!     trial::{LaunchConfig, ProcessingTime, TrialRunner},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cores = cpu::usable_core_ids();
//!     let allocation = cpu::plan_on_cores(&cores, 0, 0, false)?;
//!     let runner = TrialRunner::new(LaunchConfig {
//!         subject_program: PathBuf::from("./gowebbenchmark"),
//!         subject_env: Vec::new(),
//!         inherit_subject_output: false,
//!         loadgen_program: PathBuf::from("/usr/local/bin/wrk"),
//!         affinity_program: PathBuf::from("taskset"),
//!         allocation: allocation.clone(),
//!         endpoint: "http://127.0.0.1:8080".parse()?,
//!         duration: Duration::from_secs(30),
//!         max_rps: 5_000_000,
//!         pipeline: None,
//!         extra_loadgen_args: Vec::new(),
//!         readiness_retries: 10,
//!     })?;
//!     let plan = SweepPlan {
//!         frameworks: vec!["gin".into()],
//!         connections: vec![100],
//!         processing_times: vec![ProcessingTime(0)],
//!         pipelines: vec![1],
//!         cool_down: Duration::from_secs(15),
//!         loadgen_threads: allocation.loadgen_threads(),
//!     };
//!     let results = SweepResults::new(SystemInfo::collect(cores.len(), false), allocation);
//!     let results = run_sweep(&plan, &runner, results).await?;
//!     println!("{} trials", results.leaf_count());
//!     Ok(())
//! }
//! ```

/// Required utility lookup on `PATH` and NUMA topology detection
pub mod capability;

/// Command-line interface and configuration validation
pub mod cli;

/// CPU split between the subject and the load generator
pub mod cpu;

/// Typed `http://host:port/path` endpoint
pub mod endpoint;

pub mod error;

/// Colourised console output for tracing
pub mod logging;

/// HTTP readiness polling of the subject process
pub mod readiness;

/// Load generator report parsing
///
/// Extracts the corrected and uncorrected latency histograms and the
/// achieved throughput from wrk2 output.
pub mod report;

/// Typed result tree, host information and JSON persistence
pub mod results;

/// Test-matrix enumeration and trial sequencing
pub mod sweep;

/// Per-trial process lifecycle
///
/// Spawns the subject (optionally CPU-pinned), waits for readiness, runs
/// the load generator to completion, and terminates the subject.
pub mod trial;

pub mod utils;

pub use cli::{Args, SweepConfiguration};
pub use cpu::CpuAllocation;
pub use endpoint::Endpoint;
pub use error::{SweepError, SweepResult};
pub use report::{LatencyHistogram, ReportParser, TrialResult};
pub use results::{ResultsManager, SweepResults};
pub use sweep::{run_sweep, SweepPlan};
pub use trial::{LaunchConfig, ProcessingTime, TrialExecutor, TrialParameters, TrialRunner};

/// The current version of the sweep tool, recorded in every result file.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Frameworks the stock subject binary knows how to serve.
    pub const FRAMEWORKS: &str = "default,atreugo,beego,bone,chi,denco,echov3,fasthttp-rawfasthttp-routing,fasthttp/router,fasthttprouter,fastrouter,fiber,fresh,gear,gin,goji,gojsonrest,gongular,gorestful,gorilla,gorouter,gorouterfasthttp,go-ozzo,gowww,gramework,httprouterhttptreemux,lars,lion,martini,muxie,negroni,neo,pat,pure,r2router,tango,tiger,tinyrouter,traffic,violetear,vulcan,webgo";

    /// [`FRAMEWORKS`] as a list.
    pub fn frameworks() -> Vec<String> {
        FRAMEWORKS.split(',').map(str::to_string).collect()
    }

    /// Length of each trial. Long enough for wrk2's calibration phase to
    /// settle and leave a meaningful measurement window.
    pub const TEST_DURATION_SECS: u64 = 30;

    /// Pause after each trial so TIME_WAIT sockets and ephemeral ports from
    /// the previous trial are released.
    pub const COOL_DOWN_SECS: u64 = 15;

    /// Target rate handed to wrk2. Deliberately far above what any
    /// framework achieves so the measurement finds the saturation point.
    pub const STRESS_RPS: u64 = 5_000_000;

    /// Readiness probes before load is applied regardless.
    pub const READINESS_RETRIES: u32 = 10;

    pub const OUTPUT_FILE: &str = "results.json";
}
