//! # Trial Runner
//!
//! Runs one (framework, connections, processing time, pipeline) combination
//! end to end. A trial owns exactly two child processes:
//!
//! 1. **Subject**: `<server> <framework> <processing_time_ms>`, optionally
//!    wrapped in `taskset -c <cores>`. Failing to start it aborts the run.
//! 2. **Load generator**: wrk2-style invocation against the endpoint. Its
//!    stdout and stderr share one OS pipe so the report is captured as a
//!    single interleaved stream.
//!
//! Between the two the subject is probed for readiness. A probe that runs
//! out of retries is logged and the trial continues; the result carries a
//! `readiness_timed_out` marker so such leaves can be told apart later.
//!
//! After the report is parsed the subject receives SIGTERM and is reaped.
//! Problems during shutdown are logged and never discard the result.

use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::cpu::CpuAllocation;
use crate::endpoint::Endpoint;
use crate::error::{SweepError, SweepResult};
use crate::readiness::ReadinessProbe;
use crate::report::{ReportParser, TrialResult};
use crate::utils::format_core_list;

/// How long the subject gets to exit after SIGTERM before it is killed.
pub const TERMINATION_GRACE: Duration = Duration::from_secs(10);

/// Mocked per-request processing time handed to the subject.
///
/// Non-negative values are a sleep in milliseconds; [`ProcessingTime::CPU_BOUND`]
/// asks the subject to burn CPU instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessingTime(pub i64);

impl ProcessingTime {
    pub const CPU_BOUND: ProcessingTime = ProcessingTime(-1);

    pub fn millis(self) -> i64 {
        self.0
    }

    pub fn is_cpu_bound(self) -> bool {
        self == Self::CPU_BOUND
    }
}

impl fmt::Display for ProcessingTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything that varies from one trial to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialParameters {
    pub framework: String,
    pub processing_time: ProcessingTime,
    pub connections: u32,
    pub pipeline: u32,
    /// Load generator worker threads; never exceeds `connections`.
    pub threads: u32,
}

impl TrialParameters {
    /// Build the parameters for one leaf, clamping `planned_threads` to the
    /// connection count.
    pub fn new(
        framework: impl Into<String>,
        processing_time: ProcessingTime,
        connections: u32,
        pipeline: u32,
        planned_threads: u32,
    ) -> Self {
        Self {
            framework: framework.into(),
            processing_time,
            connections,
            pipeline,
            threads: derive_threads(planned_threads, connections),
        }
    }
}

/// A load generator cannot drive more worker threads than open connections.
pub fn derive_threads(planned_threads: u32, connections: u32) -> u32 {
    planned_threads.min(connections)
}

/// Helper script that makes the load generator pipeline requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineScript {
    pub script: PathBuf,
    /// Request path the script issues, e.g. `/hello`.
    pub request_path: String,
}

/// Environment that carries the subject's CPU cap, e.g. `GOMAXPROCS=4`.
///
/// Empty when `var` is empty or the cap is zero. The pair is handed to the
/// subject's command only; the orchestrator's own environment is untouched.
pub fn concurrency_env(var: &str, subject_max_procs: usize) -> Vec<(String, String)> {
    if var.is_empty() || subject_max_procs == 0 {
        Vec::new()
    } else {
        vec![(var.to_string(), subject_max_procs.to_string())]
    }
}

/// Launch settings shared by every trial of a sweep.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub subject_program: PathBuf,
    /// Extra environment for the subject only (e.g. `GOMAXPROCS`).
    pub subject_env: Vec<(String, String)>,
    /// Forward the subject's stdout/stderr to ours instead of discarding it.
    pub inherit_subject_output: bool,
    pub loadgen_program: PathBuf,
    /// CPU pinning wrapper; only consulted when the allocation has core lists.
    pub affinity_program: PathBuf,
    pub allocation: CpuAllocation,
    pub endpoint: Endpoint,
    pub duration: Duration,
    /// Target request rate; set high enough that it never limits the subject.
    pub max_rps: u64,
    /// `None` disables pipelining (no script, depth ignored).
    pub pipeline: Option<PipelineScript>,
    pub extra_loadgen_args: Vec<String>,
    pub readiness_retries: u32,
}

impl LaunchConfig {
    /// Full argv for the subject, including the pinning prefix if any.
    pub fn subject_argv(&self, params: &TrialParameters) -> Vec<OsString> {
        let argv = vec![
            self.subject_program.clone().into_os_string(),
            params.framework.clone().into(),
            params.processing_time.to_string().into(),
        ];
        self.pin(&self.allocation.subject_cpus, argv)
    }

    /// Full argv for the load generator, including the pinning prefix if any.
    pub fn loadgen_argv(&self, params: &TrialParameters) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec![
            self.loadgen_program.clone().into_os_string(),
            format!("-t{}", params.threads).into(),
            format!("-c{}", params.connections).into(),
            format!("-R{}", self.max_rps).into(),
            format!("-d{}s", self.duration.as_secs()).into(),
            "--u_latency".into(),
        ];
        argv.extend(self.extra_loadgen_args.iter().map(OsString::from));
        argv.push(self.endpoint.as_str().into());
        if let Some(pipeline) = &self.pipeline {
            argv.push("-s".into());
            argv.push(pipeline.script.clone().into_os_string());
            argv.push("--".into());
            argv.push(pipeline.request_path.clone().into());
            argv.push(params.pipeline.to_string().into());
        }
        self.pin(&self.allocation.loadgen_cpus, argv)
    }

    fn pin(&self, cpus: &[usize], argv: Vec<OsString>) -> Vec<OsString> {
        if cpus.is_empty() {
            return argv;
        }
        let mut pinned: Vec<OsString> = vec![
            self.affinity_program.clone().into_os_string(),
            "-c".into(),
            format_core_list(cpus, ",").into(),
        ];
        pinned.extend(argv);
        pinned
    }
}

/// Something that can execute a single trial.
///
/// `Ok(None)` is a trial that ran but produced nothing usable; it is
/// recorded as-is. `Err` aborts the sweep.
#[async_trait]
pub trait TrialExecutor {
    async fn run_trial(&self, params: &TrialParameters) -> SweepResult<Option<TrialResult>>;
}

/// Executes trials by spawning the real subject and load generator.
pub struct TrialRunner {
    config: LaunchConfig,
    probe: ReadinessProbe,
    parser: ReportParser,
}

impl TrialRunner {
    pub fn new(config: LaunchConfig) -> SweepResult<Self> {
        let probe = ReadinessProbe::new(config.endpoint.clone(), config.readiness_retries)?;
        let parser = ReportParser::new()?;
        Ok(Self {
            config,
            probe,
            parser,
        })
    }

    fn spawn_subject(&self, params: &TrialParameters) -> SweepResult<Child> {
        let argv = self.config.subject_argv(params);
        debug!("Spawning subject: {:?}", argv);

        let mut cmd = command_from_argv(&argv);
        cmd.stdin(Stdio::null());
        if self.config.inherit_subject_output {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        cmd.envs(self.config.subject_env.iter().map(|(k, v)| (k, v)));
        // A trial abandoned half-way must not leave a server holding the port.
        cmd.kill_on_drop(true);

        cmd.spawn().map_err(|source| SweepError::SubjectLaunch {
            program: PathBuf::from(&argv[0]),
            source,
        })
    }

    /// Run the load generator to completion and return its combined output.
    async fn run_load_generator(&self, params: &TrialParameters) -> SweepResult<String> {
        let argv = self.config.loadgen_argv(params);
        debug!("Spawning load generator: {:?}", argv);

        let (mut reader, writer) = os_pipe::pipe().map_err(SweepError::OutputCapture)?;
        let writer_clone = writer.try_clone().map_err(SweepError::OutputCapture)?;

        let mut cmd = command_from_argv(&argv);
        cmd.stdin(Stdio::null()).stdout(writer).stderr(writer_clone);
        let mut child = cmd
            .spawn()
            .map_err(|source| SweepError::LoadGeneratorLaunch {
                program: PathBuf::from(&argv[0]),
                source,
            })?;
        // The command still holds our copies of the write end; EOF only
        // arrives once they are closed.
        drop(cmd);

        let output = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        })
        .await
        .map_err(|e| SweepError::OutputCapture(io::Error::new(io::ErrorKind::Other, e)))?
        .map_err(SweepError::OutputCapture)?;

        match child.wait().await {
            Ok(status) if status.success() => debug!("Load generator exited cleanly"),
            Ok(status) => warn!("Load generator exited with {}", status),
            Err(e) => warn!("Failed to reap load generator: {}", e),
        }
        Ok(output)
    }
}

#[async_trait]
impl TrialExecutor for TrialRunner {
    async fn run_trial(&self, params: &TrialParameters) -> SweepResult<Option<TrialResult>> {
        debug!(
            "Testing {} with processing time {} ms, {} connections, pipeline {}",
            params.framework, params.processing_time, params.connections, params.pipeline
        );

        let mut subject = self.spawn_subject(params)?;

        debug!("Waiting for {} to be ready...", params.framework);
        let readiness = self.probe.wait().await;
        if readiness.ready {
            debug!("Ready to benchmark after {} attempt(s)", readiness.attempts);
        } else {
            warn!(
                "{} did not answer {} after {} attempts; applying load anyway",
                params.framework, self.config.endpoint, readiness.attempts
            );
        }

        let result = match self.run_load_generator(params).await {
            Ok(output) => {
                let mut parsed = self.parser.parse(&output);
                parsed.readiness_timed_out = !readiness.ready;
                if parsed.rps.is_none() {
                    warn!("No throughput line found in load generator output");
                    debug!("Load generator output:\n{}", output);
                }
                Some(parsed)
            }
            Err(e) => {
                error!("Trial for {} produced no result: {}", params.framework, e);
                None
            }
        };

        terminate(&mut subject, &params.framework).await;
        Ok(result)
    }
}

fn command_from_argv(argv: &[OsString]) -> Command {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    cmd
}

/// Ask the subject to stop and reap it. Never fails; problems are logged.
async fn terminate(child: &mut Child, framework: &str) {
    debug!("Terminating {} process", framework);
    if let Err(e) = send_terminate(child) {
        warn!("Could not signal {} process: {}", framework, e);
    }

    match timeout(TERMINATION_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!("{} process exited ({})", framework, status),
        Ok(Err(e)) => warn!("Error while waiting for {} process to end: {}", framework, e),
        Err(_) => {
            info!(
                "{} ignored SIGTERM for {:?}; killing it",
                framework, TERMINATION_GRACE
            );
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {} process: {}", framework, e);
            }
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = child
        .id()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "process already reaped"))?;
    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
