//! # Sweep Controller
//!
//! Walks the Cartesian product of frameworks × connection counts ×
//! processing times × pipeline depths, in that nesting order with pipeline
//! depth innermost, and runs one trial per combination.
//!
//! Trials are strictly sequential. After every trial, the last one
//! included, the controller sleeps for the cool-down period so sockets in
//! TIME_WAIT and similar kernel state from the previous trial can drain.
//!
//! There are no retries at this level: whatever a trial returns, including
//! a result without throughput or no result at all, is recorded as-is.

use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

use crate::error::SweepResult;
use crate::results::{SweepResults, TrialKey};
use crate::trial::{ProcessingTime, TrialExecutor, TrialParameters};
use crate::utils::{create_progress_indicator, format_latency_ms, format_rps};

/// Width of the progress bar in the per-trial summary line.
const PROGRESS_WIDTH: usize = 20;

/// The dimensions of a sweep and the pacing between trials.
#[derive(Debug, Clone)]
pub struct SweepPlan {
    pub frameworks: Vec<String>,
    pub connections: Vec<u32>,
    pub processing_times: Vec<ProcessingTime>,
    pub pipelines: Vec<u32>,
    pub cool_down: Duration,
    /// Load generator threads before the per-trial clamp.
    pub loadgen_threads: u32,
}

impl SweepPlan {
    pub fn total_trials(&self) -> usize {
        self.frameworks.len()
            * self.connections.len()
            * self.processing_times.len()
            * self.pipelines.len()
    }

    /// Wall-clock estimate: every trial runs for `trial_duration` and is
    /// followed by one cool-down.
    pub fn estimated_duration(&self, trial_duration: Duration) -> Duration {
        let per_trial = trial_duration + self.cool_down;
        per_trial * u32::try_from(self.total_trials()).unwrap_or(u32::MAX)
    }

    /// Every trial of the sweep, in execution order.
    pub fn trials(&self) -> impl Iterator<Item = TrialParameters> + '_ {
        self.frameworks.iter().flat_map(move |framework| {
            self.connections.iter().flat_map(move |&connections| {
                self.processing_times.iter().flat_map(move |&processing_time| {
                    self.pipelines.iter().map(move |&pipeline| {
                        TrialParameters::new(
                            framework.as_str(),
                            processing_time,
                            connections,
                            pipeline,
                            self.loadgen_threads,
                        )
                    })
                })
            })
        })
    }
}

/// Run every trial of `plan` through `executor`, filling `results`.
///
/// `results` normally arrives with only its static fields set. An error
/// from the executor aborts the sweep and is returned as-is.
pub async fn run_sweep<E>(
    plan: &SweepPlan,
    executor: &E,
    mut results: SweepResults,
) -> SweepResult<SweepResults>
where
    E: TrialExecutor + ?Sized,
{
    let total = plan.total_trials();

    for (index, params) in plan.trials().enumerate() {
        if params.threads < plan.loadgen_threads {
            info!(
                "Setting threads to {}, given that number of connections ({}) must be >= threads ({})",
                params.threads, params.connections, plan.loadgen_threads
            );
        }

        let result = executor.run_trial(&params).await?;

        let q50 = result.as_ref().and_then(|r| r.uncorrected.median());
        let rps = result.as_ref().and_then(|r| r.rps);
        info!(
            "[{}] {}/{} Framework {}, connections {}, mocked processing time {} ms, pipeline {}. RPS {}. q50 {}",
            create_progress_indicator(index + 1, total, PROGRESS_WIDTH),
            index + 1,
            total,
            params.framework,
            params.connections,
            params.processing_time,
            params.pipeline,
            format_rps(rps),
            format_latency_ms(q50),
        );

        let key = TrialKey {
            framework: params.framework,
            connections: params.connections,
            processing_time: params.processing_time,
            pipeline: params.pipeline,
        };
        results.insert(&key, result);

        sleep(plan.cool_down).await;
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu;
    use crate::error::SweepError;
    use crate::report::TrialResult;
    use crate::results::SystemInfo;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Instant;

    /// Records every trial and answers with a canned result.
    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<TrialParameters>>,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl TrialExecutor for RecordingExecutor {
        async fn run_trial(
            &self,
            params: &TrialParameters,
        ) -> SweepResult<Option<TrialResult>> {
            let mut calls = self.calls.lock();
            calls.push(params.clone());
            if self.fail_on == Some(calls.len()) {
                return Err(SweepError::OutputCapture(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "boom",
                )));
            }
            // Pipeline depth 2 stands in for a trial that produced nothing.
            if params.pipeline == 2 {
                return Ok(None);
            }
            Ok(Some(TrialResult {
                rps: Some(f64::from(params.connections)),
                ..Default::default()
            }))
        }
    }

    fn plan(frameworks: &[&str], connections: &[u32], times: &[i64], pipelines: &[u32]) -> SweepPlan {
        SweepPlan {
            frameworks: frameworks.iter().map(|s| s.to_string()).collect(),
            connections: connections.to_vec(),
            processing_times: times.iter().copied().map(ProcessingTime).collect(),
            pipelines: pipelines.to_vec(),
            cool_down: Duration::ZERO,
            loadgen_threads: 4,
        }
    }

    fn empty_results() -> SweepResults {
        SweepResults::new(SystemInfo::collect(8, false), cpu::plan(8, 0, 0, false).unwrap())
    }

    #[tokio::test]
    async fn test_single_leaf_sweep() {
        let executor = RecordingExecutor::default();
        let plan = plan(&["gin"], &[50], &[0], &[1]);

        let results = run_sweep(&plan, &executor, empty_results()).await.unwrap();

        assert_eq!(executor.calls.lock().len(), 1);
        assert_eq!(results.leaf_count(), 1);
        let (key, leaf) = results.leaves().next().unwrap();
        assert_eq!(key.path(), "gin/connections-50/mocked-processing-time-0-ms/pipeline-1");
        assert_eq!(leaf.and_then(|r| r.rps), Some(50.0));
    }

    #[tokio::test]
    async fn test_enumeration_order_is_fixed() {
        let executor = RecordingExecutor::default();
        let plan = plan(&["a", "b"], &[1, 100], &[0, -1], &[1, 5]);
        assert_eq!(plan.total_trials(), 16);

        let results = run_sweep(&plan, &executor, empty_results()).await.unwrap();

        let calls = executor.calls.lock();
        assert_eq!(calls.len(), 16);
        let order: Vec<(String, u32, i64, u32)> = calls
            .iter()
            .map(|p| (p.framework.clone(), p.connections, p.processing_time.0, p.pipeline))
            .collect();
        assert_eq!(order[0], ("a".to_string(), 1, 0, 1));
        assert_eq!(order[1], ("a".to_string(), 1, 0, 5));
        assert_eq!(order[2], ("a".to_string(), 1, -1, 1));
        assert_eq!(order[4], ("a".to_string(), 100, 0, 1));
        assert_eq!(order[8], ("b".to_string(), 1, 0, 1));
        assert_eq!(order[15], ("b".to_string(), 100, -1, 5));

        let recorded: Vec<String> = results.leaves().map(|(k, _)| k.path()).collect();
        let expected: Vec<String> = calls
            .iter()
            .map(|p| {
                TrialKey {
                    framework: p.framework.clone(),
                    connections: p.connections,
                    processing_time: p.processing_time,
                    pipeline: p.pipeline,
                }
                .path()
            })
            .collect();
        assert_eq!(recorded, expected);
    }

    #[tokio::test]
    async fn test_threads_clamped_per_trial() {
        let executor = RecordingExecutor::default();
        let plan = plan(&["gin"], &[1, 2, 100], &[0], &[1]);
        run_sweep(&plan, &executor, empty_results()).await.unwrap();

        let threads: Vec<u32> = executor.calls.lock().iter().map(|p| p.threads).collect();
        assert_eq!(threads, vec![1, 2, 4]);
    }

    #[tokio::test]
    async fn test_empty_results_recorded_without_retry() {
        let executor = RecordingExecutor::default();
        let plan = plan(&["gin"], &[10], &[0], &[1, 2]);
        let results = run_sweep(&plan, &executor, empty_results()).await.unwrap();

        assert_eq!(executor.calls.lock().len(), 2);
        let key = TrialKey {
            framework: "gin".into(),
            connections: 10,
            processing_time: ProcessingTime(0),
            pipeline: 2,
        };
        assert_eq!(results.get(&key), Some(None));
    }

    #[tokio::test]
    async fn test_executor_error_aborts_sweep() {
        let executor = RecordingExecutor {
            fail_on: Some(2),
            ..Default::default()
        };
        let plan = plan(&["gin"], &[1, 10, 100], &[0], &[1]);
        let outcome = run_sweep(&plan, &executor, empty_results()).await;

        assert!(outcome.is_err());
        assert_eq!(executor.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_cool_down_after_every_trial() {
        let executor = RecordingExecutor::default();
        let mut plan = plan(&["gin"], &[1], &[0], &[1, 5, 10]);
        plan.cool_down = Duration::from_millis(30);

        let start = Instant::now();
        run_sweep(&plan, &executor, empty_results()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_estimated_duration() {
        let mut plan = plan(&["a", "b"], &[1, 100], &[0], &[1]);
        plan.cool_down = Duration::from_secs(15);
        assert_eq!(
            plan.estimated_duration(Duration::from_secs(30)),
            Duration::from_secs(4 * 45)
        );
    }
}
