//! # Sweep Result Tree
//!
//! The single artifact a sweep produces. Leaves are addressed by four typed
//! dimension values instead of free-form string keys; the string forms
//! (`connections-N`, `mocked-processing-time-N-ms`, `pipeline-N`) only
//! appear at serialisation time.
//!
//! Every level is an ordered vector, so the JSON output preserves the
//! order in which the sweep visited the combinations.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cpu::CpuAllocation;
use crate::report::TrialResult;
use crate::trial::ProcessingTime;

/// Top-level keys that sit beside the framework entries.
pub const RESERVED_KEYS: [&str; 5] = [
    "machine_info",
    "loadgen_max_procs",
    "loadgen_cpus_list",
    "subject_max_procs",
    "subject_cpus_list",
];

/// Host description recorded for reproducibility.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub logical_cores: usize,
    pub physical_cores: usize,
    pub usable_cores: usize,
    pub cpu_model: Option<String>,
    pub numa_multi_node: bool,
    pub tool_version: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
}

impl SystemInfo {
    /// Collect information about the current host.
    pub fn collect(usable_cores: usize, numa_multi_node: bool) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            logical_cores: num_cpus::get(),
            physical_cores: num_cpus::get_physical(),
            usable_cores,
            cpu_model: read_cpu_model(),
            numa_multi_node,
            tool_version: crate::VERSION.to_string(),
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
        }
    }
}

fn read_cpu_model() -> Option<String> {
    let cpuinfo = fs::read_to_string("/proc/cpuinfo").ok()?;
    parse_cpu_model(&cpuinfo)
}

/// First `model name` entry of `/proc/cpuinfo`.
fn parse_cpu_model(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "model name")
        .map(|(_, value)| value.trim().to_string())
}

/// Address of one leaf in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialKey {
    pub framework: String,
    pub connections: u32,
    pub processing_time: ProcessingTime,
    pub pipeline: u32,
}

impl TrialKey {
    /// `framework/connections-N/mocked-processing-time-N-ms/pipeline-N`
    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.framework,
            connections_key(self.connections),
            processing_time_key(self.processing_time),
            pipeline_key(self.pipeline)
        )
    }
}

pub fn connections_key(connections: u32) -> String {
    format!("connections-{}", connections)
}

pub fn processing_time_key(processing_time: ProcessingTime) -> String {
    format!("mocked-processing-time-{}-ms", processing_time)
}

pub fn pipeline_key(pipeline: u32) -> String {
    format!("pipeline-{}", pipeline)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub pipeline: u32,
    /// `None` when the trial ran but yielded nothing usable.
    pub result: Option<TrialResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingTimeResults {
    pub processing_time: ProcessingTime,
    pub pipelines: Vec<PipelineResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionResults {
    pub connections: u32,
    pub processing_times: Vec<ProcessingTimeResults>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameworkResults {
    pub framework: String,
    pub connections: Vec<ConnectionResults>,
}

/// Find the child matching `is_key` or append the one `make` builds.
fn entry<T>(nodes: &mut Vec<T>, is_key: impl Fn(&T) -> bool, make: impl FnOnce() -> T) -> &mut T {
    match nodes.iter().position(is_key) {
        Some(idx) => &mut nodes[idx],
        None => {
            nodes.push(make());
            let last = nodes.len() - 1;
            &mut nodes[last]
        }
    }
}

/// The whole sweep: static host/allocation fields plus the nested leaves.
#[derive(Debug, Clone)]
pub struct SweepResults {
    pub machine_info: SystemInfo,
    pub allocation: CpuAllocation,
    pub frameworks: Vec<FrameworkResults>,
}

impl SweepResults {
    pub fn new(machine_info: SystemInfo, allocation: CpuAllocation) -> Self {
        Self {
            machine_info,
            allocation,
            frameworks: Vec::new(),
        }
    }

    /// Store a leaf, creating intermediate levels as needed. An existing
    /// leaf at the same key is replaced.
    pub fn insert(&mut self, key: &TrialKey, result: Option<TrialResult>) {
        let framework = entry(
            &mut self.frameworks,
            |f: &FrameworkResults| f.framework == key.framework,
            || FrameworkResults {
                framework: key.framework.clone(),
                connections: Vec::new(),
            },
        );
        let connections = entry(
            &mut framework.connections,
            |c: &ConnectionResults| c.connections == key.connections,
            || ConnectionResults {
                connections: key.connections,
                processing_times: Vec::new(),
            },
        );
        let processing = entry(
            &mut connections.processing_times,
            |p: &ProcessingTimeResults| p.processing_time == key.processing_time,
            || ProcessingTimeResults {
                processing_time: key.processing_time,
                pipelines: Vec::new(),
            },
        );
        let leaf = entry(
            &mut processing.pipelines,
            |p: &PipelineResult| p.pipeline == key.pipeline,
            || PipelineResult {
                pipeline: key.pipeline,
                result: None,
            },
        );
        leaf.result = result;
    }

    /// Look up a leaf. The outer `Option` is "no such leaf", the inner one
    /// is a leaf recorded without a result.
    pub fn get(&self, key: &TrialKey) -> Option<Option<&TrialResult>> {
        self.frameworks
            .iter()
            .find(|f| f.framework == key.framework)?
            .connections
            .iter()
            .find(|c| c.connections == key.connections)?
            .processing_times
            .iter()
            .find(|p| p.processing_time == key.processing_time)?
            .pipelines
            .iter()
            .find(|p| p.pipeline == key.pipeline)
            .map(|leaf| leaf.result.as_ref())
    }

    /// Number of leaves recorded so far.
    pub fn leaf_count(&self) -> usize {
        self.leaves().count()
    }

    /// Every leaf in sweep order.
    pub fn leaves(&self) -> impl Iterator<Item = (TrialKey, Option<&TrialResult>)> + '_ {
        self.frameworks.iter().flat_map(|f| {
            f.connections.iter().flat_map(move |c| {
                c.processing_times.iter().flat_map(move |p| {
                    p.pipelines.iter().map(move |leaf| {
                        (
                            TrialKey {
                                framework: f.framework.clone(),
                                connections: c.connections,
                                processing_time: p.processing_time,
                                pipeline: leaf.pipeline,
                            },
                            leaf.result.as_ref(),
                        )
                    })
                })
            })
        })
    }
}

impl Serialize for PipelineResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.result.serialize(serializer)
    }
}

impl Serialize for ProcessingTimeResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.pipelines.len()))?;
        for leaf in &self.pipelines {
            map.serialize_entry(&pipeline_key(leaf.pipeline), leaf)?;
        }
        map.end()
    }
}

impl Serialize for ConnectionResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.processing_times.len()))?;
        for node in &self.processing_times {
            map.serialize_entry(&processing_time_key(node.processing_time), node)?;
        }
        map.end()
    }
}

impl Serialize for FrameworkResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.connections.len()))?;
        for node in &self.connections {
            map.serialize_entry(&connections_key(node.connections), node)?;
        }
        map.end()
    }
}

impl Serialize for SweepResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(RESERVED_KEYS.len() + self.frameworks.len()))?;
        map.serialize_entry("machine_info", &self.machine_info)?;
        map.serialize_entry("loadgen_max_procs", &self.allocation.loadgen_max_procs)?;
        map.serialize_entry("loadgen_cpus_list", &self.allocation.loadgen_cpus)?;
        map.serialize_entry("subject_max_procs", &self.allocation.subject_max_procs)?;
        map.serialize_entry("subject_cpus_list", &self.allocation.subject_cpus)?;
        for framework in &self.frameworks {
            map.serialize_entry(&framework.framework, framework)?;
        }
        map.end()
    }
}

/// Writes the finished tree to disk.
pub struct ResultsManager {
    output_file: PathBuf,
}

impl ResultsManager {
    pub fn new(output_file: &Path) -> Self {
        Self {
            output_file: output_file.to_path_buf(),
        }
    }

    /// Serialise `results` as pretty JSON, creating parent directories.
    pub fn write(&self, results: &SweepResults) -> Result<()> {
        if let Some(parent) = self.output_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }

        let json = serde_json::to_string_pretty(results)?;
        fs::write(&self.output_file, json)
            .with_context(|| format!("Failed to write results to {:?}", self.output_file))?;

        info!(
            "Results for {} trials written to: {:?}",
            results.leaf_count(),
            self.output_file
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu;

    fn sample_info() -> SystemInfo {
        SystemInfo::collect(4, false)
    }

    fn key(framework: &str, connections: u32, ms: i64, pipeline: u32) -> TrialKey {
        TrialKey {
            framework: framework.to_string(),
            connections,
            processing_time: ProcessingTime(ms),
            pipeline,
        }
    }

    fn trial(rps: f64) -> TrialResult {
        let mut result = TrialResult {
            rps: Some(rps),
            ..Default::default()
        };
        result.uncorrected.insert(0.5, 1.5);
        result
    }

    #[test]
    fn test_parse_cpu_model() {
        let text = "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz\n";
        assert_eq!(
            parse_cpu_model(text).as_deref(),
            Some("Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz")
        );
        assert_eq!(parse_cpu_model("processor : 0\n"), None);
    }

    #[test]
    fn test_trial_key_path() {
        assert_eq!(
            key("gin", 50, -1, 5).path(),
            "gin/connections-50/mocked-processing-time--1-ms/pipeline-5"
        );
    }

    #[test]
    fn test_insert_preserves_order_and_get() {
        let mut results = SweepResults::new(sample_info(), cpu::plan(4, 0, 0, false).unwrap());
        results.insert(&key("gin", 100, 0, 1), Some(trial(10.0)));
        results.insert(&key("gin", 100, 0, 5), None);
        results.insert(&key("gin", 1, 0, 1), Some(trial(20.0)));
        results.insert(&key("chi", 100, 0, 1), Some(trial(30.0)));

        assert_eq!(results.leaf_count(), 4);
        let order: Vec<String> = results.leaves().map(|(k, _)| k.path()).collect();
        assert_eq!(
            order,
            vec![
                "gin/connections-100/mocked-processing-time-0-ms/pipeline-1",
                "gin/connections-100/mocked-processing-time-0-ms/pipeline-5",
                "gin/connections-1/mocked-processing-time-0-ms/pipeline-1",
                "chi/connections-100/mocked-processing-time-0-ms/pipeline-1",
            ]
        );

        assert_eq!(
            results.get(&key("chi", 100, 0, 1)).flatten().and_then(|r| r.rps),
            Some(30.0)
        );
        assert_eq!(results.get(&key("gin", 100, 0, 5)), Some(None));
        assert_eq!(results.get(&key("gin", 500, 0, 1)), None);
    }

    #[test]
    fn test_serialized_shape() {
        let alloc = cpu::plan(4, 0, 0, true).unwrap();
        let mut results = SweepResults::new(sample_info(), alloc);
        results.insert(&key("gin", 50, 0, 1), Some(trial(4321.5)));
        results.insert(&key("gin", 50, 0, 10), None);

        let value = serde_json::to_value(&results).unwrap();
        assert_eq!(value["subject_cpus_list"], serde_json::json!([0, 1]));
        assert_eq!(value["loadgen_cpus_list"], serde_json::json!([2, 3]));
        assert_eq!(value["loadgen_max_procs"], 2);
        assert_eq!(value["machine_info"]["usable_cores"], 4);

        let leaf = &value["gin"]["connections-50"]["mocked-processing-time-0-ms"]["pipeline-1"];
        assert_eq!(leaf["rps"], 4321.5);
        assert_eq!(leaf["uncorrected"]["0.5"], 1.5);
        assert_eq!(leaf["corrected"], serde_json::json!({}));
        assert_eq!(leaf["readiness_timed_out"], false);
        assert!(value["gin"]["connections-50"]["mocked-processing-time-0-ms"]["pipeline-10"].is_null());
    }

    #[test]
    fn test_results_manager_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("results.json");
        let mut results = SweepResults::new(sample_info(), cpu::plan(2, 0, 0, false).unwrap());
        results.insert(&key("fiber", 1, 10, 1), Some(trial(1.0)));

        let manager = ResultsManager::new(&path);
        manager.write(&results).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            written["fiber"]["connections-1"]["mocked-processing-time-10-ms"]["pipeline-1"]["rps"],
            1.0
        );
    }
}
