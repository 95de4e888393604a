//! # Capability Checker
//!
//! Verifies that the external utilities the sweep shells out to can be
//! found on the executable search path, and reports whether the host has a
//! multi-node NUMA layout.
//!
//! The NUMA probe is informational only. When `numactl` is missing or its
//! output is unexpected the host is treated as single-node, which matches
//! how the warning is used: a hint to the operator, never a reason to stop.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

use crate::error::{SweepError, SweepResult};

/// Name of the NUMA topology utility.
pub const NUMA_UTILITY: &str = "numactl";

/// Name of the CPU pinning wrapper.
pub const AFFINITY_UTILITY: &str = "taskset";

/// Resolve `program` against the `PATH` environment variable.
///
/// Returns the first candidate that exists and is a regular file. On unix
/// the candidate must also carry at least one execute bit.
pub fn which(program: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    which_in(program, &paths)
}

/// Resolve `program` against an explicit search path.
pub fn which_in(program: &str, search_path: &OsStr) -> Option<PathBuf> {
    env::split_paths(search_path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Check that every name in `required` resolves on `PATH`.
///
/// Every name is checked (not just up to the first miss) so the diagnostic
/// lists everything the operator needs to install.
pub fn check<S: AsRef<str>>(required: &[S]) -> bool {
    missing_utilities(required).is_empty()
}

/// Names from `required` that do not resolve on `PATH`.
pub fn missing_utilities<S: AsRef<str>>(required: &[S]) -> Vec<String> {
    let mut missing = Vec::new();
    for name in required {
        let name = name.as_ref();
        match which(name) {
            Some(path) => debug!("Found {} at {}", name, path.display()),
            None => {
                warn!("Cannot locate {} in PATH", name);
                missing.push(name.to_string());
            }
        }
    }
    missing
}

/// Like [`check`], but returns a typed error naming the missing utilities.
pub fn require<S: AsRef<str>>(required: &[S]) -> SweepResult<()> {
    let missing = missing_utilities(required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SweepError::MissingUtilities(missing))
    }
}

/// The utilities a sweep needs, given the load generator name and whether
/// CPU pinning is enabled.
pub fn required_utilities(loadgen: &str, affinity_enabled: bool) -> Vec<String> {
    let mut list = vec![NUMA_UTILITY.to_string(), loadgen.to_string()];
    if affinity_enabled {
        list.push(AFFINITY_UTILITY.to_string());
    }
    list
}

/// Returns true when `numactl --hardware` reports more than one node.
///
/// Any failure to run the utility or parse its output yields `false`.
pub fn numa_is_multi_node() -> bool {
    let output = match Command::new(NUMA_UTILITY).arg("--hardware").output() {
        Ok(output) => output,
        Err(e) => {
            debug!("Could not run {}: {}", NUMA_UTILITY, e);
            return false;
        }
    };
    let text = String::from_utf8_lossy(&output.stdout);
    parse_available_nodes(&text).map_or(false, |nodes| nodes > 1)
}

/// Extract the node count from the first `available:` line of
/// `numactl --hardware` output, e.g. `available: 2 nodes (0-1)`.
pub fn parse_available_nodes(output: &str) -> Option<u32> {
    output
        .lines()
        .find(|line| line.contains("available"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|count| count.parse().ok())
}
