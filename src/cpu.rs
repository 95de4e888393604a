//! # CPU Allocation Planner
//!
//! Splits the host's usable cores into two disjoint, contiguous blocks: the
//! first for the subject server, the second for the load generator.
//!
//! ## Rules
//!
//! 1. Both caps unset (zero): the subject gets the floor half of the cores,
//!    the load generator gets the rest.
//! 2. Exactly one cap set: the other side gets whatever remains.
//! 3. Both caps set: both are honored, even when they leave cores idle.
//!
//! With affinity disabled the caps are honored as given and only reported;
//! the core lists are empty and nothing downstream pins processes. With
//! affinity enabled the blocks are cut from the actual core ids this process
//! may run on, so a sweep started inside a cpuset or under `taskset` only
//! pins to cores in its own mask.

use serde::Serialize;
use tracing::debug;

use crate::error::{SweepError, SweepResult};

/// A disjoint split of CPU indices between the subject and the load generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpuAllocation {
    /// Number of cores reserved for the subject process.
    pub subject_max_procs: usize,
    /// Number of cores reserved for the load generator.
    pub loadgen_max_procs: usize,
    /// Core indices the subject is pinned to. Empty when affinity is off.
    pub subject_cpus: Vec<usize>,
    /// Core indices the load generator is pinned to. Empty when affinity is off.
    pub loadgen_cpus: Vec<usize>,
}

impl CpuAllocation {
    /// Whether either side carries a core list to pin to.
    pub fn is_pinned(&self) -> bool {
        !self.subject_cpus.is_empty() || !self.loadgen_cpus.is_empty()
    }

    /// Total number of cores the benchmark uses across both roles.
    pub fn total_cores(&self) -> usize {
        self.subject_max_procs + self.loadgen_max_procs
    }

    /// Worker thread count the load generator should use before the
    /// per-trial clamp against the connection count. Never zero.
    pub fn loadgen_threads(&self) -> u32 {
        u32::try_from(self.loadgen_max_procs.max(1)).unwrap_or(u32::MAX)
    }
}

/// Compute the CPU split over cores `0..total_cores`.
///
/// `subject_cap` and `loadgen_cap` of zero mean "unset".
pub fn plan(
    total_cores: usize,
    subject_cap: usize,
    loadgen_cap: usize,
    affinity_enabled: bool,
) -> SweepResult<CpuAllocation> {
    let cores: Vec<usize> = (0..total_cores).collect();
    plan_on_cores(&cores, subject_cap, loadgen_cap, affinity_enabled)
}

/// Compute the CPU split over an explicit list of core ids.
///
/// Pinned blocks are taken in order from `cores`, so the subject gets the
/// first `subject` ids and the load generator the next `loadgen`. Fails
/// only when affinity is enabled and the caps do not fit in `cores`.
pub fn plan_on_cores(
    cores: &[usize],
    subject_cap: usize,
    loadgen_cap: usize,
    affinity_enabled: bool,
) -> SweepResult<CpuAllocation> {
    let total_cores = cores.len();
    let (subject, loadgen) = match (subject_cap, loadgen_cap) {
        (0, 0) => {
            let half = total_cores / 2;
            (half, total_cores - half)
        }
        (0, loadgen) => (total_cores.saturating_sub(loadgen), loadgen),
        (subject, 0) => (subject, total_cores.saturating_sub(subject)),
        (subject, loadgen) => (subject, loadgen),
    };

    let (subject_cpus, loadgen_cpus) = if affinity_enabled {
        if subject + loadgen > total_cores {
            return Err(SweepError::InvalidAllocation {
                subject,
                loadgen,
                total: total_cores,
            });
        }
        (
            cores[..subject].to_vec(),
            cores[subject..subject + loadgen].to_vec(),
        )
    } else {
        (Vec::new(), Vec::new())
    };

    debug!(
        "Planned CPU split: subject={} loadgen={} (affinity {})",
        subject,
        loadgen,
        if affinity_enabled { "on" } else { "off" }
    );

    Ok(CpuAllocation {
        subject_max_procs: subject,
        loadgen_max_procs: loadgen,
        subject_cpus,
        loadgen_cpus,
    })
}

/// Core ids this process may run on, in ascending order.
///
/// Read from the scheduler affinity mask. Falls back to `0..num_cpus` when
/// the mask is unavailable.
pub fn usable_core_ids() -> Vec<usize> {
    let mut ids: Vec<usize> = core_affinity::get_core_ids()
        .map(|ids| ids.into_iter().map(|core| core.id).collect())
        .unwrap_or_default();
    if ids.is_empty() {
        ids = (0..num_cpus::get()).collect();
    }
    ids.sort_unstable();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_split_is_contiguous_and_balanced() {
        for total in 1..=64 {
            let alloc = plan(total, 0, 0, true).unwrap();
            let diff = alloc.subject_max_procs.abs_diff(alloc.loadgen_max_procs);
            assert!(diff <= 1, "total={} diff={}", total, diff);

            let mut union = alloc.subject_cpus.clone();
            union.extend(&alloc.loadgen_cpus);
            assert_eq!(union, (0..total).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_subject_gets_floor_half() {
        let alloc = plan(7, 0, 0, true).unwrap();
        assert_eq!(alloc.subject_max_procs, 3);
        assert_eq!(alloc.loadgen_max_procs, 4);
        assert_eq!(alloc.subject_cpus, vec![0, 1, 2]);
        assert_eq!(alloc.loadgen_cpus, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_single_cap_takes_remainder() {
        let alloc = plan(16, 0, 4, true).unwrap();
        assert_eq!(alloc.subject_max_procs, 12);
        assert_eq!(alloc.loadgen_cpus, vec![12, 13, 14, 15]);

        let alloc = plan(16, 10, 0, false).unwrap();
        assert_eq!(alloc.loadgen_max_procs, 6);
    }

    #[test]
    fn test_both_caps_can_leave_idle_cores() {
        let alloc = plan(16, 2, 3, true).unwrap();
        assert_eq!(alloc.subject_cpus, vec![0, 1]);
        assert_eq!(alloc.loadgen_cpus, vec![2, 3, 4]);
        assert_eq!(alloc.total_cores(), 5);
    }

    #[test]
    fn test_caps_exceeding_total_rejected_only_when_pinning() {
        assert!(matches!(
            plan(8, 6, 4, true),
            Err(SweepError::InvalidAllocation { total: 8, .. })
        ));

        let alloc = plan(8, 6, 4, false).unwrap();
        assert_eq!(alloc.subject_max_procs, 6);
        assert_eq!(alloc.loadgen_max_procs, 4);
        assert!(!alloc.is_pinned());

        let alloc = plan(4, 5, 0, false).unwrap();
        assert_eq!(alloc.subject_max_procs, 5);
        assert_eq!(alloc.loadgen_max_procs, 0);
    }

    #[test]
    fn test_pinned_blocks_stay_inside_the_mask() {
        let alloc = plan_on_cores(&[4, 5, 6, 7], 0, 0, true).unwrap();
        assert_eq!(alloc.subject_cpus, vec![4, 5]);
        assert_eq!(alloc.loadgen_cpus, vec![6, 7]);

        let alloc = plan_on_cores(&[1, 3, 5, 7, 9], 1, 2, true).unwrap();
        assert_eq!(alloc.subject_cpus, vec![1]);
        assert_eq!(alloc.loadgen_cpus, vec![3, 5]);
    }

    #[test]
    fn test_affinity_disabled_keeps_caps_but_no_lists() {
        let alloc = plan(8, 0, 0, false).unwrap();
        assert_eq!(alloc.subject_max_procs, 4);
        assert_eq!(alloc.loadgen_max_procs, 4);
        assert!(alloc.subject_cpus.is_empty());
        assert!(alloc.loadgen_cpus.is_empty());
        assert!(!alloc.is_pinned());
    }

    #[test]
    fn test_loadgen_threads_never_zero() {
        let alloc = plan(1, 1, 0, false).unwrap();
        assert_eq!(alloc.loadgen_max_procs, 0);
        assert_eq!(alloc.loadgen_threads(), 1);
    }

    #[test]
    fn test_usable_core_ids_are_sorted_and_unique() {
        let ids = usable_core_ids();
        assert!(!ids.is_empty());
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}
