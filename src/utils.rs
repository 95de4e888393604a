//! # Formatting Helpers
//!
//! Small helpers for the human-readable side of a sweep: estimated run
//! time, throughput and latency figures in the per-trial summary line, core
//! lists for the startup banner and the pinning wrapper, and a textual
//! progress bar.
//!
//! ## Usage Examples
//!
//! ```rust
//! use web_framework_sweep::utils::*;
//! use std::time::Duration;
//!
//! assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
//! assert_eq!(format_core_list(&[0, 1, 2], ","), "0,1,2");
//! assert_eq!(format_rps(Some(15500.0)), "15.50K req/s");
//! ```

use std::time::Duration;

/// Format a duration for display.
///
/// Sub-minute values keep two decimals; longer spans use compound units,
/// which is what an estimate for a multi-hour sweep needs.
///
/// ## Examples
///
/// ```rust
/// # use web_framework_sweep::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_millis(2500)), "2.50s");
/// assert_eq!(format_duration(Duration::from_secs(3 * 3600 + 5)), "3h 0m 5s");
/// assert_eq!(format_duration(Duration::from_secs(2 * 86400 + 3600)), "2d 1h 0m");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let hours = minutes / 60;
        let days = hours / 24;

        if minutes < 60 {
            format!("{}m {}s", minutes, seconds % 60)
        } else if hours < 24 {
            format!("{}h {}m {}s", hours, minutes % 60, seconds % 60)
        } else {
            format!("{}d {}h {}m", days, hours % 24, minutes % 60)
        }
    }
}

/// Join core indices with `separator`.
///
/// A comma gives the form `taskset -c` expects; a space reads better in logs.
pub fn format_core_list(cpus: &[usize], separator: &str) -> String {
    cpus.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Format achieved throughput, or `n/a` when the report had none.
///
/// Uses decimal scaling (powers of 1000), like message rates:
/// - `< 1,000`: `750 req/s`
/// - `< 1,000,000`: `15.50K req/s`
/// - otherwise: `2.30M req/s`
pub fn format_rps(rps: Option<f64>) -> String {
    match rps {
        None => "n/a".to_string(),
        Some(r) if r < 1000.0 => format!("{:.0} req/s", r),
        Some(r) if r < 1_000_000.0 => format!("{:.2}K req/s", r / 1000.0),
        Some(r) => format!("{:.2}M req/s", r / 1_000_000.0),
    }
}

/// Format a latency in milliseconds, or `n/a`.
pub fn format_latency_ms(latency: Option<f64>) -> String {
    latency.map_or_else(|| "n/a".to_string(), |ms| format!("{:.3} ms", ms))
}

/// Create a progress bar-like indicator
///
/// Filled blocks (█) for completed work, light shade (░) for the rest.
/// A zero total renders as complete; `current > total` is capped.
///
/// ```rust
/// # use web_framework_sweep::utils::create_progress_indicator;
/// assert_eq!(create_progress_indicator(0, 100, 10), "░░░░░░░░░░");
/// assert_eq!(create_progress_indicator(50, 100, 10), "█████░░░░░");
/// ```
pub fn create_progress_indicator(current: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return "█".repeat(width);
    }

    let progress = (current as f64 / total as f64).min(1.0);
    let filled = ((progress * width as f64) as usize).min(width);
    let empty = width - filled;

    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
        assert_eq!(format_duration(Duration::from_secs(45)), "45.00s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(7265)), "2h 1m 5s");
        assert_eq!(format_duration(Duration::from_secs(90_000)), "1d 1h 0m");
    }

    #[test]
    fn test_format_core_list() {
        assert_eq!(format_core_list(&[], ","), "");
        assert_eq!(format_core_list(&[4], ","), "4");
        assert_eq!(format_core_list(&[0, 1, 2, 3], " "), "0 1 2 3");
    }

    #[test]
    fn test_format_rps() {
        assert_eq!(format_rps(None), "n/a");
        assert_eq!(format_rps(Some(750.0)), "750 req/s");
        assert_eq!(format_rps(Some(4321.5)), "4.32K req/s");
        assert_eq!(format_rps(Some(2_300_000.0)), "2.30M req/s");
    }

    #[test]
    fn test_format_latency_ms() {
        assert_eq!(format_latency_ms(None), "n/a");
        assert_eq!(format_latency_ms(Some(12.345)), "12.345 ms");
    }

    #[test]
    fn test_create_progress_indicator() {
        assert_eq!(create_progress_indicator(0, 100, 10), "░░░░░░░░░░");
        assert_eq!(create_progress_indicator(50, 100, 10), "█████░░░░░");
        assert_eq!(create_progress_indicator(100, 100, 10), "██████████");
        assert_eq!(create_progress_indicator(7, 0, 4), "████");
    }
}
