//! End-of-run console report.

use tracing::info;

use crate::errors::ErrorCategory;
use crate::stats::StatsSnapshot;

/// Fixed-format summary block printed when the run quits.
pub fn format_final_results(snapshot: &StatsSnapshot) -> String {
    let rule = "=".repeat(50);
    let mut output = String::new();
    output.push('\n');
    output.push_str(&format!("{}\n", rule));
    output.push_str("FINAL RESULTS\n");
    output.push_str(&format!("{}\n", rule));
    output.push_str(&format!("Requests:     {}\n", snapshot.requests));
    output.push_str(&format!("Failures:     {}\n", snapshot.failures));
    output.push_str(&format!("Median:       {:.0}ms\n", snapshot.median_ms));
    output.push_str(&format!("P95:          {:.0}ms\n", snapshot.p95_ms));
    output.push_str(&format!("P99:          {:.0}ms\n", snapshot.p99_ms));
    output.push_str(&format!("RPS:          {:.2}\n", snapshot.rps));
    output.push_str(&format!("{}\n", rule));
    output
}

/// Quitting hook that writes the summary block to stdout.
pub fn print_final_results(snapshot: &StatsSnapshot) {
    print!("{}", format_final_results(snapshot));
}

/// Per-task latency table, sorted by task name.
pub fn format_task_table(snapshot: &StatsSnapshot) -> String {
    if snapshot.tasks.is_empty() {
        return "No requests recorded.\n".to_string();
    }

    let mut output = String::new();
    output.push_str(&format!(
        "{:<20} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}\n",
        "Task", "Reqs", "Fails", "P50", "P95", "P99", "Mean", "Max"
    ));
    output.push_str(&format!(
        "{:<20} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}\n",
        "", "", "", "(ms)", "(ms)", "(ms)", "(ms)", "(ms)"
    ));
    output.push_str(&"-".repeat(92));
    output.push('\n');

    for task in &snapshot.tasks {
        output.push_str(&format!(
            "{:<20} {:>8} {:>8} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2}\n",
            task.name,
            task.requests,
            task.failures,
            task.median_ms,
            task.p95_ms,
            task.p99_ms,
            task.mean_ms,
            task.max_ms,
        ));
    }

    output
}

/// Failure counts per category, in category order; empty when nothing failed.
pub fn format_failure_breakdown(snapshot: &StatsSnapshot) -> String {
    let mut output = String::new();
    for category in ErrorCategory::all() {
        if let Some(count) = snapshot.failures_by_category.get(&category) {
            output.push_str(&format!("{:<28} {:>8}\n", category.description(), count));
        }
    }
    output
}

/// Quitting hook that logs the per-task breakdown.
pub fn log_breakdown(snapshot: &StatsSnapshot) {
    info!(
        requests = snapshot.requests,
        failures = snapshot.failures,
        points_sent = snapshot.points_sent,
        user_startup_failures = snapshot.user_startup_failures,
        failure_ratio = snapshot.failure_ratio(),
        elapsed = ?snapshot.elapsed,
        "Run finished\n{}",
        format_task_table(snapshot)
    );

    let breakdown = format_failure_breakdown(snapshot);
    if !breakdown.is_empty() {
        info!("Failures by category\n{}", breakdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::TaskSnapshot;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn snapshot() -> StatsSnapshot {
        let mut failures_by_category = BTreeMap::new();
        failures_by_category.insert(ErrorCategory::ServerError, 3);
        StatsSnapshot {
            requests: 120,
            failures: 3,
            points_sent: 400,
            user_startup_failures: 0,
            median_ms: 12.4,
            p95_ms: 48.0,
            p99_ms: 97.6,
            rps: 40.0,
            elapsed: Duration::from_secs(3),
            tasks: vec![TaskSnapshot {
                name: "send_single_point".to_string(),
                requests: 120,
                failures: 3,
                median_ms: 12.4,
                p95_ms: 48.0,
                p99_ms: 97.6,
                mean_ms: 15.2,
                max_ms: 130.0,
            }],
            failures_by_category,
        }
    }

    #[test]
    fn final_results_block_layout() {
        let expected = "\n\
==================================================\n\
FINAL RESULTS\n\
==================================================\n\
Requests:     120\n\
Failures:     3\n\
Median:       12ms\n\
P95:          48ms\n\
P99:          98ms\n\
RPS:          40.00\n\
==================================================\n";
        assert_eq!(format_final_results(&snapshot()), expected);
    }

    #[test]
    fn task_table_lists_tasks() {
        let table = format_task_table(&snapshot());
        assert!(table.contains("send_single_point"));
        assert!(table.contains("P95"));
    }

    #[test]
    fn task_table_without_requests() {
        let mut empty = snapshot();
        empty.tasks.clear();
        assert_eq!(format_task_table(&empty), "No requests recorded.\n");
    }

    #[test]
    fn failure_breakdown_only_lists_seen_categories() {
        let breakdown = format_failure_breakdown(&snapshot());
        assert!(breakdown.contains("HTTP 5xx Server Errors"));
        assert!(!breakdown.contains("Timeout"));
    }
}
