use std::fmt::Write;

use super::types::*;
use crate::queue::{QueueDepth, SlowTask, TaskEvent};

pub struct MetricsReporter;

impl MetricsReporter {
    pub fn format_queue_depth(depth: &[QueueDepth]) -> String {
        let mut report = String::new();
        report.push_str("📥 QUEUE DEPTH\n");
        report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        if depth.is_empty() {
            report.push_str("   No queued tasks\n");
            return report;
        }
        let _ = writeln!(report, "   {:<20} {:<8} {:>6}", "ROLE", "BUCKET", "QUEUED");
        for row in depth {
            let _ = writeln!(
                report,
                "   {:<20} {:<8} {:>6}",
                row.recipient,
                row.bucket.as_str(),
                row.count
            );
        }
        report
    }

    pub fn format_role_report(report_data: &RoleReport) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "🤖 ROLE PERFORMANCE: {}", report_data.role);
        report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

        match &report_data.performance {
            Some(perf) => {
                let _ = writeln!(
                    report,
                    "   Tasks:        {} total ({} queued, {} running, {} completed, {} failed)",
                    perf.total, perf.queued, perf.running, perf.completed, perf.failed
                );
                if let Some(rate) = perf.success_rate() {
                    let _ = writeln!(report, "   Success Rate: {:.1}%", rate * 100.0);
                }
                if let (Some(avg), Some(min), Some(max)) =
                    (perf.avg_duration_ms, perf.min_duration_ms, perf.max_duration_ms)
                {
                    let _ = writeln!(report, "   Duration:     avg {avg:.0}ms, min {min}ms, max {max}ms");
                }
            }
            None => report.push_str("   No tasks recorded\n"),
        }

        if !report_data.samples.is_empty() {
            report.push_str("\n📈 LATEST SAMPLES\n");
            for sample in &report_data.samples {
                let _ = writeln!(
                    report,
                    "   {}  {:<20} {}",
                    sample.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    sample.metric_name,
                    sample.value
                );
            }
        }
        report
    }

    pub fn format_slowest(tasks: &[SlowTask], bottlenecks: &[PerformanceBottleneck]) -> String {
        let mut report = String::new();
        report.push_str("🐢 SLOWEST TASKS\n");
        report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        if tasks.is_empty() {
            report.push_str("   No completed tasks yet\n");
        }
        for task in tasks {
            let _ = writeln!(
                report,
                "   {:>8}ms  {:<16} {:<16} {} {}",
                task.duration_ms, task.recipient, task.task_type, task.priority, task.id
            );
        }

        if !bottlenecks.is_empty() {
            report.push_str("\n⚠️  BOTTLENECKS\n");
            for bottleneck in bottlenecks {
                let _ = writeln!(
                    report,
                    "   [{:?}] {}\n      → {}",
                    bottleneck.severity, bottleneck.description, bottleneck.suggested_action
                );
            }
        }
        report
    }

    pub fn format_events(events: &[TaskEvent]) -> String {
        let mut report = String::new();
        for event in events {
            let from = event.from_status.map(|s| s.as_str()).unwrap_or("-");
            let _ = write!(
                report,
                "{}  {:<16} {}  {} → {}",
                event.at.format("%Y-%m-%d %H:%M:%S%.3f"),
                event.role,
                event.task_id,
                from,
                event.to_status
            );
            if let Some(detail) = &event.detail {
                let _ = write!(report, "  ({detail})");
            }
            report.push('\n');
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::PriorityBucket;
    use crate::queue::TaskStatus;
    use chrono::Utc;

    #[test]
    fn test_queue_depth_lists_every_row() {
        let report = MetricsReporter::format_queue_depth(&[QueueDepth {
            recipient: "builder".into(),
            bucket: PriorityBucket::High,
            count: 3,
        }]);
        assert!(report.contains("builder"));
        assert!(report.contains("high"));
        assert!(MetricsReporter::format_queue_depth(&[]).contains("No queued tasks"));
    }

    #[test]
    fn test_events_show_transition_and_detail() {
        let report = MetricsReporter::format_events(&[TaskEvent {
            id: 1,
            task_id: "t-1".into(),
            role: "builder".into(),
            from_status: Some(TaskStatus::Running),
            to_status: TaskStatus::Queued,
            at: Utc::now(),
            detail: Some("heartbeat timeout".into()),
        }]);
        assert!(report.contains("running → queued"));
        assert!(report.contains("(heartbeat timeout)"));
    }
}
