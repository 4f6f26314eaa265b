use chrono::Utc;
use std::collections::BTreeMap;

use super::types::*;
use crate::queue::{QueueDepth, RolePerformance, SlowTask};

pub struct BottleneckDetector {
    thresholds: BottleneckThresholds,
}

impl Default for BottleneckDetector {
    fn default() -> Self {
        Self::new(BottleneckThresholds::default())
    }
}

impl BottleneckDetector {
    pub fn new(thresholds: BottleneckThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &BottleneckThresholds {
        &self.thresholds
    }

    /// Classify the read-side aggregates; worst findings first
    pub fn detect(
        &self,
        slowest: &[SlowTask],
        depth: &[QueueDepth],
        performance: &[RolePerformance],
    ) -> Vec<PerformanceBottleneck> {
        let mut bottlenecks = Vec::new();

        for task in slowest {
            let Some(severity) = self.task_severity(task.duration_ms) else {
                continue;
            };
            let mut metrics = BTreeMap::new();
            metrics.insert("duration_ms".to_string(), task.duration_ms as f64);
            metrics.insert("priority".to_string(), task.priority.value() as f64);

            bottlenecks.push(PerformanceBottleneck {
                detected_at: Utc::now(),
                bottleneck_type: BottleneckType::SlowTask,
                severity,
                role: task.recipient.clone(),
                description: format!(
                    "Task {} ({}) took {}ms (target: <{}ms)",
                    task.id, task.task_type, task.duration_ms, self.thresholds.slow_task_ms
                ),
                suggested_action: "Split the task or move long-running work off the role's critical path"
                    .to_string(),
                metrics,
            });
        }

        let mut queued: BTreeMap<&str, u64> = BTreeMap::new();
        for row in depth {
            *queued.entry(row.recipient.as_str()).or_default() += row.count;
        }
        for (role, count) in queued {
            if count < self.thresholds.backlog {
                continue;
            }
            let severity = if count >= self.thresholds.backlog * 5 {
                BottleneckSeverity::Critical
            } else if count >= self.thresholds.backlog * 2 {
                BottleneckSeverity::High
            } else {
                BottleneckSeverity::Medium
            };
            let mut metrics = BTreeMap::new();
            metrics.insert("queued".to_string(), count as f64);

            bottlenecks.push(PerformanceBottleneck {
                detected_at: Utc::now(),
                bottleneck_type: BottleneckType::QueueBacklog,
                severity,
                role: role.to_string(),
                description: format!("{count} tasks waiting for {role}"),
                suggested_action: "Check that the role's worker is running and its handler keeps up"
                    .to_string(),
                metrics,
            });
        }

        for perf in performance {
            let finished = perf.completed + perf.failed;
            let Some(rate) = perf.success_rate() else {
                continue;
            };
            let failure_rate = 1.0 - rate;
            if finished < self.thresholds.min_finished || failure_rate < self.thresholds.failure_rate {
                continue;
            }
            let severity = if failure_rate >= 0.75 {
                BottleneckSeverity::Critical
            } else if failure_rate >= 0.5 {
                BottleneckSeverity::High
            } else {
                BottleneckSeverity::Medium
            };
            let mut metrics = BTreeMap::new();
            metrics.insert("failure_rate".to_string(), failure_rate);
            metrics.insert("failed".to_string(), perf.failed as f64);
            metrics.insert("completed".to_string(), perf.completed as f64);

            bottlenecks.push(PerformanceBottleneck {
                detected_at: Utc::now(),
                bottleneck_type: BottleneckType::FailureRate,
                severity,
                role: perf.role.clone(),
                description: format!(
                    "{} failed {} of {} finished tasks ({:.0}%)",
                    perf.role,
                    perf.failed,
                    finished,
                    failure_rate * 100.0
                ),
                suggested_action: "Inspect recent task errors with `switchboard events`".to_string(),
                metrics,
            });
        }

        bottlenecks.sort_by(|a, b| b.severity.cmp(&a.severity));
        bottlenecks
    }

    pub fn task_severity(&self, duration_ms: i64) -> Option<BottleneckSeverity> {
        let t = &self.thresholds;
        if duration_ms > t.critical_task_ms {
            Some(BottleneckSeverity::Critical)
        } else if duration_ms > t.high_task_ms {
            Some(BottleneckSeverity::High)
        } else if duration_ms > t.slow_task_ms {
            Some(BottleneckSeverity::Medium)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::{Priority, PriorityBucket};

    fn slow(id: &str, duration_ms: i64) -> SlowTask {
        SlowTask {
            id: id.to_string(),
            recipient: "builder".to_string(),
            task_type: "build".to_string(),
            priority: Priority::DEFAULT,
            duration_ms,
            completed_at: Some(Utc::now()),
        }
    }

    fn perf(role: &str, completed: u64, failed: u64) -> RolePerformance {
        RolePerformance {
            role: role.to_string(),
            total: completed + failed,
            queued: 0,
            running: 0,
            completed,
            failed,
            avg_duration_ms: None,
            min_duration_ms: None,
            max_duration_ms: None,
        }
    }

    #[test]
    fn test_task_severity_bands() {
        let detector = BottleneckDetector::default();
        assert_eq!(detector.task_severity(1_500), None);
        assert_eq!(detector.task_severity(3_000), Some(BottleneckSeverity::Medium));
        assert_eq!(detector.task_severity(6_000), Some(BottleneckSeverity::High));
        assert_eq!(detector.task_severity(60_000), Some(BottleneckSeverity::Critical));
    }

    #[test]
    fn test_backlog_sums_buckets_per_role() {
        let detector = BottleneckDetector::default();
        let depth = vec![
            QueueDepth {
                recipient: "builder".into(),
                bucket: PriorityBucket::High,
                count: 6,
            },
            QueueDepth {
                recipient: "builder".into(),
                bucket: PriorityBucket::Low,
                count: 6,
            },
            QueueDepth {
                recipient: "reviewer".into(),
                bucket: PriorityBucket::Normal,
                count: 3,
            },
        ];

        let found = detector.detect(&[], &depth, &[]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bottleneck_type, BottleneckType::QueueBacklog);
        assert_eq!(found[0].role, "builder");
        assert_eq!(found[0].severity, BottleneckSeverity::Medium);
    }

    #[test]
    fn test_failure_rate_needs_enough_samples() {
        let detector = BottleneckDetector::default();
        assert!(detector.detect(&[], &[], &[perf("builder", 0, 2)]).is_empty());

        let found = detector.detect(&[], &[], &[perf("builder", 1, 3), perf("reviewer", 9, 1)]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].role, "builder");
        assert_eq!(found[0].severity, BottleneckSeverity::Critical);
    }

    #[test]
    fn test_worst_first() {
        let detector = BottleneckDetector::default();
        let found = detector.detect(&[slow("a", 3_000), slow("b", 30_000), slow("c", 100)], &[], &[]);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].severity, BottleneckSeverity::Critical);
        assert!(found[0].description.contains("Task b"));
    }
}
