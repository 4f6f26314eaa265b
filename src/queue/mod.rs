// Durable task queue, execution history and derived aggregates

pub mod aggregates;
pub mod retry;
pub mod task_queue;
pub mod types;

pub use aggregates::BOTTLENECK_LIMIT;
pub use retry::RetryConfig;
pub use task_queue::TaskQueue;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use tempfile::TempDir;

    async fn queue() -> (TempDir, TaskQueue) {
        let dir = TempDir::new().unwrap();
        let db = DatabaseManager::open(dir.path().join("queue.db")).await.unwrap();
        (dir, TaskQueue::new(&db))
    }

    #[tokio::test]
    async fn test_priority_then_age_ordering() {
        let (_dir, queue) = queue().await;
        for priority in [8, 2, 5] {
            queue
                .send(NewTask::new("planner", "X", "build").with_priority(priority))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        while let Some(task) = queue.claim_next("X", "X").await.unwrap() {
            seen.push(task.priority.value());
        }
        assert_eq!(seen, vec![2, 5, 8]);
    }

    #[tokio::test]
    async fn test_equal_priority_is_fifo() {
        let (_dir, queue) = queue().await;
        let first = queue.send(NewTask::new("a", "X", "t")).await.unwrap();
        let second = queue.send(NewTask::new("a", "X", "t")).await.unwrap();

        assert_eq!(queue.claim_next("X", "X").await.unwrap().unwrap().id, first.id);
        assert_eq!(queue.claim_next("X", "X").await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_get_does_not_claim() {
        let (_dir, queue) = queue().await;
        let sent = queue.send(NewTask::new("a", "X", "t")).await.unwrap();

        let peeked = queue.get("X").await.unwrap().unwrap();
        let again = queue.get("X").await.unwrap().unwrap();
        assert_eq!(peeked.id, sent.id);
        assert_eq!(again.id, sent.id);
        assert_eq!(again.status, TaskStatus::Queued);
        assert!(queue.get("Y").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_validation() {
        let (_dir, queue) = queue().await;
        assert!(matches!(
            queue.send(NewTask::new("a", "X", "t").with_priority(0)).await,
            Err(QueueError::InvalidPriority { value: 0 })
        ));
        assert!(matches!(
            queue.send(NewTask::new("a", "X", "t").with_priority(11)).await,
            Err(QueueError::InvalidPriority { value: 11 })
        ));
        assert!(matches!(
            queue.send(NewTask::new("a", " ", "t")).await,
            Err(QueueError::EmptyRecipient)
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (_dir, queue) = queue().await;
        let sent = queue
            .send(NewTask::new("a", "X", "t").with_payload(serde_json::json!({"k": 1})))
            .await
            .unwrap();

        queue.mark_started(&sent.id, "X").await.unwrap();
        // already running
        assert!(matches!(
            queue.mark_started(&sent.id, "X").await,
            Err(QueueError::TaskNotFound { .. })
        ));

        queue.mark_completed(&sent.id, 1234).await.unwrap();
        let done = queue.task(&sent.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.duration_ms, Some(1234));
        assert_eq!(done.payload, serde_json::json!({"k": 1}));
        assert_eq!(done.claimed_by.as_deref(), Some("X"));
        assert!(done.started_at.unwrap() >= done.created_at);
        assert!(done.completed_at.unwrap() >= done.started_at.unwrap());

        // terminal tasks cannot move again
        assert!(queue.mark_failed(&sent.id, "late").await.is_err());
        assert!(queue.mark_started("missing", "X").await.is_err());
    }

    #[tokio::test]
    async fn test_mark_failed_records_error() {
        let (_dir, queue) = queue().await;
        let sent = queue.send(NewTask::new("a", "X", "t")).await.unwrap();
        // only running tasks can fail
        assert!(queue.mark_failed(&sent.id, "boom").await.is_err());

        queue.mark_started(&sent.id, "X").await.unwrap();
        queue.mark_failed(&sent.id, "boom").await.unwrap();

        let failed = queue.task(&sent.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.duration_ms.unwrap() >= 0);
    }

    #[tokio::test]
    async fn test_requeue_running_returns_tasks_to_queue() {
        let (_dir, queue) = queue().await;
        let sent = queue.send(NewTask::new("a", "X", "t")).await.unwrap();
        queue.claim_next("X", "X").await.unwrap().unwrap();
        assert!(queue.get("X").await.unwrap().is_none());

        assert_eq!(queue.requeue_running("X", "process exited").await.unwrap(), 1);
        let back = queue.get("X").await.unwrap().unwrap();
        assert_eq!(back.id, sent.id);
        assert!(back.started_at.is_none());
        assert!(back.claimed_by.is_none());
    }

    #[tokio::test]
    async fn test_aggregates() {
        let (_dir, queue) = queue().await;
        for (priority, duration) in [(1, 50), (2, 900), (9, 300)] {
            let task = queue
                .send(NewTask::new("a", "builder", "t").with_priority(priority))
                .await
                .unwrap();
            queue.mark_started(&task.id, "builder").await.unwrap();
            queue.mark_completed(&task.id, duration).await.unwrap();
        }
        let failing = queue.send(NewTask::new("a", "builder", "t")).await.unwrap();
        queue.mark_started(&failing.id, "builder").await.unwrap();
        queue.mark_failed(&failing.id, "nope").await.unwrap();
        queue.send(NewTask::new("a", "reviewer", "t").with_priority(2)).await.unwrap();
        queue.send(NewTask::new("a", "reviewer", "t").with_priority(3)).await.unwrap();
        queue.send(NewTask::new("a", "reviewer", "t").with_priority(9)).await.unwrap();

        let slowest = queue.get_slowest_tasks(2).await.unwrap();
        assert_eq!(
            slowest.iter().map(|t| t.duration_ms).collect::<Vec<_>>(),
            vec![900, 300]
        );

        let perf = queue.get_role_performance().await.unwrap();
        let builder = perf.iter().find(|p| p.role == "builder").unwrap();
        assert_eq!(builder.total, 4);
        assert_eq!(builder.completed, 3);
        assert_eq!(builder.failed, 1);
        assert_eq!(builder.min_duration_ms, Some(50));
        assert_eq!(builder.max_duration_ms, Some(900));
        assert!((builder.avg_duration_ms.unwrap() - 1250.0 / 3.0).abs() < 1e-9);
        assert_eq!(builder.success_rate(), Some(0.75));

        let depth = queue.get_queue_depth().await.unwrap();
        assert_eq!(
            depth,
            vec![
                QueueDepth {
                    recipient: "reviewer".into(),
                    bucket: crate::priority::PriorityBucket::High,
                    count: 2
                },
                QueueDepth {
                    recipient: "reviewer".into(),
                    bucket: crate::priority::PriorityBucket::Low,
                    count: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_events_and_metrics() {
        let (_dir, queue) = queue().await;
        let task = queue.send(NewTask::new("planner", "X", "t")).await.unwrap();
        queue.mark_started(&task.id, "X").await.unwrap();
        queue.mark_completed(&task.id, 10).await.unwrap();

        let events = queue.recent_events(10).await.unwrap();
        let transitions: Vec<_> = events.iter().map(|e| e.to_status).collect();
        assert_eq!(
            transitions,
            vec![TaskStatus::Queued, TaskStatus::Running, TaskStatus::Completed]
        );
        assert_eq!(events[0].role, "planner");
        assert_eq!(queue.recent_events(1).await.unwrap()[0].to_status, TaskStatus::Completed);

        queue.record_metric("X", "task_duration_ms", 10.0).await.unwrap();
        queue.record_metric("X", "task_duration_ms", 20.0).await.unwrap();
        let samples = queue.latest_samples("X", 5).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].value, 20.0);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_and_live_rows() {
        let (_dir, queue) = queue().await;
        let done = queue.send(NewTask::new("a", "X", "t")).await.unwrap();
        queue.mark_started(&done.id, "X").await.unwrap();
        queue.mark_completed(&done.id, 5).await.unwrap();
        queue.send(NewTask::new("a", "X", "t")).await.unwrap();
        queue.record_metric("X", "m", 1.0).await.unwrap();

        // nothing is older than a day yet
        assert_eq!(queue.cleanup_older_than(1).await.unwrap(), 0);

        // a zero-day window drops terminal history but never queued work
        sqlx::query("UPDATE tasks SET completed_at = completed_at - 10")
            .execute(queue.pool())
            .await
            .unwrap();
        sqlx::query("UPDATE agent_metrics SET timestamp = timestamp - 10")
            .execute(queue.pool())
            .await
            .unwrap();
        assert_eq!(queue.cleanup_older_than(0).await.unwrap(), 2);
        assert!(queue.task(&done.id).await.unwrap().is_none());
        assert!(queue.get("X").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reclaim_stale_spares_roles_with_fresh_heartbeats() {
        use crate::supervisor::HeartbeatStore;
        use chrono::Utc;
        use std::time::Duration;

        let (_dir, queue) = queue().await;
        let mut ids = Vec::new();
        for role in ["stale", "fresh", "silent"] {
            let task = queue.send(NewTask::new("planner", role, "build")).await.unwrap();
            queue.claim_next(role, role).await.unwrap().unwrap();
            ids.push(task.id);
        }

        let hour_ago = task_queue::millis(Utc::now()) - 3_600_000;
        sqlx::query("UPDATE tasks SET started_at = ?1")
            .bind(hour_ago)
            .execute(queue.pool())
            .await
            .unwrap();
        HeartbeatStore::from_pool(queue.pool().clone())
            .beat("fresh", 42)
            .await
            .unwrap();
        sqlx::query("INSERT INTO worker_heartbeats (role, pid, beat_at) VALUES ('stale', 43, ?1)")
            .bind(hour_ago)
            .execute(queue.pool())
            .await
            .unwrap();

        assert_eq!(queue.reclaim_stale(Duration::from_secs(30)).await.unwrap(), 2);
        let status = |id: &str| {
            let queue = queue.clone();
            let id = id.to_string();
            async move { queue.task(&id).await.unwrap().unwrap().status }
        };
        assert_eq!(status(&ids[0]).await, TaskStatus::Queued);
        assert_eq!(status(&ids[1]).await, TaskStatus::Running);
        assert_eq!(status(&ids[2]).await, TaskStatus::Queued);

        let events = queue.recent_events(10).await.unwrap();
        assert!(events
            .iter()
            .any(|e| e.task_id == ids[0] && e.detail.as_deref() == Some("heartbeat timeout")));

        // a task started inside the window is left alone even without a heartbeat
        queue.claim_next("silent", "silent").await.unwrap().unwrap();
        assert_eq!(queue.reclaim_stale(Duration::from_secs(30)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_only_the_claimant_can_finish_a_task() {
        let (_dir, queue) = queue().await;
        let task = queue.send(NewTask::new("planner", "builder", "build")).await.unwrap();
        queue.claim_next("builder", "builder").await.unwrap().unwrap();

        assert!(matches!(
            queue.mark_completed_as(&task.id, "reviewer", 10).await,
            Err(QueueError::TaskNotFound { .. })
        ));
        assert!(matches!(
            queue.mark_failed_as(&task.id, "reviewer", "nope").await,
            Err(QueueError::TaskNotFound { .. })
        ));
        assert_eq!(
            queue.task(&task.id).await.unwrap().unwrap().status,
            TaskStatus::Running
        );

        queue.mark_completed_as(&task.id, "builder", 10).await.unwrap();
        assert_eq!(
            queue.task(&task.id).await.unwrap().unwrap().status,
            TaskStatus::Completed
        );
    }
}
