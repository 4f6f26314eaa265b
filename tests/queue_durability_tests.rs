// Queue behaviour across process restarts and concurrent consumers

use futures::future::join_all;
use std::collections::HashSet;
use switchboard::{DatabaseManager, NewTask, QueueError, TaskQueue, TaskStatus};
use tempfile::TempDir;

async fn queue_at(dir: &TempDir) -> (DatabaseManager, TaskQueue) {
    let db = DatabaseManager::open(dir.path().join("switchboard.db"))
        .await
        .unwrap();
    let queue = TaskQueue::new(&db);
    (db, queue)
}

#[tokio::test]
async fn test_tasks_survive_reopen_in_priority_order() {
    let dir = TempDir::new().unwrap();

    let mut sent = Vec::new();
    {
        let (db, queue) = queue_at(&dir).await;
        for priority in [8, 2, 5] {
            let task = queue
                .send(NewTask::new("planner", "builder", "build").with_priority(priority))
                .await
                .unwrap();
            sent.push((priority, task.id));
        }
        db.shutdown().await;
    }
    sent.sort();

    let (_db, queue) = queue_at(&dir).await;
    let mut received = Vec::new();
    for _ in 0..3 {
        let task = queue.get("builder").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        queue.mark_started(&task.id, "builder").await.unwrap();
        queue.mark_completed(&task.id, 5).await.unwrap();
        received.push((task.priority.value() as i64, task.id));
    }

    assert_eq!(received, sent);
    assert!(queue.get("builder").await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_claims_never_share_a_task() {
    let dir = TempDir::new().unwrap();
    let (_db_a, queue_a) = queue_at(&dir).await;
    let (_db_b, queue_b) = queue_at(&dir).await;

    for i in 0..20 {
        queue_a
            .send(NewTask::new("planner", "builder", format!("job-{i}")).with_priority(i % 10 + 1))
            .await
            .unwrap();
    }

    let claimers = (0..8).map(|n| {
        let queue = if n % 2 == 0 { queue_a.clone() } else { queue_b.clone() };
        async move {
            let mut claimed = Vec::new();
            while let Some(task) = queue.claim_next("builder", "builder").await.unwrap() {
                claimed.push(task.id);
            }
            claimed
        }
    });
    let claimed: Vec<String> = join_all(claimers).await.into_iter().flatten().collect();

    let unique: HashSet<&String> = claimed.iter().collect();
    assert_eq!(claimed.len(), 20);
    assert_eq!(unique.len(), 20);
}

#[tokio::test]
async fn test_racing_mark_started_has_one_winner() {
    let dir = TempDir::new().unwrap();
    let (_db_a, queue_a) = queue_at(&dir).await;
    let (_db_b, queue_b) = queue_at(&dir).await;

    queue_a
        .send(NewTask::new("planner", "builder", "build"))
        .await
        .unwrap();

    // both consumers peek the same head of queue
    let seen_a = queue_a.get("builder").await.unwrap().unwrap();
    let seen_b = queue_b.get("builder").await.unwrap().unwrap();
    assert_eq!(seen_a.id, seen_b.id);

    let (first, second) = tokio::join!(
        queue_a.mark_started(&seen_a.id, "builder"),
        queue_b.mark_started(&seen_b.id, "builder"),
    );
    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(QueueError::TaskNotFound { .. }))));
}

#[tokio::test]
async fn test_transition_history_is_recorded() {
    let dir = TempDir::new().unwrap();
    let (_db, queue) = queue_at(&dir).await;

    let task = queue
        .send(NewTask::new("planner", "builder", "build"))
        .await
        .unwrap();
    queue.claim_next("builder", "builder").await.unwrap();
    queue.requeue_running("builder", "worker crashed").await.unwrap();
    queue.claim_next("builder", "builder").await.unwrap();
    queue.mark_failed(&task.id, "compiler exploded").await.unwrap();

    let events = queue.recent_events(10).await.unwrap();
    let transitions: Vec<(Option<TaskStatus>, TaskStatus)> = events
        .iter()
        .filter(|e| e.task_id == task.id)
        .map(|e| (e.from_status, e.to_status))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (None, TaskStatus::Queued),
            (Some(TaskStatus::Queued), TaskStatus::Running),
            (Some(TaskStatus::Running), TaskStatus::Queued),
            (Some(TaskStatus::Queued), TaskStatus::Running),
            (Some(TaskStatus::Running), TaskStatus::Failed),
        ]
    );

    let stored = queue.task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.error.as_deref(), Some("compiler exploded"));
}
