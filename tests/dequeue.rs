use std::time::Duration;

use chrono::Utc;
use helpers::RawTask;
use serde_json::json;
use taskqueue::{DequeueOrder, TaskEnqueueRequest, TaskQueueError, TaskStatus};
use tokio::task::spawn_local;
use tokio_util::sync::CancellationToken;

mod helpers;

#[tokio::test]
async fn it_should_lease_enqueued_task() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let ctx = CancellationToken::new();

        let enqueued = store
            .queuer()
            .enqueue(TaskEnqueueRequest::new("q1", "t").with_spec(json!({ "x": 1 })))
            .await
            .expect("Failed to enqueue task");
        assert_eq!(enqueued.status(), &TaskStatus::Waiting);

        let task = store
            .dequeuer()
            .dequeue(&ctx, &["q1"])
            .await
            .expect("Failed to dequeue task");

        assert_eq!(task.id(), enqueued.id());
        assert_eq!(task.status(), &TaskStatus::Running);
        assert_eq!(task.spec(), &json!({ "x": 1 }));
        assert!(task.started_at().is_some());
        assert!(task.last_heartbeat_at().is_some());
        assert_eq!(task.finished_at(), &None);
    })
    .await;
}

#[tokio::test]
async fn it_should_run_one_task_per_queue() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let ctx = CancellationToken::new();
        for _ in 0..2 {
            store
                .queuer()
                .enqueue(TaskEnqueueRequest::new("q1", "t"))
                .await
                .expect("Failed to enqueue task");
        }

        let first_dequeuer = store.dequeuer();
        let second_dequeuer = store.dequeuer();

        let first = first_dequeuer
            .dequeue(&ctx, &["q1"])
            .await
            .expect("Failed to dequeue task");
        let leased = second_dequeuer
            .try_dequeue(&ctx, &["q1"])
            .await
            .expect("Failed to try dequeue");
        assert_eq!(leased, None);

        let blocked = spawn_local({
            let ctx = ctx.clone();
            async move { second_dequeuer.dequeue(&ctx, &["q1"]).await }
        });

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!blocked.is_finished(), "Second dequeue must wait for the first task");

        first_dequeuer
            .finish(&ctx, *first.id(), b"{}")
            .await
            .expect("Failed to finish task");

        let second = tokio::time::timeout(Duration::from_secs(3), blocked)
            .await
            .expect("Second dequeue never woke up")
            .expect("Dequeue panicked")
            .expect("Failed to dequeue task");
        assert_ne!(second.id(), first.id());

        let running = test_db
            .get_tasks()
            .await
            .into_iter()
            .filter(|task| task.status() == &TaskStatus::Running)
            .count();
        assert_eq!(running, 1);
    })
    .await;
}

#[tokio::test]
async fn concurrent_dequeuers_never_share_a_queue() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let ctx = CancellationToken::new();
        for queue in ["a", "a", "b", "b"] {
            store
                .queuer()
                .enqueue(TaskEnqueueRequest::new(queue, "t"))
                .await
                .expect("Failed to enqueue task");
        }

        let mut handles = vec![];
        for _ in 0..4 {
            let dequeuer = store.dequeuer();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move { dequeuer.try_dequeue(&ctx, &[]).await }));
        }

        let mut leased = vec![];
        for handle in handles {
            if let Some(task) = handle.await.expect("Dequeue panicked").expect("Failed to dequeue") {
                leased.push(task.queue().clone());
            }
        }
        leased.sort();
        assert!(!leased.is_empty());
        assert!(leased.windows(2).all(|pair| pair[0] != pair[1]), "{leased:?}");

        let running = test_db
            .get_tasks()
            .await
            .into_iter()
            .filter(|task| task.status() == &TaskStatus::Running)
            .count();
        assert_eq!(running, leased.len());
    })
    .await;
}

#[tokio::test]
async fn it_should_reclaim_stale_task() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let ctx = CancellationToken::new();

        let stale_id = test_db
            .insert_task(
                RawTask::new("q1", TaskStatus::Running)
                    .heartbeat_ago(chrono::Duration::minutes(30)),
            )
            .await;

        let task = store
            .dequeuer()
            .dequeue(&ctx, &[])
            .await
            .expect("Failed to dequeue task");

        assert_eq!(task.id(), &stale_id);
        assert_eq!(task.status(), &TaskStatus::Running);
        let heartbeat = task.last_heartbeat_at().expect("Heartbeat not set");
        assert!((Utc::now() - heartbeat).num_milliseconds().abs() < 1000);
    })
    .await;
}

#[tokio::test]
async fn cancelled_task_with_fresh_heartbeat_keeps_its_queue() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let dequeuer = store.dequeuer();
        let ctx = CancellationToken::new();

        store
            .queuer()
            .enqueue(TaskEnqueueRequest::new("q1", "t"))
            .await
            .expect("Failed to enqueue task");
        let first = dequeuer.dequeue(&ctx, &["q1"]).await.expect("Failed to dequeue");
        store
            .cancel_task(*first.id())
            .await
            .expect("Failed to cancel running task");

        let second = store
            .queuer()
            .enqueue(TaskEnqueueRequest::new("q1", "t"))
            .await
            .expect("Failed to enqueue task");

        assert_eq!(
            dequeuer.try_dequeue(&ctx, &["q1"]).await.expect("Failed to dequeue"),
            None
        );
        assert_eq!(
            dequeuer.try_dequeue(&ctx, &[]).await.expect("Failed to dequeue"),
            None
        );

        sqlx::query(&format!(
            "update {}.tasks set last_heartbeat_at = now() - interval '1 hour' where task_id = $1",
            helpers::SCHEMA
        ))
        .bind(first.id())
        .execute(&test_db.test_pool)
        .await
        .expect("Failed to age heartbeat");

        let leased = dequeuer
            .try_dequeue(&ctx, &["q1"])
            .await
            .expect("Failed to dequeue")
            .expect("Queue should be free once the heartbeat is stale");
        assert_eq!(leased.id(), second.id());
        assert_eq!(
            test_db.get_task(*first.id()).await.status(),
            &TaskStatus::Cancelled
        );
    })
    .await;
}

#[tokio::test]
async fn live_task_blocks_its_queue() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let ctx = CancellationToken::new();

        test_db
            .insert_task(
                RawTask::new("q1", TaskStatus::Running).heartbeat_ago(chrono::Duration::seconds(5)),
            )
            .await;
        test_db.insert_task(RawTask::new("q1", TaskStatus::Waiting)).await;
        let other = test_db.insert_task(RawTask::new("q2", TaskStatus::Waiting)).await;

        let dequeuer = store.dequeuer();
        let task = dequeuer
            .try_dequeue(&ctx, &[])
            .await
            .expect("Failed to dequeue")
            .expect("q2 should be processable");
        assert_eq!(task.id(), &other);

        let none = dequeuer.try_dequeue(&ctx, &["q1"]).await.expect("Failed to dequeue");
        assert_eq!(none, None);
    })
    .await;
}

#[tokio::test]
async fn terminal_tasks_are_never_dequeued() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let ctx = CancellationToken::new();

        for status in [TaskStatus::Cancelled, TaskStatus::Finished, TaskStatus::Failed] {
            test_db
                .insert_task(
                    RawTask::new("q1", status)
                        .heartbeat_ago(chrono::Duration::hours(1))
                        .finished_ago(chrono::Duration::minutes(50)),
                )
                .await;
        }

        let leased = store
            .dequeuer()
            .try_dequeue(&ctx, &["q1"])
            .await
            .expect("Failed to dequeue");
        assert_eq!(leased, None);
    })
    .await;
}

#[tokio::test]
async fn waiting_tasks_are_preferred_and_ordered() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let ctx = CancellationToken::new();
        let oldest = test_db
            .insert_task(RawTask::new("q1", TaskStatus::Waiting).created_ago(chrono::Duration::minutes(3)))
            .await;
        let newest = test_db
            .insert_task(RawTask::new("q1", TaskStatus::Waiting).created_ago(chrono::Duration::minutes(1)))
            .await;
        let stale = test_db
            .insert_task(
                RawTask::new("q1", TaskStatus::Running)
                    .created_ago(chrono::Duration::minutes(1))
                    .heartbeat_ago(chrono::Duration::minutes(30)),
            )
            .await;

        let task = store
            .dequeuer()
            .try_dequeue(&ctx, &["q1"])
            .await
            .expect("Failed to dequeue")
            .expect("No task leased");
        assert_eq!(task.id(), &newest);
        store
            .cancel_task(newest)
            .await
            .expect("Failed to cancel task");

        let store = test_db
            .create_options()
            .dequeue_order(DequeueOrder::OldestFirst)
            .init()
            .await
            .expect("Failed to create store");
        let task = store
            .dequeuer()
            .try_dequeue(&ctx, &["q1"])
            .await
            .expect("Failed to dequeue")
            .expect("No task leased");
        assert_eq!(task.id(), &oldest);
        store
            .cancel_task(oldest)
            .await
            .expect("Failed to cancel task");

        let task = store
            .dequeuer()
            .try_dequeue(&ctx, &["q1"])
            .await
            .expect("Failed to dequeue")
            .expect("No task leased");
        assert_eq!(task.id(), &stale);
    })
    .await;
}

#[tokio::test]
async fn queue_filter_is_case_insensitive() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let ctx = CancellationToken::new();
        store
            .queuer()
            .enqueue(TaskEnqueueRequest::new("Reports", "t"))
            .await
            .expect("Failed to enqueue task");

        let dequeuer = store.dequeuer();
        assert_eq!(
            dequeuer.try_dequeue(&ctx, &["emails"]).await.expect("Failed to dequeue"),
            None
        );
        let task = dequeuer
            .try_dequeue(&ctx, &[" REPORTS "])
            .await
            .expect("Failed to dequeue")
            .expect("No task leased");
        assert_eq!(task.queue(), "reports");
    })
    .await;
}

#[tokio::test]
async fn blocked_dequeue_wakes_up_on_enqueue() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db
            .create_options()
            .poll_frequency(Duration::from_secs(5))
            .init()
            .await
            .expect("Failed to create store");
        let ctx = CancellationToken::new();

        let dequeuer = store.dequeuer();
        dequeuer.start(&ctx).await.expect("Failed to start listener");
        let blocked = spawn_local({
            let ctx = ctx.clone();
            async move { dequeuer.dequeue(&ctx, &["q1"]).await }
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!blocked.is_finished());

        let enqueued_at = tokio::time::Instant::now();
        store
            .queuer()
            .enqueue(TaskEnqueueRequest::new("q1", "t"))
            .await
            .expect("Failed to enqueue task");

        let task = tokio::time::timeout(Duration::from_secs(2), blocked)
            .await
            .expect("Dequeue was not woken up by the notification")
            .expect("Dequeue panicked")
            .expect("Failed to dequeue task");
        assert_eq!(task.queue(), "q1");
        assert!(enqueued_at.elapsed() < Duration::from_secs(5));
    })
    .await;
}

#[tokio::test]
async fn cancelled_dequeue_returns_cancelled() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let ctx = CancellationToken::new();

        let dequeuer = store.dequeuer();
        let blocked = spawn_local({
            let ctx = ctx.clone();
            async move { dequeuer.dequeue(&ctx, &["q1"]).await }
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        ctx.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), blocked)
            .await
            .expect("Dequeue ignored cancellation")
            .expect("Dequeue panicked");
        assert!(matches!(result, Err(TaskQueueError::Cancelled)));
    })
    .await;
}
