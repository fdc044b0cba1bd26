use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use porter_core::models::{
    CANCELLED_BY_USER, CoreError, CoreErrorKind, NewTask, Task, TaskId, TaskStatus, TaskType,
};
use porter_core::orchestration::{ExecutionContext, QUEUE_FULL_MESSAGE, QueueConfig, TaskQueue};
use porter_core::persistence::TaskStore;
use porter_core::sqlite::SqliteStore;
use tokio_util::sync::CancellationToken;

fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("porter-{test_name}-{nanos}.sqlite3"))
}

fn fast_config() -> QueueConfig {
    QueueConfig {
        max_concurrent: 1,
        max_retries: 3,
        retry_delay: Duration::from_millis(10),
        task_timeout: Duration::from_secs(5),
        buffer_capacity: 16,
        poll_interval: Duration::from_millis(10),
        cancel_grace: Duration::from_millis(500),
    }
}

fn memory_store() -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.migrate_to_latest().unwrap();
    store
}

fn queue_with(config: QueueConfig) -> (TaskQueue, Arc<SqliteStore>) {
    let store = memory_store();
    let queue = TaskQueue::new(store.clone(), config);
    (queue, store)
}

async fn wait_for_status(queue: &TaskQueue, task_id: TaskId, expected: TaskStatus) -> Task {
    for _ in 0..300 {
        let task = queue.get_task(task_id).await.unwrap();
        if task.status == expected {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached {}", expected.as_str());
}

async fn echo(_context: ExecutionContext, payload: Vec<u8>) -> Result<Vec<u8>, CoreError> {
    Ok(payload)
}

async fn wait_until_cancelled(
    context: ExecutionContext,
    _payload: Vec<u8>,
) -> Result<Vec<u8>, CoreError> {
    context.cancellation().cancelled().await;
    Ok(b"released".to_vec())
}

async fn panicking(_context: ExecutionContext, _payload: Vec<u8>) -> Result<Vec<u8>, CoreError> {
    panic!("simulated handler panic");
}

async fn invalid(_context: ExecutionContext, _payload: Vec<u8>) -> Result<Vec<u8>, CoreError> {
    Err(CoreError::invalid_input("payload is not a path"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completed_task_stores_handler_result() {
    let (queue, _store) = queue_with(fast_config());
    queue.register_handler(TaskType::FileClassify, echo).unwrap();
    queue.start().await.unwrap();

    let task = queue
        .enqueue_and_wait(
            &CancellationToken::new(),
            Some(Duration::from_secs(5)),
            TaskType::FileClassify,
            b"{\"path\":\"/tmp/a\"}".to_vec(),
            0,
        )
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.as_deref(), Some(&b"{\"path\":\"/tmp/a\"}"[..]));
    assert!(task.started_at.is_some());
    assert!(task.finished_at.is_some());
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_worker_runs_by_priority_then_fifo() {
    let (queue, _store) = queue_with(fast_config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    queue
        .register_handler(
            TaskType::FileRename,
            move |_context: ExecutionContext, payload: Vec<u8>| {
                let recorder = recorder.clone();
                async move {
                    recorder
                        .lock()
                        .unwrap()
                        .push(String::from_utf8(payload.clone()).unwrap());
                    Ok::<Vec<u8>, CoreError>(payload)
                }
            },
        )
        .unwrap();

    // Persisted before start; start() dispatches them in priority order.
    let mut ids = Vec::new();
    for (label, priority) in [("low-a", 0), ("high", 5), ("mid", 1), ("low-b", 0)] {
        let task = queue
            .enqueue(TaskType::FileRename, label.as_bytes().to_vec(), priority)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        ids.push(task.id);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    queue.start().await.unwrap();

    for id in &ids {
        wait_for_status(&queue, *id, TaskStatus::Completed).await;
    }
    assert_eq!(*seen.lock().unwrap(), vec!["high", "mid", "low-a", "low-b"]);
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_buffer_rejects_and_fails_the_new_row() {
    let config = QueueConfig {
        buffer_capacity: 1,
        ..fast_config()
    };
    let (queue, store) = queue_with(config);
    queue
        .register_handler(TaskType::FileClassify, wait_until_cancelled)
        .unwrap();
    queue.start().await.unwrap();

    let running = queue.enqueue(TaskType::FileClassify, Vec::new(), 0).await.unwrap();
    wait_for_status(&queue, running.id, TaskStatus::Running).await;
    let buffered = queue.enqueue(TaskType::FileClassify, Vec::new(), 0).await.unwrap();

    let error = queue
        .enqueue(TaskType::FileClassify, Vec::new(), 0)
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::CapacityExceeded);
    assert_eq!(error.message, QUEUE_FULL_MESSAGE);

    let rejected = store
        .list_recent_tasks(10)
        .unwrap()
        .into_iter()
        .find(|task| task.id != running.id && task.id != buffered.id)
        .expect("rejected row must be persisted");
    assert_eq!(rejected.status, TaskStatus::Failed);
    assert_eq!(rejected.error.as_deref(), Some(QUEUE_FULL_MESSAGE));

    queue.cancel_task(running.id).await.unwrap();
    queue.cancel_task(buffered.id).await.unwrap();
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_a_buffered_task_prevents_execution() {
    let (queue, _store) = queue_with(fast_config());
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    queue
        .register_handler(TaskType::FileClassify, wait_until_cancelled)
        .unwrap();
    queue
        .register_handler(
            TaskType::FileRename,
            move |_context: ExecutionContext, _payload: Vec<u8>| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<Vec<u8>, CoreError>(Vec::new()) }
            },
        )
        .unwrap();
    queue.start().await.unwrap();

    let blocker = queue.enqueue(TaskType::FileClassify, Vec::new(), 0).await.unwrap();
    wait_for_status(&queue, blocker.id, TaskStatus::Running).await;
    let waiting = queue.enqueue(TaskType::FileRename, Vec::new(), 0).await.unwrap();

    queue.cancel_task(waiting.id).await.unwrap();
    queue.cancel_task(blocker.id).await.unwrap();

    let cancelled = wait_for_status(&queue, waiting.id, TaskStatus::Failed).await;
    assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_BY_USER));
    let blocker = wait_for_status(&queue, blocker.id, TaskStatus::Failed).await;
    assert_eq!(blocker.error.as_deref(), Some(CANCELLED_BY_USER));

    // Give the worker a chance to pop the cancelled entry.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_a_finished_or_unknown_task_is_not_found() {
    let (queue, _store) = queue_with(fast_config());
    queue.register_handler(TaskType::FileClassify, echo).unwrap();
    queue.start().await.unwrap();

    let task = queue
        .enqueue_and_wait(
            &CancellationToken::new(),
            Some(Duration::from_secs(5)),
            TaskType::FileClassify,
            Vec::new(),
            0,
        )
        .await
        .unwrap();

    let finished = queue.cancel_task(task.id).await.unwrap_err();
    assert_eq!(finished.kind, CoreErrorKind::NotFound);
    let unknown = queue.cancel_task(TaskId(4_242)).await.unwrap_err();
    assert_eq!(unknown.kind, CoreErrorKind::NotFound);
    let missing = queue.get_task(TaskId(4_242)).await.unwrap_err();
    assert_eq!(missing.message, "task '4242' not found");
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unregistered_task_type_fails_without_retry() {
    let (queue, _store) = queue_with(fast_config());
    queue.start().await.unwrap();

    let task = queue
        .enqueue_and_wait(
            &CancellationToken::new(),
            Some(Duration::from_secs(5)),
            TaskType::ScreenshotTag,
            Vec::new(),
            0,
        )
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error.as_deref(),
        Some("no handler registered for task type 'screenshot.tag'")
    );
    assert_eq!(task.retry_count, 0);
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retryable_failures_are_retried_until_success() {
    let (queue, _store) = queue_with(fast_config());
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let recorder = attempts.clone();
    queue
        .register_handler(
            TaskType::FileClassify,
            move |context: ExecutionContext, _payload: Vec<u8>| {
                let recorder = recorder.clone();
                async move {
                    recorder.lock().unwrap().push(context.attempt);
                    if context.attempt < 3 {
                        return Err(CoreError::new(CoreErrorKind::Provider, "provider offline"));
                    }
                    Ok(b"done".to_vec())
                }
            },
        )
        .unwrap();
    queue.start().await.unwrap();

    let task = queue
        .enqueue_and_wait(
            &CancellationToken::new(),
            Some(Duration::from_secs(5)),
            TaskType::FileClassify,
            Vec::new(),
            0,
        )
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.retry_count, 2);
    assert_eq!(*attempts.lock().unwrap(), vec![1, 2, 3]);
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_retries_fail_with_last_error() {
    let config = QueueConfig {
        max_retries: 2,
        ..fast_config()
    };
    let (queue, _store) = queue_with(config);
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    queue
        .register_handler(
            TaskType::FileClassify,
            move |_context: ExecutionContext, _payload: Vec<u8>| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    Err::<Vec<u8>, CoreError>(CoreError::new(
                        CoreErrorKind::Io,
                        format!("attempt {attempt} failed"),
                    ))
                }
            },
        )
        .unwrap();
    queue.start().await.unwrap();

    let task = queue
        .enqueue_and_wait(
            &CancellationToken::new(),
            Some(Duration::from_secs(5)),
            TaskType::FileClassify,
            Vec::new(),
            0,
        )
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert_eq!(task.error.as_deref(), Some("attempt 3 failed"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn permanent_failures_are_not_retried() {
    let (queue, _store) = queue_with(fast_config());
    queue.register_handler(TaskType::FileRename, invalid).unwrap();
    queue.start().await.unwrap();

    let task = queue
        .enqueue_and_wait(
            &CancellationToken::new(),
            Some(Duration::from_secs(5)),
            TaskType::FileRename,
            Vec::new(),
            0,
        )
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 0);
    assert_eq!(task.error.as_deref(), Some("payload is not a path"));
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_handler_fails_the_task_and_the_worker_survives() {
    let config = QueueConfig {
        max_retries: 0,
        ..fast_config()
    };
    let (queue, _store) = queue_with(config);
    queue.register_handler(TaskType::ScreenshotTag, panicking).unwrap();
    queue.register_handler(TaskType::FileClassify, echo).unwrap();
    queue.start().await.unwrap();

    let token = CancellationToken::new();
    let panicked = queue
        .enqueue_and_wait(
            &token,
            Some(Duration::from_secs(5)),
            TaskType::ScreenshotTag,
            Vec::new(),
            0,
        )
        .await
        .unwrap();
    assert_eq!(panicked.status, TaskStatus::Failed);
    assert_eq!(panicked.error.as_deref(), Some("task handler panicked"));

    let next = queue
        .enqueue_and_wait(
            &token,
            Some(Duration::from_secs(5)),
            TaskType::FileClassify,
            b"after".to_vec(),
            0,
        )
        .await
        .unwrap();
    assert_eq!(next.status, TaskStatus::Completed);
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_handler_times_out() {
    let config = QueueConfig {
        max_retries: 0,
        task_timeout: Duration::from_millis(100),
        ..fast_config()
    };
    let (queue, _store) = queue_with(config);
    queue
        .register_handler(
            TaskType::FileClassify,
            |context: ExecutionContext, _payload: Vec<u8>| async move {
                context.sleep(Duration::from_secs(10)).await?;
                Ok::<Vec<u8>, CoreError>(Vec::new())
            },
        )
        .unwrap();
    queue.start().await.unwrap();

    let task = queue
        .enqueue_and_wait(
            &CancellationToken::new(),
            Some(Duration::from_secs(5)),
            TaskType::FileClassify,
            Vec::new(),
            0,
        )
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("task timed out after 100ms"));
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_handler_finishes_its_work_within_the_grace_period() {
    let config = QueueConfig {
        max_retries: 0,
        task_timeout: Duration::from_millis(50),
        cancel_grace: Duration::from_secs(2),
        ..fast_config()
    };
    let (queue, _store) = queue_with(config);
    let finished = Arc::new(AtomicU32::new(0));
    let observed = finished.clone();
    queue
        .register_handler(
            TaskType::PipelineAutoFile,
            move |context: ExecutionContext, _payload: Vec<u8>| {
                let observed = observed.clone();
                async move {
                    context.cancellation().cancelled().await;
                    // Stands in for a mutation that must complete once started.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    observed.fetch_add(1, Ordering::SeqCst);
                    Err::<Vec<u8>, CoreError>(CoreError::cancelled())
                }
            },
        )
        .unwrap();
    queue.start().await.unwrap();

    let task = queue
        .enqueue_and_wait(
            &CancellationToken::new(),
            Some(Duration::from_secs(5)),
            TaskType::PipelineAutoFile,
            Vec::new(),
            0,
        )
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("task timed out after 50ms"));
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waiting_caller_can_give_up_without_failing_the_task() {
    let (queue, _store) = queue_with(fast_config());
    queue
        .register_handler(TaskType::FileClassify, wait_until_cancelled)
        .unwrap();
    queue.start().await.unwrap();

    let error = queue
        .enqueue_and_wait(
            &CancellationToken::new(),
            Some(Duration::from_millis(50)),
            TaskType::FileClassify,
            Vec::new(),
            0,
        )
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::Timeout);

    let token = CancellationToken::new();
    token.cancel();
    let error = queue
        .enqueue_and_wait(&token, None, TaskType::FileClassify, Vec::new(), 0)
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::Cancelled);

    let unfinished = queue
        .list_tasks(0)
        .await
        .unwrap()
        .into_iter()
        .filter(|task| !task.is_terminal())
        .count();
    assert_eq!(unfinished, 2);
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn registration_and_restart_are_rejected_once_started() {
    let (queue, _store) = queue_with(fast_config());
    queue.start().await.unwrap();

    let error = queue.register_handler(TaskType::FileClassify, echo).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    let error = queue.start().await.unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupted_tasks_are_recovered_on_start() {
    let path = test_db_path("queue-recovery");
    let interrupted = {
        let store = SqliteStore::open(&path).unwrap();
        store.migrate_to_latest().unwrap();
        let task = store
            .create_task(&NewTask {
                task_type: TaskType::FileClassify,
                priority: 0,
                payload: b"recovered".to_vec(),
                max_retries: 3,
                created_at: SystemTime::now(),
            })
            .unwrap();
        assert!(store.mark_task_running(task.id, SystemTime::now()).unwrap());
        task.id
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    store.migrate_to_latest().unwrap();
    let queue = TaskQueue::new(store.clone(), fast_config());
    queue.register_handler(TaskType::FileClassify, echo).unwrap();
    queue.start().await.unwrap();

    let task = wait_for_status(&queue, interrupted, TaskStatus::Completed).await;
    assert_eq!(task.result.as_deref(), Some(&b"recovered"[..]));

    queue.stop().await;
    drop(queue);
    drop(store);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_leaves_in_flight_rows_for_recovery() {
    let (queue, store) = queue_with(fast_config());
    queue
        .register_handler(
            TaskType::FileClassify,
            |context: ExecutionContext, _payload: Vec<u8>| async move {
                context.sleep(Duration::from_secs(10)).await?;
                Ok::<Vec<u8>, CoreError>(Vec::new())
            },
        )
        .unwrap();
    queue.start().await.unwrap();

    let task = queue.enqueue(TaskType::FileClassify, Vec::new(), 0).await.unwrap();
    wait_for_status(&queue, task.id, TaskStatus::Running).await;
    queue.stop().await;

    let row = store.get_task(task.id).unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Running);
    assert_eq!(store.requeue_interrupted_tasks().unwrap(), 1);
}
