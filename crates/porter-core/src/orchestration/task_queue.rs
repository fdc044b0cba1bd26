use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::{
    CANCELLED_BY_USER, CoreError, CoreErrorKind, NewTask, Task, TaskId, TaskType,
};
use crate::orchestration::dispatch::{DispatchBuffer, DispatchEntry, PushError};
use crate::orchestration::{ExecutionContext, OrchestrationResult, TaskHandler};
use crate::persistence::{PersistenceResult, TaskStore};

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const QUEUE_FULL_MESSAGE: &str = "task queue full";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub task_timeout: Duration,
    pub buffer_capacity: usize,
    pub poll_interval: Duration,
    /// How long a timed-out handler gets to observe its cancelled context
    /// before it is aborted.
    pub cancel_grace: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            task_timeout: Duration::from_secs(30),
            buffer_capacity: 100,
            poll_interval: Duration::from_millis(100),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// Durable, priority-ordered, retrying task executor.
///
/// Rows live in the [`TaskStore`]; the in-memory dispatch buffer only holds
/// ids waiting for a worker, so anything lost from it on shutdown is picked
/// up again by the next [`TaskQueue::start`].
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    config: QueueConfig,
    store: Arc<dyn TaskStore>,
    buffer: DispatchBuffer,
    handlers: RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>,
    started: AtomicBool,
    shutdown: CancellationToken,
    running: Mutex<HashMap<TaskId, CancellationToken>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn TaskStore>, config: QueueConfig) -> Self {
        let buffer = DispatchBuffer::new(config.buffer_capacity);
        Self {
            inner: Arc::new(QueueInner {
                config,
                store,
                buffer,
                handlers: RwLock::new(HashMap::new()),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                running: Mutex::new(HashMap::new()),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn register_handler(
        &self,
        task_type: TaskType,
        handler: impl TaskHandler + 'static,
    ) -> OrchestrationResult<()> {
        if self.is_started() {
            return Err(CoreError::invalid_input(format!(
                "cannot register handler for '{task_type}' after the task queue has started"
            )));
        }
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.insert(task_type, Arc::new(handler));
        Ok(())
    }

    /// Recovers interrupted work and launches the worker pool.
    pub async fn start(&self) -> OrchestrationResult<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::invalid_input("task queue already started"));
        }

        let requeued = run_blocking(&self.inner.store, |store| {
            store.requeue_interrupted_tasks()
        })
        .await?;
        let pending = run_blocking(&self.inner.store, |store| store.list_unfinished_tasks()).await?;

        let mut overflow = Vec::new();
        for task in &pending {
            match self.inner.buffer.try_push(DispatchEntry::for_task(task)) {
                Ok(()) => {}
                Err(PushError::Full(entry)) => overflow.push(entry),
                Err(PushError::Closed(_)) => break,
            }
        }

        tracing::info!(
            requeued,
            recovered = pending.len(),
            overflow = overflow.len(),
            workers = self.inner.config.max_concurrent,
            "task queue starting"
        );

        let mut workers = self.inner.workers();
        if !overflow.is_empty() {
            let inner = self.inner.clone();
            workers.push(tokio::spawn(async move {
                for entry in overflow {
                    if inner.buffer.push(entry).await.is_err() {
                        break;
                    }
                }
            }));
        }
        for worker_index in 0..self.inner.config.max_concurrent.max(1) {
            let inner = self.inner.clone();
            workers.push(tokio::spawn(worker_loop(inner, worker_index)));
        }

        Ok(())
    }

    /// Cancels running handlers, closes the buffer and joins the workers.
    /// Rows that were mid-flight stay `running` and are requeued on the next
    /// start.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        self.inner.buffer.close();
        let workers = std::mem::take(&mut *self.inner.workers());
        for worker in workers {
            let _ = worker.await;
        }
        tracing::info!("task queue stopped");
    }

    pub async fn enqueue(
        &self,
        task_type: TaskType,
        payload: Vec<u8>,
        priority: i32,
    ) -> OrchestrationResult<Task> {
        let new_task = NewTask {
            task_type,
            priority,
            payload,
            max_retries: self.inner.config.max_retries,
            created_at: SystemTime::now(),
        };
        let task = run_blocking(&self.inner.store, move |store| store.create_task(&new_task)).await?;

        // Before start the row is only persisted; start() dispatches it.
        if !self.is_started() {
            tracing::debug!(task_id = task.id.0, task_type = %task_type, "task persisted before start");
            return Ok(task);
        }

        match self.inner.buffer.try_push(DispatchEntry::for_task(&task)) {
            Ok(()) => {
                tracing::debug!(
                    task_id = task.id.0,
                    task_type = %task_type,
                    priority,
                    "task enqueued"
                );
                Ok(task)
            }
            Err(PushError::Full(_)) => {
                let task_id = task.id;
                run_blocking(&self.inner.store, move |store| {
                    store.mark_task_failed(task_id, QUEUE_FULL_MESSAGE, SystemTime::now())
                })
                .await?;
                tracing::warn!(task_id = task_id.0, task_type = %task_type, "task queue full");
                Err(CoreError::new(
                    CoreErrorKind::CapacityExceeded,
                    QUEUE_FULL_MESSAGE,
                ))
            }
            Err(PushError::Closed(_)) => Err(CoreError::internal("task queue is shutting down")),
        }
    }

    /// Enqueues and polls until the task is terminal. Only terminal tasks are
    /// returned; cancellation and timeout surface as errors.
    pub async fn enqueue_and_wait(
        &self,
        cancellation: &CancellationToken,
        timeout: Option<Duration>,
        task_type: TaskType,
        payload: Vec<u8>,
        priority: i32,
    ) -> OrchestrationResult<Task> {
        let task = self.enqueue(task_type, payload, priority).await?;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let task_id = task.id;
            let current = run_blocking(&self.inner.store, move |store| store.get_task(task_id))
                .await?
                .ok_or_else(|| task_not_found(task_id))?;
            if current.is_terminal() {
                return Ok(current);
            }

            let poll = tokio::time::sleep(self.inner.config.poll_interval);
            let expired = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = cancellation.cancelled() => return Err(CoreError::cancelled()),
                _ = expired => {
                    return Err(CoreError::new(
                        CoreErrorKind::Timeout,
                        format!("timed out waiting for task '{task_id}'"),
                    ));
                }
                _ = poll => {}
            }
        }
    }

    /// Forces a pending or running task to failed. Running handlers observe
    /// the cancellation through their context; nothing is aborted.
    pub async fn cancel_task(&self, task_id: TaskId) -> OrchestrationResult<()> {
        let task = run_blocking(&self.inner.store, move |store| store.get_task(task_id))
            .await?
            .filter(|task| !task.is_terminal())
            .ok_or_else(|| not_cancellable(task_id))?;

        let updated = run_blocking(&self.inner.store, move |store| {
            store.mark_task_failed(task_id, CANCELLED_BY_USER, SystemTime::now())
        })
        .await?;
        if !updated {
            return Err(not_cancellable(task_id));
        }

        if let Some(token) = self.inner.running().get(&task_id) {
            token.cancel();
        }
        tracing::info!(task_id = task_id.0, task_type = %task.task_type, "task cancelled");
        Ok(())
    }

    pub async fn get_task(&self, task_id: TaskId) -> OrchestrationResult<Task> {
        run_blocking(&self.inner.store, move |store| store.get_task(task_id))
            .await?
            .ok_or_else(|| task_not_found(task_id))
    }

    pub async fn list_tasks(&self, limit: usize) -> OrchestrationResult<Vec<Task>> {
        let limit = if limit == 0 { DEFAULT_LIST_LIMIT } else { limit };
        run_blocking(&self.inner.store, move |store| store.list_recent_tasks(limit)).await
    }

    pub async fn prune_finished(&self, max_age: Duration) -> OrchestrationResult<usize> {
        run_blocking(&self.inner.store, move |store| store.prune_finished_tasks(max_age)).await
    }
}

impl QueueInner {
    fn handler(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&task_type)
            .cloned()
    }

    fn running(&self) -> MutexGuard<'_, HashMap<TaskId, CancellationToken>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn worker_loop(inner: Arc<QueueInner>, worker_index: usize) {
    tracing::debug!(worker_index, "task worker started");
    while let Some(entry) = inner.buffer.pop().await {
        if let Err(error) = execute_entry(&inner, entry).await {
            tracing::error!(
                worker_index,
                task_id = entry.task_id.0,
                kind = ?error.kind,
                error = %error.message,
                "failed to persist task transition"
            );
        }
    }
    tracing::debug!(worker_index, "task worker exiting");
}

async fn execute_entry(inner: &Arc<QueueInner>, entry: DispatchEntry) -> OrchestrationResult<()> {
    let task_id = entry.task_id;
    let Some(task) = run_blocking(&inner.store, move |store| store.get_task(task_id)).await? else {
        tracing::warn!(task_id = task_id.0, "dispatched task no longer exists");
        return Ok(());
    };
    if task.is_terminal() {
        tracing::debug!(task_id = task_id.0, status = task.status.as_str(), "skipping finished task");
        return Ok(());
    }

    let Some(handler) = inner.handler(task.task_type) else {
        let message = format!("no handler registered for task type '{}'", task.task_type);
        tracing::warn!(task_id = task_id.0, task_type = %task.task_type, "{message}");
        run_blocking(&inner.store, move |store| {
            store.mark_task_failed(task_id, &message, SystemTime::now())
        })
        .await?;
        return Ok(());
    };

    let claimed = run_blocking(&inner.store, move |store| {
        store.mark_task_running(task_id, SystemTime::now())
    })
    .await?;
    if !claimed {
        tracing::debug!(task_id = task_id.0, "task already claimed or cancelled");
        return Ok(());
    }

    let token = inner.shutdown.child_token();
    inner.running().insert(task_id, token.clone());

    let attempt = task.retry_count + 1;
    let context = ExecutionContext::for_task(
        task_id,
        task.task_type,
        attempt,
        inner.config.task_timeout,
        token.clone(),
    );
    tracing::debug!(task_id = task_id.0, task_type = %task.task_type, attempt, "task running");

    let outcome = run_handler(
        handler.as_ref(),
        context,
        task.payload.clone(),
        &inner.config,
        &token,
    )
    .await;
    inner.running().remove(&task_id);

    match outcome {
        Ok(result) => {
            let completed = run_blocking(&inner.store, move |store| {
                store.mark_task_completed(task_id, &result, SystemTime::now())
            })
            .await?;
            if completed {
                tracing::info!(task_id = task_id.0, task_type = %task.task_type, attempt, "task completed");
            } else {
                tracing::debug!(task_id = task_id.0, "task finished after it was cancelled");
            }
        }
        Err(_) if inner.shutdown.is_cancelled() => {
            tracing::info!(task_id = task_id.0, "task interrupted by shutdown; left for recovery");
        }
        Err(error) if error.kind.is_retryable() && task.retry_count < task.max_retries => {
            let retry_count = task.retry_count + 1;
            let retrying = run_blocking(&inner.store, move |store| {
                store.mark_task_retrying(task_id, retry_count)
            })
            .await?;
            if retrying {
                tracing::warn!(
                    task_id = task_id.0,
                    task_type = %task.task_type,
                    retry_count,
                    max_retries = task.max_retries,
                    kind = ?error.kind,
                    error = %error.message,
                    "task failed; scheduling retry"
                );
                schedule_retry(inner.clone(), entry);
            }
        }
        Err(error) => {
            let message = error.message;
            tracing::warn!(
                task_id = task_id.0,
                task_type = %task.task_type,
                kind = ?error.kind,
                error = %message,
                "task failed"
            );
            run_blocking(&inner.store, move |store| {
                store.mark_task_failed(task_id, &message, SystemTime::now())
            })
            .await?;
        }
    }

    Ok(())
}

async fn run_handler(
    handler: &dyn TaskHandler,
    context: ExecutionContext,
    payload: Vec<u8>,
    config: &QueueConfig,
    token: &CancellationToken,
) -> Result<Vec<u8>, CoreError> {
    let mut join = tokio::spawn(handler.handle(context, payload));

    let joined = match tokio::time::timeout(config.task_timeout, &mut join).await {
        Ok(joined) => joined,
        Err(_) => {
            // The handler gets `cancel_grace` to return on its own.
            token.cancel();
            if tokio::time::timeout(config.cancel_grace, &mut join)
                .await
                .is_err()
            {
                tracing::warn!(
                    grace = ?config.cancel_grace,
                    "task handler ignored cancellation; aborting"
                );
                join.abort();
            }
            return Err(CoreError::new(
                CoreErrorKind::Timeout,
                format!("task timed out after {}", format_timeout(config.task_timeout)),
            ));
        }
    };

    match joined {
        Ok(result) => result,
        Err(join_error) if join_error.is_panic() => {
            Err(CoreError::internal("task handler panicked"))
        }
        Err(_) => Err(CoreError::cancelled()),
    }
}

/// Whole seconds as `30s`, anything finer as milliseconds.
fn format_timeout(timeout: Duration) -> String {
    if timeout.subsec_millis() == 0 && timeout.as_secs() > 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}

fn schedule_retry(inner: Arc<QueueInner>, entry: DispatchEntry) {
    tokio::spawn(async move {
        tokio::select! {
            _ = inner.shutdown.cancelled() => return,
            _ = tokio::time::sleep(inner.config.retry_delay) => {}
        }
        if inner.buffer.push(entry).await.is_err() {
            tracing::debug!(task_id = entry.task_id.0, "retry dropped; queue is stopping");
        }
    });
}

async fn run_blocking<T, F>(store: &Arc<dyn TaskStore>, operation: F) -> OrchestrationResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn TaskStore) -> PersistenceResult<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || operation(store.as_ref()))
        .await
        .map_err(|join_error| {
            CoreError::internal(format!("task persistence join failure: {join_error}"))
        })?
}

fn task_not_found(task_id: TaskId) -> CoreError {
    CoreError::not_found(format!("task '{task_id}' not found"))
}

fn not_cancellable(task_id: TaskId) -> CoreError {
    CoreError::not_found(format!("task '{task_id}' not found or already finished"))
}
