use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use porter_core::models::{
    CoreErrorKind, NewOperation, NewTask, OperationType, TaskId, TaskStatus, TaskType,
};
use porter_core::persistence::{OperationStore, TaskStore};
use porter_core::sqlite::SqliteStore;

fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("porter-{test_name}-{nanos}.sqlite3"))
}

fn migrated_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    store.migrate_to_latest().unwrap();
    store
}

fn new_task(task_type: TaskType, priority: i32, created_at: SystemTime) -> NewTask {
    NewTask {
        task_type,
        priority,
        payload: br#"{"path":"/tmp/a.pdf"}"#.to_vec(),
        max_retries: 3,
        created_at,
    }
}

#[test]
fn task_operations_require_migrated_schema() {
    let store = SqliteStore::open_in_memory().unwrap();
    let error = store
        .create_task(&new_task(TaskType::FileClassify, 0, SystemTime::now()))
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
    assert!(error.message.contains("schema is not initialized"));
}

#[test]
fn created_task_round_trips_through_the_store() {
    let store = migrated_store();
    let created = store
        .create_task(&new_task(TaskType::PipelineAutoFile, 1, SystemTime::now()))
        .unwrap();

    assert_eq!(created.status, TaskStatus::Pending);
    assert_eq!(created.retry_count, 0);

    let loaded = store.get_task(created.id).unwrap().expect("task must exist");
    assert_eq!(loaded.task_type, TaskType::PipelineAutoFile);
    assert_eq!(loaded.priority, 1);
    assert_eq!(loaded.payload, created.payload);
    assert_eq!(loaded.max_retries, 3);
    assert!(loaded.started_at.is_none());

    assert!(store.get_task(TaskId(9_999)).unwrap().is_none());
}

#[test]
fn status_transitions_are_guarded() {
    let store = migrated_store();
    let task = store
        .create_task(&new_task(TaskType::FileRename, 0, SystemTime::now()))
        .unwrap();

    // Only running tasks can complete.
    assert!(!store.mark_task_completed(task.id, b"{}", SystemTime::now()).unwrap());

    assert!(store.mark_task_running(task.id, SystemTime::now()).unwrap());
    assert!(!store.mark_task_running(task.id, SystemTime::now()).unwrap());

    assert!(store.mark_task_completed(task.id, b"{\"ok\":true}", SystemTime::now()).unwrap());
    let completed = store.get_task(task.id).unwrap().unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
    assert_eq!(completed.result.as_deref(), Some(&b"{\"ok\":true}"[..]));
    assert!(completed.finished_at.is_some());

    // Terminal rows never move again.
    assert!(!store.mark_task_failed(task.id, "late", SystemTime::now()).unwrap());
    assert!(!store.mark_task_running(task.id, SystemTime::now()).unwrap());
}

#[test]
fn retrying_respects_the_retry_budget() {
    let store = migrated_store();
    let task = store
        .create_task(&NewTask {
            max_retries: 1,
            ..new_task(TaskType::FileClassify, 0, SystemTime::now())
        })
        .unwrap();

    assert!(store.mark_task_running(task.id, SystemTime::now()).unwrap());
    assert!(store.mark_task_retrying(task.id, 1).unwrap());
    let retried = store.get_task(task.id).unwrap().unwrap();
    assert_eq!(retried.status, TaskStatus::Pending);
    assert_eq!(retried.retry_count, 1);

    assert!(store.mark_task_running(task.id, SystemTime::now()).unwrap());
    assert!(!store.mark_task_retrying(task.id, 2).unwrap());
    assert!(store.mark_task_failed(task.id, "boom", SystemTime::now()).unwrap());

    let failed = store.get_task(task.id).unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("boom"));
    assert_eq!(failed.retry_count, 1);
}

#[test]
fn unfinished_tasks_are_ordered_by_priority_then_age() {
    let store = migrated_store();
    let base = SystemTime::now();
    let low_old = store
        .create_task(&new_task(TaskType::FileClassify, 0, base))
        .unwrap();
    let high_new = store
        .create_task(&new_task(TaskType::PipelineAutoFile, 1, base + Duration::from_secs(2)))
        .unwrap();
    let high_old = store
        .create_task(&new_task(TaskType::PipelineScreenshot, 1, base + Duration::from_secs(1)))
        .unwrap();
    let finished = store
        .create_task(&new_task(TaskType::FileRename, 5, base))
        .unwrap();
    store.mark_task_failed(finished.id, "gone", SystemTime::now()).unwrap();

    let order: Vec<TaskId> = store
        .list_unfinished_tasks()
        .unwrap()
        .into_iter()
        .map(|task| task.id)
        .collect();
    assert_eq!(order, vec![high_old.id, high_new.id, low_old.id]);
}

#[test]
fn recent_tasks_are_newest_first_and_limited() {
    let store = migrated_store();
    let base = SystemTime::now();
    let first = store.create_task(&new_task(TaskType::FileClassify, 0, base)).unwrap();
    let second = store
        .create_task(&new_task(TaskType::FileClassify, 0, base + Duration::from_secs(1)))
        .unwrap();
    let third = store
        .create_task(&new_task(TaskType::FileClassify, 0, base + Duration::from_secs(2)))
        .unwrap();

    let recent: Vec<TaskId> = store
        .list_recent_tasks(2)
        .unwrap()
        .into_iter()
        .map(|task| task.id)
        .collect();
    assert_eq!(recent, vec![third.id, second.id]);
    assert!(store.list_recent_tasks(0).unwrap().is_empty());
    assert_eq!(store.list_recent_tasks(10).unwrap().last().unwrap().id, first.id);
}

#[test]
fn interrupted_tasks_survive_reopen_and_are_requeued() {
    let path = test_db_path("store-requeue");
    let task_id = {
        let store = SqliteStore::open(&path).unwrap();
        store.migrate_to_latest().unwrap();
        let task = store
            .create_task(&new_task(TaskType::PipelineAutoFile, 1, SystemTime::now()))
            .unwrap();
        assert!(store.mark_task_running(task.id, SystemTime::now()).unwrap());
        task.id
    };

    let reopened = SqliteStore::open(&path).unwrap();
    reopened.migrate_to_latest().unwrap();
    assert_eq!(reopened.requeue_interrupted_tasks().unwrap(), 1);
    let task = reopened.get_task(task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    drop(reopened);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn pruning_removes_only_old_finished_tasks() {
    let store = migrated_store();
    let old = SystemTime::now() - Duration::from_secs(10 * 24 * 60 * 60);
    let old_done = store.create_task(&new_task(TaskType::FileClassify, 0, old)).unwrap();
    store.mark_task_failed(old_done.id, "x", SystemTime::now()).unwrap();
    let old_pending = store.create_task(&new_task(TaskType::FileClassify, 0, old)).unwrap();
    let fresh_done = store
        .create_task(&new_task(TaskType::FileClassify, 0, SystemTime::now()))
        .unwrap();
    store.mark_task_failed(fresh_done.id, "x", SystemTime::now()).unwrap();

    let pruned = store
        .prune_finished_tasks(Duration::from_secs(7 * 24 * 60 * 60))
        .unwrap();
    assert_eq!(pruned, 1);
    assert!(store.get_task(old_done.id).unwrap().is_none());
    assert!(store.get_task(old_pending.id).unwrap().is_some());
    assert!(store.get_task(fresh_done.id).unwrap().is_some());
}

#[test]
fn operations_are_listed_newest_first_and_deleted_per_task() {
    let store = migrated_store();
    let base = SystemTime::now();
    let mut first = NewOperation::new(
        TaskId(1),
        OperationType::Move,
        PathBuf::from("/tmp/in/a.pdf"),
        PathBuf::from("/tmp/out/a.pdf"),
    );
    first.created_at = base;
    let mut second = NewOperation::new(
        TaskId(1),
        OperationType::Rename,
        PathBuf::from("/tmp/out/a.pdf"),
        PathBuf::from("/tmp/out/b.pdf"),
    );
    second.created_at = base + Duration::from_secs(1);
    let other = NewOperation::new(
        TaskId(2),
        OperationType::Move,
        PathBuf::from("/tmp/in/c.pdf"),
        PathBuf::from("/tmp/out/c.pdf"),
    );

    store.insert_operation(&first).unwrap();
    store.insert_operation(&second).unwrap();
    store.insert_operation(&other).unwrap();

    let listed = store.list_operations_for_task(TaskId(1)).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].operation_type, OperationType::Rename);
    assert_eq!(listed[1].new_path, PathBuf::from("/tmp/out/a.pdf"));

    assert_eq!(store.delete_operations_for_task(TaskId(1)).unwrap(), 2);
    assert!(store.list_operations_for_task(TaskId(1)).unwrap().is_empty());
    assert_eq!(store.list_operations_for_task(TaskId(2)).unwrap().len(), 1);
}
