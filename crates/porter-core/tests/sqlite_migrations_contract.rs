use std::time::SystemTime;

use porter_core::models::{CoreErrorKind, NewOperation, NewTask, OperationType, TaskId, TaskType};
use porter_core::persistence::{MigrationStore, OperationStore, TaskStore};
use porter_core::sqlite::{SqliteStore, current_schema_version, migration, migrations};

#[test]
fn migration_versions_are_strictly_increasing() {
    let entries = migrations();
    assert!(!entries.is_empty());

    let mut previous = 0;
    for entry in entries {
        assert!(entry.version > previous);
        previous = entry.version;
    }
}

#[test]
fn migration_lookup_and_schema_version_are_consistent() {
    let latest = current_schema_version();
    let latest_entry = migration(latest).expect("latest migration must exist");
    assert_eq!(latest_entry.version, latest);
}

#[test]
fn migration_sql_is_defined_for_up_and_down_paths() {
    for entry in migrations() {
        assert!(!entry.up_sql.trim().is_empty(), "up sql must not be empty");
        assert!(
            !entry.down_sql.trim().is_empty(),
            "down sql must not be empty"
        );
    }
}

#[test]
fn planned_migrations_include_versions_after_requested_version() {
    let store = SqliteStore::open_in_memory().unwrap();
    let planned = store.planned_migrations(0);

    assert_eq!(planned.len(), migrations().len());
    assert_eq!(planned[0].version, 1);
    assert!(store.planned_migrations(current_schema_version()).is_empty());
}

#[test]
fn migrating_up_down_and_up_again_tracks_the_version() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert_eq!(store.current_version().unwrap(), 0);

    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());

    // Re-applying the current version is a no-op.
    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());

    store.apply_migration(0).unwrap();
    assert_eq!(store.current_version().unwrap(), 0);

    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());
}

#[test]
fn applying_undefined_migration_fails_with_storage_error() {
    let store = SqliteStore::open_in_memory().unwrap();
    let error = store
        .apply_migration(current_schema_version() + 1)
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
}

#[test]
fn rolling_back_the_ledger_migration_keeps_task_history() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.migrate_to_latest().unwrap();
    let task = store
        .create_task(&NewTask {
            task_type: TaskType::PipelineAutoFile,
            priority: 1,
            payload: br#"{"path":"/tmp/a.pdf"}"#.to_vec(),
            max_retries: 3,
            created_at: SystemTime::now(),
        })
        .unwrap();

    store.apply_migration(1).unwrap();
    assert_eq!(store.current_version().unwrap(), 1);
    assert!(store.get_task(task.id).unwrap().is_some());

    let error = store
        .insert_operation(&NewOperation::new(
            TaskId(task.id.0),
            OperationType::Move,
            "/tmp/a.pdf",
            "/tmp/docs/a.pdf",
        ))
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
}
