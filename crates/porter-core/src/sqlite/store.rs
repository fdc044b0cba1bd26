use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::models::{
    CoreError, CoreErrorKind, NewOperation, NewTask, Operation, OperationType, Task, TaskId,
    TaskStatus, TaskType,
};
use crate::persistence::{MigrationStore, OperationStore, PersistenceResult, TaskStore};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "porter_schema_migrations";

const TASK_COLUMNS: &str = "task_id, task_type, priority, payload, status, result, error, \
    created_at_unix_ms, started_at_unix_ms, finished_at_unix_ms, retry_count, max_retries";

const OPERATION_COLUMNS: &str =
    "operation_id, task_id, operation_type, original_path, new_path, created_at_unix_ms";

/// The process-wide SQLite store backing task history and the undo ledger.
///
/// The connection is opened once and serialized behind a mutex; every call
/// holds it only for the duration of one short statement or transaction.
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(database_path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let connection = open_connection(database_path.as_ref())
            .map_err(|error| storage_error("open", error))?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    pub fn open_in_memory() -> PersistenceResult<Self> {
        let connection =
            Connection::open_in_memory().map_err(|error| storage_error("open", error))?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    /// Cheap liveness probe used by the health endpoint.
    pub fn ping(&self) -> PersistenceResult<()> {
        self.with_connection("ping", |connection| {
            connection.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }

    fn lock(&self, operation_name: &str) -> PersistenceResult<MutexGuard<'_, Connection>> {
        self.connection.lock().map_err(|_| {
            storage_error_text(operation_name, "sqlite connection mutex poisoned")
        })
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = self.lock(operation_name)?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        if target_version > 0 && migration(target_version).is_none() {
            return Err(storage_error_text(
                "apply_migration",
                format!("migration version '{target_version}' is not defined"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version == current_version {
                // Re-apply all DDL in case the version was recorded but tables
                // went missing. Every statement is IF NOT EXISTS.
                for version in 1..=target_version {
                    connection.execute_batch(defined_migration(version)?.up_sql)?;
                }
                return Ok(());
            }

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    apply_up_migration(connection, defined_migration(version)?)?;
                }
            } else {
                for version in ((target_version + 1)..=current_version).rev() {
                    apply_down_migration(connection, defined_migration(version)?)?;
                }
            }

            Ok(())
        })
    }
}

impl TaskStore for SqliteStore {
    fn create_task(&self, task: &NewTask) -> PersistenceResult<Task> {
        self.with_connection("create_task", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO tasks (task_type, priority, payload, status, created_at_unix_ms, retry_count, max_retries)
VALUES (?1, ?2, ?3, 'pending', ?4, 0, ?5)
",
                params![
                    task.task_type.as_str(),
                    task.priority,
                    task.payload,
                    to_unix_millis(task.created_at)?,
                    task.max_retries,
                ],
            )?;
            let task_id = i64_to_u64(connection.last_insert_rowid())?;

            Ok(Task {
                id: TaskId(task_id),
                task_type: task.task_type,
                priority: task.priority,
                payload: task.payload.clone(),
                status: TaskStatus::Pending,
                result: None,
                error: None,
                created_at: task.created_at,
                started_at: None,
                finished_at: None,
                retry_count: 0,
                max_retries: task.max_retries,
            })
        })
    }

    fn get_task(&self, task_id: TaskId) -> PersistenceResult<Option<Task>> {
        self.with_connection("get_task", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1"),
                    params![task_id_to_i64(task_id)?],
                    task_from_row,
                )
                .optional()
        })
    }

    fn list_recent_tasks(&self, limit: usize) -> PersistenceResult<Vec<Task>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.with_connection("list_recent_tasks", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "
SELECT {TASK_COLUMNS}
FROM tasks
ORDER BY created_at_unix_ms DESC, task_id DESC
LIMIT ?1
"
            ))?;
            let rows = statement.query_map(params![to_i64(limit)?], task_from_row)?;
            rows.collect()
        })
    }

    fn list_unfinished_tasks(&self) -> PersistenceResult<Vec<Task>> {
        self.with_connection("list_unfinished_tasks", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "
SELECT {TASK_COLUMNS}
FROM tasks
WHERE status IN ('pending', 'running')
ORDER BY priority DESC, created_at_unix_ms ASC, task_id ASC
"
            ))?;
            let rows = statement.query_map([], task_from_row)?;
            rows.collect()
        })
    }

    fn requeue_interrupted_tasks(&self) -> PersistenceResult<usize> {
        self.with_connection("requeue_interrupted_tasks", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "UPDATE tasks SET status = 'pending' WHERE status = 'running'",
                [],
            )
        })
    }

    fn mark_task_running(
        &self,
        task_id: TaskId,
        started_at: SystemTime,
    ) -> PersistenceResult<bool> {
        self.with_connection("mark_task_running", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "
UPDATE tasks
SET status = 'running', started_at_unix_ms = ?2
WHERE task_id = ?1 AND status = 'pending'
",
                params![task_id_to_i64(task_id)?, to_unix_millis(started_at)?],
            )?;
            Ok(updated == 1)
        })
    }

    fn mark_task_completed(
        &self,
        task_id: TaskId,
        result: &[u8],
        finished_at: SystemTime,
    ) -> PersistenceResult<bool> {
        self.with_connection("mark_task_completed", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "
UPDATE tasks
SET status = 'completed', result = ?2, error = NULL, finished_at_unix_ms = ?3
WHERE task_id = ?1 AND status = 'running'
",
                params![
                    task_id_to_i64(task_id)?,
                    result,
                    to_unix_millis(finished_at)?
                ],
            )?;
            Ok(updated == 1)
        })
    }

    fn mark_task_retrying(&self, task_id: TaskId, retry_count: u32) -> PersistenceResult<bool> {
        self.with_connection("mark_task_retrying", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "
UPDATE tasks
SET status = 'pending', retry_count = ?2
WHERE task_id = ?1 AND status = 'running' AND ?2 <= max_retries
",
                params![task_id_to_i64(task_id)?, retry_count],
            )?;
            Ok(updated == 1)
        })
    }

    fn mark_task_failed(
        &self,
        task_id: TaskId,
        error: &str,
        finished_at: SystemTime,
    ) -> PersistenceResult<bool> {
        self.with_connection("mark_task_failed", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "
UPDATE tasks
SET status = 'failed', error = ?2, finished_at_unix_ms = ?3
WHERE task_id = ?1 AND status IN ('pending', 'running')
",
                params![task_id_to_i64(task_id)?, error, to_unix_millis(finished_at)?],
            )?;
            Ok(updated == 1)
        })
    }

    fn prune_finished_tasks(&self, max_age: Duration) -> PersistenceResult<usize> {
        self.with_connection("prune_finished_tasks", |connection| {
            ensure_schema_ready(connection)?;
            let cutoff = SystemTime::now()
                .checked_sub(max_age)
                .unwrap_or(UNIX_EPOCH);
            connection.execute(
                "
DELETE FROM tasks
WHERE status IN ('completed', 'failed')
  AND created_at_unix_ms < ?1
",
                params![to_unix_millis(cutoff)?],
            )
        })
    }
}

impl OperationStore for SqliteStore {
    fn insert_operation(&self, operation: &NewOperation) -> PersistenceResult<Operation> {
        self.with_connection("insert_operation", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO file_operations (task_id, operation_type, original_path, new_path, created_at_unix_ms)
VALUES (?1, ?2, ?3, ?4, ?5)
",
                params![
                    task_id_to_i64(operation.task_id)?,
                    operation.operation_type.as_str(),
                    path_to_text(&operation.original_path)?,
                    path_to_text(&operation.new_path)?,
                    to_unix_millis(operation.created_at)?,
                ],
            )?;

            Ok(Operation {
                id: i64_to_u64(connection.last_insert_rowid())?,
                task_id: operation.task_id,
                operation_type: operation.operation_type,
                original_path: operation.original_path.clone(),
                new_path: operation.new_path.clone(),
                created_at: operation.created_at,
            })
        })
    }

    fn list_operations_for_task(&self, task_id: TaskId) -> PersistenceResult<Vec<Operation>> {
        self.with_connection("list_operations_for_task", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "
SELECT {OPERATION_COLUMNS}
FROM file_operations
WHERE task_id = ?1
ORDER BY created_at_unix_ms DESC, operation_id DESC
"
            ))?;
            let rows = statement.query_map(params![task_id_to_i64(task_id)?], operation_from_row)?;
            rows.collect()
        })
    }

    fn delete_operations_for_task(&self, task_id: TaskId) -> PersistenceResult<usize> {
        self.with_connection("delete_operations_for_task", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "DELETE FROM file_operations WHERE task_id = ?1",
                params![task_id_to_i64(task_id)?],
            )
        })
    }

    fn delete_operations_before(&self, cutoff: SystemTime) -> PersistenceResult<usize> {
        self.with_connection("delete_operations_before", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "DELETE FROM file_operations WHERE created_at_unix_ms < ?1",
                params![to_unix_millis(cutoff)?],
            )
        })
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let task_id_raw: i64 = row.get(0)?;
    let task_type_raw: String = row.get(1)?;
    let status_raw: String = row.get(4)?;
    let started_at: Option<i64> = row.get(8)?;
    let finished_at: Option<i64> = row.get(9)?;

    Ok(Task {
        id: TaskId(i64_to_u64(task_id_raw)?),
        task_type: parse_task_type(&task_type_raw)?,
        priority: row.get(2)?,
        payload: row.get::<_, Option<Vec<u8>>>(3)?.unwrap_or_default(),
        status: parse_task_status(&status_raw)?,
        result: row.get(5)?,
        error: row.get(6)?,
        created_at: from_unix_millis(row.get(7)?)?,
        started_at: started_at.map(from_unix_millis).transpose()?,
        finished_at: finished_at.map(from_unix_millis).transpose()?,
        retry_count: row.get(10)?,
        max_retries: row.get(11)?,
    })
}

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<Operation> {
    let operation_id: i64 = row.get(0)?;
    let task_id: i64 = row.get(1)?;
    let operation_type_raw: String = row.get(2)?;
    let original_path: String = row.get(3)?;
    let new_path: String = row.get(4)?;

    Ok(Operation {
        id: i64_to_u64(operation_id)?,
        task_id: TaskId(i64_to_u64(task_id)?),
        operation_type: parse_operation_type(&operation_type_raw)?,
        original_path: PathBuf::from(original_path),
        new_path: PathBuf::from(new_path),
        created_at: from_unix_millis(row.get(5)?)?,
    })
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    let connection = Connection::open(database_path)?;
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    Ok(connection)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))?;
    Ok(())
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version <= 0 {
        return Err(storage_error_sqlite(
            "database schema is not initialized; apply migrations before task operations",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn defined_migration(version: i64) -> rusqlite::Result<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        storage_error_sqlite(&format!("migration version '{version}' is not defined"))
    })
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()?;
    Ok(())
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()?;
    Ok(())
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    storage_error_text(operation, error.to_string())
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn parse_task_type(raw: &str) -> rusqlite::Result<TaskType> {
    raw.parse::<TaskType>()
        .map_err(|error| storage_error_sqlite(&format!("{error} in sqlite record")))
}

fn parse_task_status(raw: &str) -> rusqlite::Result<TaskStatus> {
    raw.parse::<TaskStatus>()
        .map_err(|error| storage_error_sqlite(&format!("{error} in sqlite record")))
}

fn parse_operation_type(raw: &str) -> rusqlite::Result<OperationType> {
    raw.parse::<OperationType>()
        .map_err(|error| storage_error_sqlite(&format!("{error} in sqlite record")))
}

fn path_to_text(path: &Path) -> rusqlite::Result<&str> {
    path.to_str()
        .ok_or_else(|| storage_error_sqlite("paths must be valid UTF-8 to be ledgered"))
}

fn to_unix_millis(value: SystemTime) -> rusqlite::Result<i64> {
    let duration = value.duration_since(UNIX_EPOCH).map_err(|error| {
        storage_error_sqlite(&format!("time before unix epoch is not supported: {error}"))
    })?;
    i64::try_from(duration.as_millis())
        .map_err(|_| storage_error_sqlite("unix timestamp millis exceed i64 range"))
}

fn from_unix_millis(value: i64) -> rusqlite::Result<SystemTime> {
    let millis = u64::try_from(value)
        .map_err(|_| storage_error_sqlite("negative unix timestamps are not supported"))?;
    Ok(UNIX_EPOCH + Duration::from_millis(millis))
}

fn task_id_to_i64(value: TaskId) -> rusqlite::Result<i64> {
    i64::try_from(value.0).map_err(|_| storage_error_sqlite("task id exceeds i64 range"))
}

fn i64_to_u64(value: i64) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| storage_error_sqlite("negative row id in sqlite record"))
}

fn to_i64(value: usize) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| storage_error_sqlite("value exceeds i64 range"))
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("sqlite store '{operation}' failed: {}", message.as_ref()),
    )
}
