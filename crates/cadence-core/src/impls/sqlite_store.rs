//! SQLite task store.
//!
//! Execution marks live in their own table so that taking a lock is one
//! `INSERT ... SELECT ... WHERE NOT EXISTS` statement, and every write that
//! must only touch idle tasks is one `UPDATE ... WHERE NOT EXISTS`. SQLite
//! serializes writers, so these hold across processes sharing the file.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Params, Row, TransactionBehavior, params};
use ulid::Ulid;

use super::row::StoredRow;
use crate::domain::{
    ExecutionContext, ExecutionMark, ExecutionToken, FailureSnapshot, GroupDraft, GroupId,
    LastExecution, LastRun, SchedulerError, TaskDraft, TaskGroup, TaskId, TaskRecord, TaskType,
};
use crate::ports::{DueLock, DueScan, FinishedExecution, TaskEntry, TaskStore, WriteOutcome};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
CREATE TABLE IF NOT EXISTS scheduler_task_groups (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    sorting     INTEGER NOT NULL DEFAULT 0,
    deleted     INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS scheduler_tasks (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT,
    task_type              TEXT NOT NULL,
    task_group             INTEGER,
    disabled               INTEGER NOT NULL DEFAULT 0,
    deleted                INTEGER NOT NULL DEFAULT 0,
    allow_multiple         INTEGER NOT NULL DEFAULT 0,
    run_on_next_cron       INTEGER NOT NULL DEFAULT 0,
    next_execution         INTEGER,
    last_execution_time    INTEGER,
    last_execution_context TEXT,
    last_failure           TEXT,
    body                   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS scheduler_tasks_due
    ON scheduler_tasks (deleted, disabled, next_execution);
CREATE TABLE IF NOT EXISTS scheduler_task_executions (
    task_id    INTEGER NOT NULL REFERENCES scheduler_tasks (id),
    token      TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    PRIMARY KEY (task_id, token)
);
CREATE TABLE IF NOT EXISTS scheduler_registry (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const TASK_COLUMNS: &str = "t.id, t.task_type, t.task_group, t.disabled, t.deleted, \
     t.allow_multiple, t.run_on_next_cron, t.next_execution, t.last_execution_time, \
     t.last_execution_context, t.last_failure, t.body";

/// Due condition on the `t` alias, with `now` bound to `?1`.
const DUE_FILTER: &str = "t.disabled = 0
     AND (t.run_on_next_cron = 1
          OR (t.next_execution IS NOT NULL AND t.next_execution <= ?1))";

const LAST_RUN_KEY: &str = "last_run";

impl From<rusqlite::Error> for SchedulerError {
    fn from(err: rusqlite::Error) -> Self {
        SchedulerError::Storage(err.to_string())
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(DateTime::from_timestamp_millis)
}

fn failure_json(failure: Option<&FailureSnapshot>) -> Result<Option<String>, SchedulerError> {
    Ok(failure.map(serde_json::to_string).transpose()?)
}

fn map_task_row(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    let id = TaskId::new(row.get::<_, i64>(0)? as u64);
    let last_failure = row
        .get::<_, Option<String>>(10)?
        .and_then(|raw| match serde_json::from_str::<FailureSnapshot>(&raw) {
            Ok(failure) => Some(failure),
            Err(err) => {
                tracing::warn!(task_id = %id, error = %err, "ignoring unreadable failure snapshot");
                None
            }
        });
    let last_at = from_millis(row.get(8)?);
    let last_context = row
        .get::<_, Option<String>>(9)?
        .and_then(|raw| raw.parse::<ExecutionContext>().ok());

    Ok(StoredRow {
        id,
        task_type: TaskType::new(row.get::<_, String>(1)?),
        group: row.get::<_, Option<i64>>(2)?.map(|g| GroupId::new(g as u64)),
        disabled: row.get(3)?,
        deleted: row.get(4)?,
        allow_multiple: row.get(5)?,
        run_on_next_cron: row.get(6)?,
        next_execution: from_millis(row.get(7)?),
        last_execution: last_at
            .zip(last_context)
            .map(|(at, context)| LastExecution { at, context }),
        last_failure,
        body: row.get(11)?,
        executions: Vec::new(),
    })
}

fn map_group_row(row: &Row<'_>) -> rusqlite::Result<TaskGroup> {
    Ok(TaskGroup {
        id: GroupId::new(row.get::<_, i64>(0)? as u64),
        name: row.get(1)?,
        description: row.get(2)?,
        sorting: row.get(3)?,
        deleted: row.get(4)?,
    })
}

fn load_marks(conn: &Connection, id: TaskId) -> Result<Vec<ExecutionMark>, SchedulerError> {
    let mut stmt = conn.prepare(
        "SELECT token, started_at FROM scheduler_task_executions
         WHERE task_id = ?1 ORDER BY started_at, token",
    )?;
    let raw = stmt
        .query_map(params![id.value() as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(raw
        .into_iter()
        .filter_map(|(token, started_at)| {
            let token = match token.parse::<Ulid>() {
                Ok(ulid) => ExecutionToken::from_ulid(ulid),
                Err(err) => {
                    tracing::warn!(task_id = %id, %token, error = %err, "skipping unreadable execution token");
                    return None;
                }
            };
            Some(ExecutionMark {
                token,
                started_at: from_millis(Some(started_at))?,
            })
        })
        .collect())
}

/// Live rows matching `filter`, in scan order, with their marks loaded.
fn query_tasks<P: Params>(
    conn: &Connection,
    filter: &str,
    params: P,
) -> Result<Vec<StoredRow>, SchedulerError> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM scheduler_tasks t
         LEFT JOIN scheduler_task_groups g ON g.id = t.task_group
         WHERE t.deleted = 0 {filter}
         ORDER BY g.sorting, t.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map(params, map_task_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for row in &mut rows {
        row.executions = load_marks(conn, row.id)?;
    }
    Ok(rows)
}

/// `Some(deleted)` if a row with this id exists at all.
fn deleted_flag(conn: &Connection, id: TaskId) -> Result<Option<bool>, SchedulerError> {
    Ok(conn
        .query_row(
            "SELECT deleted FROM scheduler_tasks WHERE id = ?1",
            params![id.value() as i64],
            |row| row.get::<_, bool>(0),
        )
        .optional()?)
}

fn has_marks(conn: &Connection, id: TaskId) -> Result<bool, SchedulerError> {
    Ok(conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM scheduler_task_executions WHERE task_id = ?1)",
        params![id.value() as i64],
        |row| row.get::<_, bool>(0),
    )?)
}

/// Explains why a conditional write on a live, idle task matched no row.
fn explain_miss(conn: &Connection, id: TaskId) -> Result<WriteOutcome, SchedulerError> {
    match deleted_flag(conn, id)? {
        Some(false) if has_marks(conn, id)? => Ok(WriteOutcome::Busy),
        Some(false) => Err(SchedulerError::Storage(format!(
            "conditional write on {id} matched no row"
        ))),
        _ => Ok(WriteOutcome::Missing),
    }
}

pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, SchedulerError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, SchedulerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, SchedulerError> {
        self.conn
            .lock()
            .map_err(|_| SchedulerError::Storage("sqlite connection mutex poisoned".into()))
    }

    /// Replaces the stored body of a task with `raw`, bypassing the codec.
    ///
    /// Used to reproduce rows written by incompatible versions.
    pub fn put_raw_body(&self, id: TaskId, raw: &str) -> Result<(), SchedulerError> {
        let changed = self.conn()?.execute(
            "UPDATE scheduler_tasks SET body = ?2 WHERE id = ?1",
            params![id.value() as i64, raw],
        )?;
        if changed == 0 {
            return Err(SchedulerError::task_not_found(id));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_task(
        &self,
        draft: &TaskDraft,
        next_execution: Option<DateTime<Utc>>,
    ) -> Result<TaskId, SchedulerError> {
        // The id is assigned by SQLite; the placeholder never reaches the table.
        let row = StoredRow::from_draft(TaskId::new(0), draft, next_execution)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scheduler_tasks
               (task_type, task_group, disabled, allow_multiple, run_on_next_cron,
                next_execution, body)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
            params![
                row.task_type.as_str(),
                row.group.map(|g| g.value() as i64),
                row.disabled,
                row.allow_multiple,
                row.next_execution.map(to_millis),
                row.body,
            ],
        )?;
        Ok(TaskId::new(conn.last_insert_rowid() as u64))
    }

    async fn fetch_task(&self, id: TaskId) -> Result<TaskRecord, SchedulerError> {
        let conn = self.conn()?;
        let rows = query_tasks(&conn, "AND t.id = ?1", params![id.value() as i64])?;
        rows.into_iter()
            .next()
            .ok_or_else(|| SchedulerError::task_not_found(id))?
            .fetch()
    }

    async fn fetch_due_tasks(&self, now: DateTime<Utc>) -> Result<DueScan, SchedulerError> {
        let conn = self.conn()?;
        let rows = query_tasks(&conn, &format!("AND {DUE_FILTER}"), params![to_millis(now)])?;
        let mut scan = DueScan::default();
        for row in rows {
            match row.decode() {
                Ok(task) => scan.due.push(task),
                Err(err) => scan.broken.push(row.missing(&err)),
            }
        }
        Ok(scan)
    }

    async fn list_tasks(&self) -> Result<Vec<TaskEntry>, SchedulerError> {
        let conn = self.conn()?;
        let rows = query_tasks(&conn, "", params![])?;
        Ok(rows.iter().map(StoredRow::entry).collect())
    }

    async fn save_task(&self, task: &TaskRecord) -> Result<(), SchedulerError> {
        let row = StoredRow::encode(task)?;
        let failure = failure_json(row.last_failure.as_ref())?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT INTO scheduler_tasks
               (id, task_type, task_group, disabled, allow_multiple, run_on_next_cron,
                next_execution, last_execution_time, last_execution_context, last_failure, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (id) DO UPDATE SET
               task_type = excluded.task_type,
               task_group = excluded.task_group,
               disabled = excluded.disabled,
               allow_multiple = excluded.allow_multiple,
               run_on_next_cron = excluded.run_on_next_cron,
               next_execution = excluded.next_execution,
               last_execution_time = excluded.last_execution_time,
               last_execution_context = excluded.last_execution_context,
               last_failure = excluded.last_failure,
               body = excluded.body
             WHERE scheduler_tasks.deleted = 0",
            params![
                row.id.value() as i64,
                row.task_type.as_str(),
                row.group.map(|g| g.value() as i64),
                row.disabled,
                row.allow_multiple,
                row.run_on_next_cron,
                row.next_execution.map(to_millis),
                row.last_execution.map(|last| to_millis(last.at)),
                row.last_execution.map(|last| last.context.as_str()),
                failure,
                row.body,
            ],
        )?;
        if changed == 0 {
            return Err(SchedulerError::task_not_found(task.id));
        }
        Ok(())
    }

    async fn update_idle_task(&self, task: &TaskRecord) -> Result<WriteOutcome, SchedulerError> {
        let row = StoredRow::encode(task)?;
        let failure = failure_json(row.last_failure.as_ref())?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE scheduler_tasks SET
               task_type = ?2, task_group = ?3, disabled = ?4, allow_multiple = ?5,
               run_on_next_cron = ?6, next_execution = ?7, last_execution_time = ?8,
               last_execution_context = ?9, last_failure = ?10, body = ?11
             WHERE id = ?1 AND deleted = 0
               AND NOT EXISTS (SELECT 1 FROM scheduler_task_executions WHERE task_id = ?1)",
            params![
                row.id.value() as i64,
                row.task_type.as_str(),
                row.group.map(|g| g.value() as i64),
                row.disabled,
                row.allow_multiple,
                row.run_on_next_cron,
                row.next_execution.map(to_millis),
                row.last_execution.map(|last| to_millis(last.at)),
                row.last_execution.map(|last| last.context.as_str()),
                failure,
                row.body,
            ],
        )?;
        if changed == 1 {
            return Ok(WriteOutcome::Applied);
        }
        explain_miss(&conn, task.id)
    }

    async fn set_disabled(&self, id: TaskId, disabled: bool) -> Result<(), SchedulerError> {
        let changed = self.conn()?.execute(
            "UPDATE scheduler_tasks SET disabled = ?2 WHERE id = ?1 AND deleted = 0",
            params![id.value() as i64, disabled],
        )?;
        if changed == 0 {
            return Err(SchedulerError::task_not_found(id));
        }
        Ok(())
    }

    async fn queue_for_next_cron(&self, id: TaskId) -> Result<bool, SchedulerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let was_disabled: bool = tx
            .query_row(
                "SELECT disabled FROM scheduler_tasks WHERE id = ?1 AND deleted = 0",
                params![id.value() as i64],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        tx.execute(
            "UPDATE scheduler_tasks SET disabled = 0, run_on_next_cron = 1 WHERE id = ?1",
            params![id.value() as i64],
        )?;
        tx.commit()?;
        Ok(was_disabled)
    }

    async fn rearm_idle_task(&self, task: &TaskRecord) -> Result<WriteOutcome, SchedulerError> {
        let row = StoredRow::encode(task)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE scheduler_tasks SET
               body = ?2, allow_multiple = ?3, next_execution = ?4, disabled = 0
             WHERE id = ?1 AND deleted = 0
               AND NOT EXISTS (SELECT 1 FROM scheduler_task_executions WHERE task_id = ?1)",
            params![
                row.id.value() as i64,
                row.body,
                row.allow_multiple,
                row.next_execution.map(to_millis),
            ],
        )?;
        if changed == 1 {
            return Ok(WriteOutcome::Applied);
        }
        explain_miss(&conn, task.id)
    }

    async fn soft_delete(&self, id: TaskId) -> Result<WriteOutcome, SchedulerError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE scheduler_tasks SET deleted = 1
             WHERE id = ?1 AND deleted = 0
               AND NOT EXISTS (SELECT 1 FROM scheduler_task_executions WHERE task_id = ?1)",
            params![id.value() as i64],
        )?;
        if changed == 1 {
            return Ok(WriteOutcome::Applied);
        }
        explain_miss(&conn, id)
    }

    async fn mark_running(&self, id: TaskId, mark: &ExecutionMark) -> Result<bool, SchedulerError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO scheduler_task_executions (task_id, token, started_at)
             SELECT t.id, ?2, ?3 FROM scheduler_tasks t
             WHERE t.id = ?1 AND t.deleted = 0
               AND (t.allow_multiple = 1 OR NOT EXISTS (
                    SELECT 1 FROM scheduler_task_executions e WHERE e.task_id = t.id))",
            params![
                id.value() as i64,
                mark.token.as_ulid().to_string(),
                to_millis(mark.started_at),
            ],
        )?;
        if inserted == 1 {
            return Ok(true);
        }
        match deleted_flag(&conn, id)? {
            Some(false) => Ok(false),
            _ => Err(SchedulerError::task_not_found(id)),
        }
    }

    async fn mark_running_if_due(
        &self,
        id: TaskId,
        mark: &ExecutionMark,
        now: DateTime<Utc>,
    ) -> Result<DueLock, SchedulerError> {
        let conn = self.conn()?;
        let sql = format!(
            "INSERT INTO scheduler_task_executions (task_id, token, started_at)
             SELECT t.id, ?2, ?3 FROM scheduler_tasks t
             WHERE t.id = ?4 AND t.deleted = 0 AND {DUE_FILTER}
               AND (t.allow_multiple = 1 OR NOT EXISTS (
                    SELECT 1 FROM scheduler_task_executions e WHERE e.task_id = t.id))"
        );
        let inserted = conn.execute(
            &sql,
            params![
                to_millis(now),
                mark.token.as_ulid().to_string(),
                to_millis(mark.started_at),
                id.value() as i64,
            ],
        )?;
        if inserted == 1 {
            return Ok(DueLock::Locked);
        }
        if deleted_flag(&conn, id)? != Some(false) {
            return Err(SchedulerError::task_not_found(id));
        }
        let still_due: bool = conn.query_row(
            &format!("SELECT EXISTS (SELECT 1 FROM scheduler_tasks t WHERE t.id = ?2 AND {DUE_FILTER})"),
            params![to_millis(now), id.value() as i64],
            |row| row.get(0),
        )?;
        Ok(if still_due { DueLock::Busy } else { DueLock::NotDue })
    }

    async fn finish_execution(
        &self,
        id: TaskId,
        token: ExecutionToken,
        result: &FinishedExecution,
    ) -> Result<(), SchedulerError> {
        let failure = failure_json(result.failure.as_ref())?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE scheduler_tasks SET
               last_execution_time = ?2,
               last_execution_context = ?3,
               last_failure = ?4,
               next_execution = ?5,
               disabled = MAX(disabled, ?6),
               run_on_next_cron = 0
             WHERE id = ?1",
            params![
                id.value() as i64,
                to_millis(result.started_at),
                result.context.as_str(),
                failure,
                result.next_execution.map(to_millis),
                result.disable,
            ],
        )?;
        if changed == 0 {
            return Err(SchedulerError::task_not_found(id));
        }
        tx.execute(
            "DELETE FROM scheduler_task_executions WHERE task_id = ?1 AND token = ?2",
            params![id.value() as i64, token.as_ulid().to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn clear_mark(&self, id: TaskId, token: ExecutionToken) -> Result<(), SchedulerError> {
        let conn = self.conn()?;
        if deleted_flag(&conn, id)?.is_none() {
            return Err(SchedulerError::task_not_found(id));
        }
        conn.execute(
            "DELETE FROM scheduler_task_executions WHERE task_id = ?1 AND token = ?2",
            params![id.value() as i64, token.as_ulid().to_string()],
        )?;
        Ok(())
    }

    async fn clear_all_marks(&self, id: TaskId) -> Result<usize, SchedulerError> {
        let conn = self.conn()?;
        if deleted_flag(&conn, id)?.is_none() {
            return Err(SchedulerError::task_not_found(id));
        }
        Ok(conn.execute(
            "DELETE FROM scheduler_task_executions WHERE task_id = ?1",
            params![id.value() as i64],
        )?)
    }

    async fn create_group(&self, draft: &GroupDraft) -> Result<GroupId, SchedulerError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scheduler_task_groups (name, description, sorting) VALUES (?1, ?2, ?3)",
            params![draft.name, draft.description, draft.sorting],
        )?;
        Ok(GroupId::new(conn.last_insert_rowid() as u64))
    }

    async fn fetch_group(&self, id: GroupId) -> Result<TaskGroup, SchedulerError> {
        self.conn()?
            .query_row(
                "SELECT id, name, description, sorting, deleted FROM scheduler_task_groups
                 WHERE id = ?1 AND deleted = 0",
                params![id.value() as i64],
                map_group_row,
            )
            .optional()?
            .ok_or_else(|| SchedulerError::group_not_found(id))
    }

    async fn list_groups(&self) -> Result<Vec<TaskGroup>, SchedulerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, sorting, deleted FROM scheduler_task_groups
             ORDER BY sorting, id",
        )?;
        let groups = stmt
            .query_map(params![], map_group_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(groups)
    }

    async fn save_group(&self, group: &TaskGroup) -> Result<(), SchedulerError> {
        self.conn()?.execute(
            "INSERT INTO scheduler_task_groups (id, name, description, sorting, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (id) DO UPDATE SET
               name = excluded.name,
               description = excluded.description,
               sorting = excluded.sorting,
               deleted = excluded.deleted",
            params![
                group.id.value() as i64,
                group.name,
                group.description,
                group.sorting,
                group.deleted,
            ],
        )?;
        Ok(())
    }

    async fn soft_delete_group(&self, id: GroupId) -> Result<(), SchedulerError> {
        let changed = self.conn()?.execute(
            "UPDATE scheduler_task_groups SET deleted = 1 WHERE id = ?1 AND deleted = 0",
            params![id.value() as i64],
        )?;
        if changed == 0 {
            return Err(SchedulerError::group_not_found(id));
        }
        Ok(())
    }

    async fn record_last_run(&self, run: &LastRun) -> Result<(), SchedulerError> {
        let value = serde_json::to_string(run)?;
        self.conn()?.execute(
            "INSERT INTO scheduler_registry (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![LAST_RUN_KEY, value],
        )?;
        Ok(())
    }

    async fn fetch_last_run(&self) -> Result<Option<LastRun>, SchedulerError> {
        let raw: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM scheduler_registry WHERE key = ?1",
                params![LAST_RUN_KEY],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            None => Ok(None),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(run) => Ok(Some(run)),
                Err(err) => {
                    tracing::warn!(error = %err, "ignoring unreadable last-run record");
                    Ok(None)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionPolicy;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    fn mark() -> ExecutionMark {
        ExecutionMark {
            token: ExecutionToken::from_ulid(Ulid::new()),
            started_at: now(),
        }
    }

    #[tokio::test]
    async fn marks_round_trip_through_their_own_table() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let draft = TaskDraft::new("test.counting.v1", ExecutionPolicy::every(now(), 60));
        let id = store.create_task(&draft, Some(now())).await.unwrap();

        let mark = mark();
        assert!(store.mark_running(id, &mark).await.unwrap());
        let task = store.fetch_task(id).await.unwrap();
        assert_eq!(task.executions, vec![mark]);
    }

    #[tokio::test]
    async fn finish_execution_is_recorded_on_the_row() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let draft = TaskDraft::new("test.counting.v1", ExecutionPolicy::single(now()));
        let id = store.create_task(&draft, Some(now())).await.unwrap();
        let mark = mark();
        assert!(store.mark_running(id, &mark).await.unwrap());

        let result = FinishedExecution {
            started_at: now(),
            context: ExecutionContext::Manual,
            failure: Some(FailureSnapshot {
                code: 2,
                message: "timeout".into(),
            }),
            next_execution: None,
            disable: true,
        };
        store.finish_execution(id, mark.token, &result).await.unwrap();

        let task = store.fetch_task(id).await.unwrap();
        assert!(task.disabled);
        assert!(!task.is_running());
        assert_eq!(task.next_execution, None);
        assert_eq!(
            task.last_execution,
            Some(LastExecution {
                at: now(),
                context: ExecutionContext::Manual
            })
        );
        assert_eq!(task.last_failure.unwrap().code, 2);
    }

    #[tokio::test]
    async fn last_run_lives_in_the_registry_table() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        assert_eq!(store.fetch_last_run().await.unwrap(), None);

        let run = LastRun::started(now(), ExecutionContext::Cron).finished(now() + Duration::seconds(3));
        store.record_last_run(&run).await.unwrap();
        assert_eq!(store.fetch_last_run().await.unwrap(), Some(run));
    }

    #[tokio::test]
    async fn groups_are_ordered_by_sorting() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let b = store
            .create_group(&GroupDraft::new("b").sorted_at(5))
            .await
            .unwrap();
        let a = store
            .create_group(&GroupDraft::new("a").sorted_at(1))
            .await
            .unwrap();
        let ids: Vec<GroupId> = store
            .list_groups()
            .await
            .unwrap()
            .iter()
            .map(|group| group.id)
            .collect();
        assert_eq!(ids, vec![a, b]);

        let mut group = store.fetch_group(b).await.unwrap();
        group.name = "renamed".into();
        store.save_group(&group).await.unwrap();
        assert_eq!(store.fetch_group(b).await.unwrap().name, "renamed");
    }
}
