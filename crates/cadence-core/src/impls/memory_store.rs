//! In-memory task store.
//!
//! All state sits behind one `tokio::sync::Mutex`; every operation is a
//! single critical section, which makes each of them atomic. Bodies are
//! kept encoded, so a corrupted row behaves exactly as it does in SQLite.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::row::StoredRow;
use crate::domain::{
    ExecutionMark, ExecutionToken, GroupDraft, GroupId, LastExecution, LastRun, SchedulerError,
    TaskDraft, TaskGroup, TaskId, TaskRecord,
};
use crate::ports::{DueLock, DueScan, FinishedExecution, TaskEntry, TaskStore, WriteOutcome};

struct InMemoryState {
    tasks: BTreeMap<TaskId, StoredRow>,
    groups: BTreeMap<GroupId, TaskGroup>,
    last_run: Option<LastRun>,
    next_task_id: u64,
    next_group_id: u64,
}

impl InMemoryState {
    fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            groups: BTreeMap::new(),
            last_run: None,
            next_task_id: 1,
            next_group_id: 1,
        }
    }

    fn allocate_task_id(&mut self) -> TaskId {
        let id = TaskId::new(self.next_task_id);
        self.next_task_id += 1;
        id
    }

    fn allocate_group_id(&mut self) -> GroupId {
        let id = GroupId::new(self.next_group_id);
        self.next_group_id += 1;
        id
    }

    fn live_task_mut(&mut self, id: TaskId) -> Option<&mut StoredRow> {
        self.tasks.get_mut(&id).filter(|row| !row.deleted)
    }

    /// Live rows in scan order: group sorting (ungrouped first), then id.
    fn ordered_rows(&self) -> Vec<&StoredRow> {
        let mut rows: Vec<&StoredRow> = self.tasks.values().filter(|row| !row.deleted).collect();
        rows.sort_by_key(|row| {
            let sorting = row
                .group
                .and_then(|group| self.groups.get(&group))
                .map(|group| group.sorting);
            (sorting, row.id)
        });
        rows
    }
}

/// Task store kept entirely in process memory.
#[derive(Clone)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryState::new())),
        }
    }

    /// Replaces the stored body of a task with `raw`, bypassing the codec.
    ///
    /// Used to reproduce rows written by incompatible versions.
    pub async fn put_raw_body(
        &self,
        id: TaskId,
        raw: impl Into<String>,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        let row = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        row.body = raw.into();
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(
        &self,
        draft: &TaskDraft,
        next_execution: Option<DateTime<Utc>>,
    ) -> Result<TaskId, SchedulerError> {
        let mut state = self.state.lock().await;
        let id = state.allocate_task_id();
        let row = StoredRow::from_draft(id, draft, next_execution)?;
        state.tasks.insert(id, row);
        Ok(id)
    }

    async fn fetch_task(&self, id: TaskId) -> Result<TaskRecord, SchedulerError> {
        let state = self.state.lock().await;
        state
            .tasks
            .get(&id)
            .filter(|row| !row.deleted)
            .ok_or_else(|| SchedulerError::task_not_found(id))?
            .fetch()
    }

    async fn fetch_due_tasks(&self, now: DateTime<Utc>) -> Result<DueScan, SchedulerError> {
        let state = self.state.lock().await;
        let mut scan = DueScan::default();
        for row in state.ordered_rows() {
            if !row.is_due(now) {
                continue;
            }
            match row.decode() {
                Ok(task) => scan.due.push(task),
                Err(err) => scan.broken.push(row.missing(&err)),
            }
        }
        Ok(scan)
    }

    async fn list_tasks(&self) -> Result<Vec<TaskEntry>, SchedulerError> {
        let state = self.state.lock().await;
        Ok(state.ordered_rows().into_iter().map(StoredRow::entry).collect())
    }

    async fn save_task(&self, task: &TaskRecord) -> Result<(), SchedulerError> {
        let row = StoredRow::encode(task)?;
        let mut state = self.state.lock().await;
        match state.tasks.get_mut(&task.id) {
            Some(existing) if existing.deleted => Err(SchedulerError::task_not_found(task.id)),
            Some(existing) => {
                existing.overwrite_with(row);
                Ok(())
            }
            None => {
                let mut row = row;
                row.executions.clear();
                state.next_task_id = state.next_task_id.max(task.id.value() + 1);
                state.tasks.insert(task.id, row);
                Ok(())
            }
        }
    }

    async fn update_idle_task(&self, task: &TaskRecord) -> Result<WriteOutcome, SchedulerError> {
        let row = StoredRow::encode(task)?;
        let mut state = self.state.lock().await;
        let Some(existing) = state.live_task_mut(task.id) else {
            return Ok(WriteOutcome::Missing);
        };
        if !existing.executions.is_empty() {
            return Ok(WriteOutcome::Busy);
        }
        existing.overwrite_with(row);
        Ok(WriteOutcome::Applied)
    }

    async fn set_disabled(&self, id: TaskId, disabled: bool) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        let row = state
            .live_task_mut(id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        row.disabled = disabled;
        Ok(())
    }

    async fn queue_for_next_cron(&self, id: TaskId) -> Result<bool, SchedulerError> {
        let mut state = self.state.lock().await;
        let row = state
            .live_task_mut(id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        let was_disabled = std::mem::replace(&mut row.disabled, false);
        row.run_on_next_cron = true;
        Ok(was_disabled)
    }

    async fn rearm_idle_task(&self, task: &TaskRecord) -> Result<WriteOutcome, SchedulerError> {
        let encoded = StoredRow::encode(task)?;
        let mut state = self.state.lock().await;
        let Some(existing) = state.live_task_mut(task.id) else {
            return Ok(WriteOutcome::Missing);
        };
        if !existing.executions.is_empty() {
            return Ok(WriteOutcome::Busy);
        }
        existing.body = encoded.body;
        existing.allow_multiple = encoded.allow_multiple;
        existing.next_execution = encoded.next_execution;
        existing.disabled = false;
        Ok(WriteOutcome::Applied)
    }

    async fn soft_delete(&self, id: TaskId) -> Result<WriteOutcome, SchedulerError> {
        let mut state = self.state.lock().await;
        let Some(existing) = state.live_task_mut(id) else {
            return Ok(WriteOutcome::Missing);
        };
        if !existing.executions.is_empty() {
            return Ok(WriteOutcome::Busy);
        }
        existing.deleted = true;
        Ok(WriteOutcome::Applied)
    }

    async fn mark_running(&self, id: TaskId, mark: &ExecutionMark) -> Result<bool, SchedulerError> {
        let mut state = self.state.lock().await;
        let row = state
            .live_task_mut(id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        if !row.allow_multiple && !row.executions.is_empty() {
            return Ok(false);
        }
        row.executions.push(*mark);
        Ok(true)
    }

    async fn mark_running_if_due(
        &self,
        id: TaskId,
        mark: &ExecutionMark,
        now: DateTime<Utc>,
    ) -> Result<DueLock, SchedulerError> {
        let mut state = self.state.lock().await;
        let row = state
            .live_task_mut(id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        if !row.is_due(now) {
            return Ok(DueLock::NotDue);
        }
        if !row.allow_multiple && !row.executions.is_empty() {
            return Ok(DueLock::Busy);
        }
        row.executions.push(*mark);
        Ok(DueLock::Locked)
    }

    async fn finish_execution(
        &self,
        id: TaskId,
        token: ExecutionToken,
        result: &FinishedExecution,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        let row = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        row.last_execution = Some(LastExecution {
            at: result.started_at,
            context: result.context,
        });
        row.last_failure = result.failure.clone();
        row.next_execution = result.next_execution;
        row.disabled |= result.disable;
        row.run_on_next_cron = false;
        row.executions.retain(|mark| mark.token != token);
        Ok(())
    }

    async fn clear_mark(&self, id: TaskId, token: ExecutionToken) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        let row = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        row.executions.retain(|mark| mark.token != token);
        Ok(())
    }

    async fn clear_all_marks(&self, id: TaskId) -> Result<usize, SchedulerError> {
        let mut state = self.state.lock().await;
        let row = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        Ok(std::mem::take(&mut row.executions).len())
    }

    async fn create_group(&self, draft: &GroupDraft) -> Result<GroupId, SchedulerError> {
        let mut state = self.state.lock().await;
        let id = state.allocate_group_id();
        state.groups.insert(
            id,
            TaskGroup {
                id,
                name: draft.name.clone(),
                description: draft.description.clone(),
                sorting: draft.sorting,
                deleted: false,
            },
        );
        Ok(id)
    }

    async fn fetch_group(&self, id: GroupId) -> Result<TaskGroup, SchedulerError> {
        let state = self.state.lock().await;
        state
            .groups
            .get(&id)
            .filter(|group| !group.deleted)
            .cloned()
            .ok_or_else(|| SchedulerError::group_not_found(id))
    }

    async fn list_groups(&self) -> Result<Vec<TaskGroup>, SchedulerError> {
        let state = self.state.lock().await;
        let mut groups: Vec<TaskGroup> = state.groups.values().cloned().collect();
        groups.sort_by_key(|group| (group.sorting, group.id));
        Ok(groups)
    }

    async fn save_group(&self, group: &TaskGroup) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        state.next_group_id = state.next_group_id.max(group.id.value() + 1);
        state.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn soft_delete_group(&self, id: GroupId) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        let group = state
            .groups
            .get_mut(&id)
            .filter(|group| !group.deleted)
            .ok_or_else(|| SchedulerError::group_not_found(id))?;
        group.deleted = true;
        Ok(())
    }

    async fn record_last_run(&self, run: &LastRun) -> Result<(), SchedulerError> {
        self.state.lock().await.last_run = Some(*run);
        Ok(())
    }

    async fn fetch_last_run(&self) -> Result<Option<LastRun>, SchedulerError> {
        Ok(self.state.lock().await.last_run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionPolicy, ExecutionContext};
    use chrono::{Duration, TimeZone};
    use ulid::Ulid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    fn mark() -> ExecutionMark {
        ExecutionMark {
            token: ExecutionToken::from_ulid(Ulid::new()),
            started_at: now(),
        }
    }

    fn draft() -> TaskDraft {
        TaskDraft::new("test.counting.v1", ExecutionPolicy::every(now(), 60))
    }

    #[tokio::test]
    async fn ids_are_allocated_sequentially() {
        let store = InMemoryTaskStore::new();
        let a = store.create_task(&draft(), Some(now())).await.unwrap();
        let b = store.create_task(&draft(), Some(now())).await.unwrap();
        assert_eq!((a.value(), b.value()), (1, 2));
    }

    #[tokio::test]
    async fn due_scan_orders_by_group_sorting_then_id() {
        let store = InMemoryTaskStore::new();
        let late = store
            .create_group(&GroupDraft::new("late").sorted_at(20))
            .await
            .unwrap();
        let early = store
            .create_group(&GroupDraft::new("early").sorted_at(10))
            .await
            .unwrap();

        let a = store.create_task(&draft().in_group(late), Some(now())).await.unwrap();
        let b = store.create_task(&draft().in_group(early), Some(now())).await.unwrap();
        let c = store.create_task(&draft(), Some(now())).await.unwrap();
        let d = store.create_task(&draft().in_group(early), Some(now())).await.unwrap();

        let scan = store.fetch_due_tasks(now()).await.unwrap();
        let ids: Vec<TaskId> = scan.due.iter().map(|task| task.id).collect();
        assert_eq!(ids, vec![c, b, d, a]);
    }

    #[tokio::test]
    async fn finish_execution_records_outcome_and_releases_the_mark() {
        let store = InMemoryTaskStore::new();
        let id = store.create_task(&draft(), Some(now())).await.unwrap();
        let mark = mark();
        assert!(store.mark_running(id, &mark).await.unwrap());
        assert_eq!(store.fetch_task(id).await.unwrap().executions, vec![mark]);

        let result = FinishedExecution {
            started_at: now(),
            context: ExecutionContext::Cron,
            failure: None,
            next_execution: Some(now() + Duration::seconds(60)),
            disable: true,
        };
        store.finish_execution(id, mark.token, &result).await.unwrap();

        let task = store.fetch_task(id).await.unwrap();
        assert!(!task.is_running());
        assert!(task.disabled);
        assert_eq!(task.next_execution, Some(now() + Duration::seconds(60)));
        assert_eq!(task.last_execution.unwrap().context, ExecutionContext::Cron);
    }

    #[tokio::test]
    async fn due_lock_refuses_a_task_that_already_moved_on() {
        let store = InMemoryTaskStore::new();
        let id = store.create_task(&draft(), Some(now())).await.unwrap();
        let first = mark();
        assert_eq!(
            store.mark_running_if_due(id, &first, now()).await.unwrap(),
            DueLock::Locked
        );
        assert_eq!(
            store.mark_running_if_due(id, &mark(), now()).await.unwrap(),
            DueLock::Busy
        );

        let result = FinishedExecution {
            started_at: now(),
            context: ExecutionContext::Cron,
            failure: None,
            next_execution: Some(now() + Duration::seconds(60)),
            disable: false,
        };
        store.finish_execution(id, first.token, &result).await.unwrap();
        assert_eq!(
            store.mark_running_if_due(id, &mark(), now()).await.unwrap(),
            DueLock::NotDue
        );
    }

    #[tokio::test]
    async fn rearm_enables_and_moves_a_single_task() {
        let store = InMemoryTaskStore::new();
        let single = TaskDraft::new("test.counting.v1", ExecutionPolicy::single(now())).disabled();
        let id = store.create_task(&single, None).await.unwrap();

        let mut task = store.fetch_task(id).await.unwrap();
        task.register_single_execution(now() + Duration::hours(1));
        assert_eq!(store.rearm_idle_task(&task).await.unwrap(), WriteOutcome::Applied);

        let stored = store.fetch_task(id).await.unwrap();
        assert!(!stored.disabled);
        assert_eq!(stored.next_execution, Some(now() + Duration::hours(1)));
        assert_eq!(stored.policy, ExecutionPolicy::single(now() + Duration::hours(1)));
    }

    #[tokio::test]
    async fn save_task_inserts_unknown_ids_without_reusing_them() {
        let store = InMemoryTaskStore::new();
        let task = TaskRecord::from_draft(TaskId::new(10), draft(), Some(now()));
        store.save_task(&task).await.unwrap();

        let next = store.create_task(&draft(), None).await.unwrap();
        assert_eq!(next.value(), 11);
    }

    #[tokio::test]
    async fn deleted_groups_stay_listed_but_cannot_be_fetched() {
        let store = InMemoryTaskStore::new();
        let id = store.create_group(&GroupDraft::new("ops")).await.unwrap();
        store.soft_delete_group(id).await.unwrap();

        assert!(store.fetch_group(id).await.is_err());
        let groups = store.list_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].deleted);
        assert!(store.soft_delete_group(id).await.is_err());
    }
}
