//! Durable record of every in-flight task and its delegation context.
//!
//! Tasks live in an arena keyed by `task_id`; parent links are plain lookup
//! keys, so ancestor walks go through the index instead of live references.
//! Each record embeds the task together with its optionally-present
//! [`DelegationContext`], which makes "delete task, delete its context" a
//! single map removal and lets counter mutations ride the per-key lock.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use crate::delegation::context::DelegationContext;
use crate::errors::StoreError;
use crate::task::{ChannelKind, Task, TaskState};

/// A task plus its exclusively-owned delegation context.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task: Task,
    /// Created lazily on the task's first delegation; removed only together
    /// with the task itself.
    pub context: Option<DelegationContext>,
}

/// In-memory task store.
///
/// All mutation goes through narrow atomic operations; `decrement_pending`
/// is the single linearization point for completion aggregation. Alternative
/// persistence must preserve the same contract, in particular the atomicity
/// of task-plus-context deletion.
#[derive(Debug, Default)]
pub struct TaskStore {
    records: DashMap<Uuid, TaskRecord>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Allocate a new task. When `parent_task_id` is given the new task's
    /// lifecycle is tied to that parent's pending-delegation count (the
    /// count itself is bumped by the context manager when the delegation is
    /// recorded, not here).
    #[allow(clippy::too_many_arguments)]
    pub fn create_task(
        &self,
        requester: impl Into<String>,
        requester_channel: ChannelKind,
        original_request: impl Into<String>,
        delegated_to: impl Into<String>,
        parent_task_id: Option<Uuid>,
        routing_token: Option<String>,
    ) -> Task {
        let task = Task {
            id: Uuid::new_v4(),
            requester: requester.into(),
            requester_channel,
            original_request: original_request.into(),
            delegated_to: delegated_to.into(),
            parent_task_id,
            pending_delegations: 0,
            routing_token,
            state: TaskState::Running,
            created_at: Utc::now(),
        };
        self.records.insert(
            task.id,
            TaskRecord {
                task: task.clone(),
                context: None,
            },
        );
        task
    }

    /// Fetch a snapshot of a task.
    pub fn get_task(&self, task_id: Uuid) -> Result<Task, StoreError> {
        self.records
            .get(&task_id)
            .map(|r| r.task.clone())
            .ok_or(StoreError::NotFound { task_id })
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.records.contains_key(&task_id)
    }

    /// Remove the task and its owned context in one operation. Idempotent:
    /// deleting a task that is already gone is a no-op.
    pub fn delete_task(&self, task_id: Uuid) {
        self.records.remove(&task_id);
    }

    /// Atomically bump the task's outstanding-delegation count.
    pub fn increment_pending(&self, task_id: Uuid) -> Result<u32, StoreError> {
        let mut record = self
            .records
            .get_mut(&task_id)
            .ok_or(StoreError::NotFound { task_id })?;
        record.task.pending_delegations += 1;
        Ok(record.task.pending_delegations)
    }

    /// Atomically decrement the task's outstanding-delegation count and
    /// return the new value.
    ///
    /// The per-key lock serializes concurrent callers, so of two racing
    /// decrements from 2 exactly one observes 0. A decrement on an already
    /// zero counter is logged and clamped; the count never goes negative.
    pub fn decrement_pending(&self, task_id: Uuid) -> Result<u32, StoreError> {
        let mut record = self
            .records
            .get_mut(&task_id)
            .ok_or(StoreError::NotFound { task_id })?;
        match record.task.pending_delegations.checked_sub(1) {
            Some(n) => {
                record.task.pending_delegations = n;
                Ok(n)
            }
            None => {
                warn!(%task_id, "decrement_pending on a zero counter; clamping");
                Ok(0)
            }
        }
    }

    pub fn set_state(&self, task_id: Uuid, state: TaskState) -> Result<(), StoreError> {
        let mut record = self
            .records
            .get_mut(&task_id)
            .ok_or(StoreError::NotFound { task_id })?;
        record.task.state = state;
        Ok(())
    }

    /// Walk the parent links from the given task up to its root.
    ///
    /// Returns the tasks from the starting task (inclusive) to the root.
    /// Parents that have already been deleted truncate the walk.
    pub fn ancestor_chain(&self, task_id: Uuid) -> Vec<Task> {
        let mut chain = Vec::new();
        let mut cursor = Some(task_id);
        while let Some(id) = cursor {
            match self.records.get(&id) {
                Some(record) => {
                    cursor = record.task.parent_task_id;
                    chain.push(record.task.clone());
                }
                None => break,
            }
        }
        chain
    }

    /// Remove every task older than `max_age` and return the removed ids.
    ///
    /// This is the sweep for permanently orphaned tasks (a crashed parent
    /// whose pending count will never reach an observer). It never runs
    /// implicitly.
    pub fn expire_stale(&self, max_age: Duration) -> Vec<Uuid> {
        let cutoff = Utc::now() - max_age;
        let stale: Vec<Uuid> = self
            .records
            .iter()
            .filter(|r| r.task.created_at < cutoff)
            .map(|r| r.task.id)
            .collect();
        for id in &stale {
            warn!(task_id = %id, "expiring stale task");
            self.records.remove(id);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Run a closure against a record under its per-key lock.
    ///
    /// Used by the context manager so that context creation/append and the
    /// pending-count bump happen as one atomic step. Returns `None` when the
    /// task does not exist.
    pub(crate) fn with_record_mut<R>(
        &self,
        task_id: Uuid,
        f: impl FnOnce(&mut TaskRecord) -> R,
    ) -> Option<R> {
        self.records.get_mut(&task_id).map(|mut record| f(&mut record))
    }

    /// Read-only peek at a record's context.
    pub(crate) fn with_context<R>(
        &self,
        task_id: Uuid,
        f: impl FnOnce(&DelegationContext) -> R,
    ) -> Option<R> {
        self.records
            .get(&task_id)
            .and_then(|record| record.context.as_ref().map(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store_with_task(pending: u32) -> (TaskStore, Uuid) {
        let store = TaskStore::new();
        let task = store.create_task("user-1", ChannelKind::Ui, "request", "agent-a", None, None);
        for _ in 0..pending {
            store.increment_pending(task.id).unwrap();
        }
        (store, task.id)
    }

    #[test]
    fn create_and_get_round_trip() {
        let (store, id) = store_with_task(0);
        let task = store.get_task(id).unwrap();
        assert_eq!(task.delegated_to, "agent-a");
        assert_eq!(task.pending_delegations, 0);
        assert_eq!(task.state, TaskState::Running);
    }

    #[test]
    fn get_missing_task_is_not_found() {
        let store = TaskStore::new();
        let err = store.get_task(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn delete_is_idempotent() {
        let (store, id) = store_with_task(0);
        store.delete_task(id);
        assert!(!store.contains(id));
        // Second delete is a no-op, not an error.
        store.delete_task(id);
        assert!(store.is_empty());
    }

    #[test]
    fn pending_counter_never_goes_negative() {
        let (store, id) = store_with_task(1);
        assert_eq!(store.decrement_pending(id).unwrap(), 0);
        // Clamped, not underflowed.
        assert_eq!(store.decrement_pending(id).unwrap(), 0);
        assert_eq!(store.get_task(id).unwrap().pending_delegations, 0);
    }

    #[test]
    fn concurrent_decrements_observe_zero_exactly_once() {
        let n = 8;
        let (store, id) = store_with_task(n);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..n)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.decrement_pending(id).unwrap())
            })
            .collect();

        let observed: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let zeros = observed.iter().filter(|&&n| n == 0).count();
        assert_eq!(zeros, 1, "exactly one caller must observe the zero count");
        assert_eq!(store.get_task(id).unwrap().pending_delegations, 0);
    }

    #[test]
    fn ancestor_chain_walks_to_root() {
        let store = TaskStore::new();
        let root = store.create_task("user-1", ChannelKind::Ui, "r", "a", None, None);
        let mid = store.create_task("a", ChannelKind::Ui, "m", "b", Some(root.id), None);
        let leaf = store.create_task("b", ChannelKind::Ui, "l", "c", Some(mid.id), None);

        let chain = store.ancestor_chain(leaf.id);
        let agents: Vec<&str> = chain.iter().map(|t| t.delegated_to.as_str()).collect();
        assert_eq!(agents, vec!["c", "b", "a"]);
    }

    #[test]
    fn expire_stale_removes_old_tasks_only() {
        let store = TaskStore::new();
        let old = store.create_task("u", ChannelKind::Ui, "r", "a", None, None);
        store
            .with_record_mut(old.id, |record| {
                record.task.created_at = Utc::now() - Duration::hours(2);
            })
            .unwrap();
        let fresh = store.create_task("u", ChannelKind::Ui, "r", "b", None, None);

        let expired = store.expire_stale(Duration::hours(1));
        assert_eq!(expired, vec![old.id]);
        assert!(store.contains(fresh.id));
        assert!(!store.contains(old.id));
    }
}
