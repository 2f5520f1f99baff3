//! Task Board - Owned Store of Live Tasks
//!
//! Each task sits behind its own mutex so that concurrent escalation handling
//! and completion notifications for the same task id are serialized, while
//! unrelated tasks proceed independently. The outer maps are only locked long
//! enough to clone the per-task handle.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{AnalysisTask, SubTask};

/// Registry of analysis tasks and subtasks keyed by id
#[derive(Default)]
pub struct TaskBoard {
    tasks: RwLock<HashMap<String, Arc<Mutex<AnalysisTask>>>>,
    subtasks: RwLock<HashMap<String, Arc<Mutex<SubTask>>>>,
}

impl TaskBoard {
    /// Create an empty board
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Analysis Tasks
    // ========================================================================

    /// Insert or replace an analysis task
    pub async fn insert_task(&self, task: AnalysisTask) {
        debug!("Registering task {} ({})", task.id, task.goal_type);
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), Arc::new(Mutex::new(task)));
    }

    /// Snapshot of an analysis task
    pub async fn task(&self, task_id: &str) -> Option<AnalysisTask> {
        let handle = self.tasks.read().await.get(task_id).cloned()?;
        let task = handle.lock().await;
        Some(task.clone())
    }

    /// Mutate an analysis task under its lock
    pub async fn update_task<R>(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut AnalysisTask) -> R,
    ) -> Option<R> {
        let handle = self.tasks.read().await.get(task_id).cloned()?;
        let mut task = handle.lock().await;
        Some(f(&mut task))
    }

    /// Snapshots of every analysis task
    pub async fn tasks(&self) -> Vec<AnalysisTask> {
        let handles: Vec<_> = self.tasks.read().await.values().cloned().collect();
        let mut tasks = Vec::with_capacity(handles.len());
        for handle in handles {
            tasks.push(handle.lock().await.clone());
        }
        tasks
    }

    // ========================================================================
    // Subtasks
    // ========================================================================

    /// Insert or replace a subtask
    pub async fn insert_subtask(&self, subtask: SubTask) {
        debug!(
            "Registering subtask {} under {} (manager: {})",
            subtask.id,
            subtask.parent_task_id(),
            subtask.managed_by
        );
        self.subtasks
            .write()
            .await
            .insert(subtask.id.clone(), Arc::new(Mutex::new(subtask)));
    }

    /// Snapshot of a subtask
    pub async fn subtask(&self, subtask_id: &str) -> Option<SubTask> {
        let handle = self.subtasks.read().await.get(subtask_id).cloned()?;
        let subtask = handle.lock().await;
        Some(subtask.clone())
    }

    /// Mutate a subtask under its lock
    pub async fn update_subtask<R>(
        &self,
        subtask_id: &str,
        f: impl FnOnce(&mut SubTask) -> R,
    ) -> Option<R> {
        let handle = self.subtasks.read().await.get(subtask_id).cloned()?;
        let mut subtask = handle.lock().await;
        Some(f(&mut subtask))
    }

    /// Snapshots of every subtask belonging to `parent_task_id`
    pub async fn subtasks_for(&self, parent_task_id: &str) -> Vec<SubTask> {
        let mut subtasks: Vec<SubTask> = self
            .subtasks()
            .await
            .into_iter()
            .filter(|s| s.parent_task_id() == parent_task_id)
            .collect();
        subtasks.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created.cmp(&b.created)));
        subtasks
    }

    /// Snapshots of every subtask
    pub async fn subtasks(&self) -> Vec<SubTask> {
        let handles: Vec<_> = self.subtasks.read().await.values().cloned().collect();
        let mut subtasks = Vec::with_capacity(handles.len());
        for handle in handles {
            subtasks.push(handle.lock().await.clone());
        }
        subtasks
    }

    /// Number of registered subtasks
    pub async fn subtask_count(&self) -> usize {
        self.subtasks.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentId;
    use crate::tasks::{GoalType, SubTaskContext, TaskStatus};

    fn subtask(parent: &str, priority: u8) -> SubTask {
        SubTask::new(
            parent,
            GoalType::KeyPoints,
            AgentId::from("manager-a"),
            SubTaskContext::default(),
            priority,
        )
    }

    #[tokio::test]
    async fn test_update_unknown_subtask_is_none() {
        let board = TaskBoard::new();
        let result = board.update_subtask("missing", |s| s.fail()).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_subtasks_for_filters_and_orders_by_priority() {
        let board = TaskBoard::new();
        board.insert_subtask(subtask("job-1", 4)).await;
        board.insert_subtask(subtask("job-1", 1)).await;
        board.insert_subtask(subtask("job-2", 2)).await;

        let subtasks = board.subtasks_for("job-1").await;
        assert_eq!(subtasks.len(), 2);
        assert_eq!(subtasks[0].priority, 1);
        assert_eq!(subtasks[1].priority, 4);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let board = Arc::new(TaskBoard::new());
        let task = subtask("job-1", 1);
        let id = task.id.clone();
        board.insert_subtask(task).await;

        let mut handles = Vec::new();
        for i in 0..20 {
            let board = board.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                board
                    .update_subtask(&id, |s| s.reassign(AgentId::from(format!("manager-{}", i % 2))))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let task = board.subtask(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.previously_assigned_to.len() as u32, task.attempts);
    }
}
