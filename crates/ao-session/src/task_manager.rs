//! In-memory task tree for one session.
//!
//! Created by the Decompose phase, mutated by Plan/Execute/Observe/Judge.
//! Tasks are never deleted; `update_status` and `set_summary` are the only
//! mutation paths.

use ao_domain::task::{ExecutionSummary, Task, TaskStatus};
use chrono::Utc;
use uuid::Uuid;

pub struct TaskManager {
    tasks: Vec<Task>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Create a new task, optionally under `parent_id`. Returns its id.
    pub fn create(&mut self, name: impl Into<String>, description: impl Into<String>, parent_id: Option<Uuid>) -> Uuid {
        let mut task = Task::new(name, description);
        task.parent_id = parent_id;
        let id = task.task_id;
        if let Some(parent) = parent_id.and_then(|pid| self.tasks.iter_mut().find(|t| t.task_id == pid)) {
            parent.children.push(id);
        }
        self.tasks.push(task);
        id
    }

    /// Update a task's status, stamping `start_time`/`end_time` on the
    /// Pending->Running and ->terminal transitions. When every child of
    /// the task's parent reaches a terminal-success state, the parent is
    /// not auto-completed here — callers (the Controller) decide that —
    /// but `parent_ready(parent_id)` reports whether the invariant holds.
    pub fn update_status(&mut self, task_id: Uuid, status: TaskStatus) {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.task_id == task_id) {
            if status == TaskStatus::Running && task.start_time.is_none() {
                task.start_time = Some(Utc::now());
            }
            if !status.is_incomplete() && task.end_time.is_none() {
                task.end_time = Some(Utc::now());
            }
            task.status = status;
        }
    }

    pub fn set_summary(&mut self, task_id: Uuid, result_summary: impl Into<String>, result_documents: Vec<String>) {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.task_id == task_id) {
            task.execution_summary = Some(ExecutionSummary {
                result_summary: result_summary.into(),
                result_documents,
            });
        }
    }

    pub fn get(&self, task_id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn all(&self) -> &[Task] {
        &self.tasks
    }

    /// True if any task in the tree is Pending or Running.
    pub fn any_incomplete(&self) -> bool {
        self.tasks.iter().any(|t| t.status.is_incomplete())
    }

    /// True only when every child of `parent_id` has reached a terminal
    /// success state (Completed or Skipped) — the invariant a Controller
    /// checks before marking the parent itself Completed.
    pub fn parent_ready(&self, parent_id: Uuid) -> bool {
        match self.tasks.iter().find(|t| t.task_id == parent_id) {
            Some(parent) => parent.children.iter().all(|cid| {
                self.tasks
                    .iter()
                    .find(|t| t.task_id == *cid)
                    .map(|c| c.status.is_terminal_success())
                    .unwrap_or(false)
            }),
            None => false,
        }
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_parent_and_child_link() {
        let mut mgr = TaskManager::new();
        let parent = mgr.create("decompose", "break into steps", None);
        let child = mgr.create("step-1", "do the first thing", Some(parent));

        assert_eq!(mgr.get(child).unwrap().parent_id, Some(parent));
        assert!(mgr.get(parent).unwrap().children.contains(&child));
    }

    #[test]
    fn update_status_stamps_start_and_end_time() {
        let mut mgr = TaskManager::new();
        let id = mgr.create("t", "d", None);
        mgr.update_status(id, TaskStatus::Running);
        assert!(mgr.get(id).unwrap().start_time.is_some());
        mgr.update_status(id, TaskStatus::Completed);
        assert!(mgr.get(id).unwrap().end_time.is_some());
    }

    #[test]
    fn any_incomplete_true_while_task_pending() {
        let mut mgr = TaskManager::new();
        mgr.create("t", "d", None);
        assert!(mgr.any_incomplete());
    }

    #[test]
    fn any_incomplete_false_once_all_terminal() {
        let mut mgr = TaskManager::new();
        let id = mgr.create("t", "d", None);
        mgr.update_status(id, TaskStatus::Completed);
        assert!(!mgr.any_incomplete());
    }

    #[test]
    fn parent_ready_requires_all_children_terminal_success() {
        let mut mgr = TaskManager::new();
        let parent = mgr.create("p", "d", None);
        let c1 = mgr.create("c1", "d", Some(parent));
        let c2 = mgr.create("c2", "d", Some(parent));

        assert!(!mgr.parent_ready(parent));
        mgr.update_status(c1, TaskStatus::Completed);
        assert!(!mgr.parent_ready(parent));
        mgr.update_status(c2, TaskStatus::Skipped);
        assert!(mgr.parent_ready(parent));
    }

    #[test]
    fn parent_ready_false_if_a_child_failed() {
        let mut mgr = TaskManager::new();
        let parent = mgr.create("p", "d", None);
        let c1 = mgr.create("c1", "d", Some(parent));
        mgr.update_status(c1, TaskStatus::Failed);
        assert!(!mgr.parent_ready(parent));
    }

    #[test]
    fn set_summary_attaches_execution_summary() {
        let mut mgr = TaskManager::new();
        let id = mgr.create("t", "d", None);
        mgr.set_summary(id, "found 3 files", vec!["a.rs".into()]);
        let summary = mgr.get(id).unwrap().execution_summary.as_ref().unwrap();
        assert_eq!(summary.result_summary, "found 3 files");
        assert_eq!(summary.result_documents, vec!["a.rs".to_string()]);
    }
}
